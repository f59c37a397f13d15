use serde::{Deserialize, Serialize};

/// Upstream proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[serde(alias = "TROJAN")]
    Trojan,
    #[serde(alias = "VLESS")]
    Vless,
    #[serde(alias = "VMESS")]
    Vmess,
    #[serde(alias = "SHADOWSOCKS", alias = "ss")]
    Shadowsocks,
}

impl ProxyProtocol {
    /// sing-box outbound `type`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyProtocol::Trojan => "trojan",
            ProxyProtocol::Vless => "vless",
            ProxyProtocol::Vmess => "vmess",
            ProxyProtocol::Shadowsocks => "shadowsocks",
        }
    }

    pub fn uses_tls(self) -> bool {
        !matches!(self, ProxyProtocol::Shadowsocks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    #[serde(alias = "TCP")]
    Tcp,
    #[serde(alias = "UDP")]
    Udp,
    #[serde(alias = "WS")]
    Ws,
    #[serde(alias = "GRPC")]
    Grpc,
    #[serde(alias = "HTTP")]
    Http,
}

impl NetworkType {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Tcp => "tcp",
            NetworkType::Udp => "udp",
            NetworkType::Ws => "ws",
            NetworkType::Grpc => "grpc",
            NetworkType::Http => "http",
        }
    }

    /// ws / grpc / http are sing-box transports rather than a `network` value.
    pub fn is_transport(self) -> bool {
        matches!(self, NetworkType::Ws | NetworkType::Grpc | NetworkType::Http)
    }
}

/// Shadowsocks cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionMethod {
    #[serde(rename = "aes-128-gcm", alias = "AES_128_GCM")]
    Aes128Gcm,
    #[default]
    #[serde(rename = "aes-256-gcm", alias = "AES_256_GCM")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305", alias = "CHACHA20_POLY1305")]
    Chacha20Poly1305,
    #[serde(rename = "xchacha20-poly1305", alias = "XCHACHA20_POLY1305")]
    Xchacha20Poly1305,
}

impl EncryptionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMethod::Aes128Gcm => "aes-128-gcm",
            EncryptionMethod::Aes256Gcm => "aes-256-gcm",
            EncryptionMethod::Chacha20Poly1305 => "chacha20-poly1305",
            EncryptionMethod::Xchacha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

/// The remote proxy server sing-box forwards `proxy`-tagged traffic to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamProxy {
    pub protocol: ProxyProtocol,
    pub server: String,
    pub server_port: u16,
    /// trojan / shadowsocks
    pub password: Option<String>,
    /// vless / vmess
    pub uuid: Option<String>,
    /// TLS SNI, defaults to `server`.
    pub server_name: Option<String>,
    pub insecure: bool,
    pub network: NetworkType,
    /// vless only
    pub flow: Option<String>,
    /// vmess only
    pub alter_id: u32,
    /// vmess only
    pub security: String,
    /// shadowsocks only
    pub method: EncryptionMethod,
    pub enabled: bool,
    /// Lower is preferred.
    pub priority: i32,
}

impl Default for UpstreamProxy {
    fn default() -> Self {
        Self {
            protocol: ProxyProtocol::Trojan,
            server: String::new(),
            server_port: 443,
            password: None,
            uuid: None,
            server_name: None,
            insecure: false,
            network: NetworkType::Tcp,
            flow: None,
            alter_id: 0,
            security: "auto".to_string(),
            method: EncryptionMethod::Aes256Gcm,
            enabled: true,
            priority: 1,
        }
    }
}

impl UpstreamProxy {
    pub fn new(protocol: ProxyProtocol, server: &str, server_port: u16) -> Self {
        Self {
            protocol,
            server: server.to_string(),
            server_port,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn tls_server_name(&self) -> &str {
        self.server_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.server)
    }
}

/// What a routing rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[serde(alias = "DOMAIN")]
    Domain,
    #[serde(alias = "IP_CIDR")]
    IpCidr,
    #[serde(alias = "GEOSITE")]
    Geosite,
}

impl RuleKind {
    /// Matching field in a sing-box route rule.
    pub fn field(self) -> &'static str {
        match self {
            RuleKind::Domain => "domain",
            RuleKind::IpCidr => "ip_cidr",
            RuleKind::Geosite => "geosite",
        }
    }
}

/// Logical outbound tags understood by the generator.
pub mod outbound_tag {
    pub const PROXY: &str = "proxy";
    pub const DIRECT: &str = "direct";
    pub const BLOCK: &str = "block";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRule {
    pub kind: RuleKind,
    /// JSON list of strings, e.g. `["google.com","youtube.com"]`.
    pub value: String,
    pub outbound_tag: String,
    pub enabled: bool,
    /// Ascending, lower applies first.
    pub priority: i32,
    pub description: Option<String>,
}

impl Default for RoutingRule {
    fn default() -> Self {
        Self {
            kind: RuleKind::Domain,
            value: "[]".to_string(),
            outbound_tag: outbound_tag::DIRECT.to_string(),
            enabled: true,
            priority: 100,
            description: None,
        }
    }
}

impl RoutingRule {
    pub fn new(kind: RuleKind, value: &str, outbound_tag: &str, priority: i32) -> Self {
        Self {
            kind,
            value: value.to_string(),
            outbound_tag: outbound_tag.to_string(),
            priority,
            ..Default::default()
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_aliases() {
        let p: ProxyProtocol = serde_json::from_str("\"TROJAN\"").unwrap();
        assert_eq!(p, ProxyProtocol::Trojan);
        let p: ProxyProtocol = serde_json::from_str("\"ss\"").unwrap();
        assert_eq!(p, ProxyProtocol::Shadowsocks);
        assert!(!ProxyProtocol::Shadowsocks.uses_tls());
        assert!(ProxyProtocol::Vmess.uses_tls());
    }

    #[test]
    fn method_wire_names() {
        let m: EncryptionMethod = serde_json::from_str("\"chacha20-poly1305\"").unwrap();
        assert_eq!(m, EncryptionMethod::Chacha20Poly1305);
        let m: EncryptionMethod = serde_json::from_str("\"AES_128_GCM\"").unwrap();
        assert_eq!(m.as_str(), "aes-128-gcm");
    }

    #[test]
    fn sni_falls_back_to_server() {
        let mut p = UpstreamProxy::new(ProxyProtocol::Vless, "example.com", 443);
        assert_eq!(p.tls_server_name(), "example.com");
        p.server_name = Some("cdn.example.net".into());
        assert_eq!(p.tls_server_name(), "cdn.example.net");
    }

    #[test]
    fn rule_from_json() {
        let r: RoutingRule = serde_json::from_str(
            r#"{"kind":"IP_CIDR","value":"[\"10.0.0.0/8\"]","outbound_tag":"proxy","priority":5}"#,
        )
        .unwrap();
        assert_eq!(r.kind, RuleKind::IpCidr);
        assert_eq!(r.kind.field(), "ip_cidr");
        assert!(r.enabled);
    }
}
