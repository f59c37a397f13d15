//! WireGuard 配置渲染（wg-quick INI 格式）。
//!
//! 纯函数：相同输入总是得到逐字节相同的输出。

use std::fmt::Write;

use url::form_urlencoded;

use crate::model::{InterfaceSettings, Peer};

/// Stand-in for the client's private key, which the server never holds.
pub const CLIENT_PRIVATE_KEY_PLACEHOLDER: &str = "<client-private-key>";
/// Used when no endpoint host is supplied.
pub const SERVER_HOST_PLACEHOLDER: &str = "<server-ip>";

const CLIENT_ALLOWED_IPS: &str = "0.0.0.0/0";
const FALLBACK_CLIENT_ADDRESS: &str = "10.0.0.2/32";

/// Fallback PostUp / PostDown used when the settings carry none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderDefaults {
    pub post_up: Option<String>,
    pub post_down: Option<String>,
}

impl RenderDefaults {
    pub fn new(post_up: Option<String>, post_down: Option<String>) -> Self {
        Self { post_up, post_down }
    }
}

/// Render the server-side `wg0.conf`.
///
/// Disabled peers are left out entirely; the rest keep input order.
pub fn render(settings: &InterfaceSettings, peers: &[Peer], defaults: &RenderDefaults) -> String {
    let mut out = String::new();

    let post_up = settings.post_up.as_deref().or(defaults.post_up.as_deref());
    let post_down = settings.post_down.as_deref().or(defaults.post_down.as_deref());

    line(&mut out, "[Interface]");
    kv(&mut out, "PrivateKey", &settings.private_key);
    kv(&mut out, "Address", &settings.address);
    kv(&mut out, "ListenPort", settings.listen_port);
    kv(&mut out, "MTU", settings.mtu);
    if let Some(cmd) = post_up.filter(|c| !c.trim().is_empty()) {
        kv(&mut out, "PostUp", cmd);
    }
    if let Some(cmd) = post_down.filter(|c| !c.trim().is_empty()) {
        kv(&mut out, "PostDown", cmd);
    }
    out.push('\n');

    for peer in peers.iter().filter(|p| p.enabled) {
        line(&mut out, "[Peer]");
        kv(&mut out, "PublicKey", &peer.public_key);
        if let Some(psk) = peer.preshared_key() {
            kv(&mut out, "PresharedKey", psk);
        }
        kv(&mut out, "AllowedIPs", &peer.allowed_ips);
        if peer.persistent_keepalive > 0 {
            kv(&mut out, "PersistentKeepalive", peer.persistent_keepalive);
        }
        out.push('\n');
    }

    tracing::debug!(
        iface = settings.interface_name.as_str(),
        peers = peers.iter().filter(|p| p.enabled).count(),
        "rendered wireguard config"
    );
    out
}

/// Render the config a peer imports on its own device.
pub fn render_client_config(
    settings: &InterfaceSettings,
    peer: &Peer,
    endpoint_host: Option<&str>,
) -> String {
    let mut out = String::new();

    line(&mut out, "[Interface]");
    kv(&mut out, "PrivateKey", CLIENT_PRIVATE_KEY_PLACEHOLDER);
    kv(
        &mut out,
        "Address",
        peer.first_allowed_ip().unwrap_or(FALLBACK_CLIENT_ADDRESS),
    );
    kv(&mut out, "DNS", settings.host_address());
    out.push('\n');

    line(&mut out, "[Peer]");
    kv(&mut out, "PublicKey", &settings.public_key);
    kv(
        &mut out,
        "Endpoint",
        format!("{}:{}", host_or_placeholder(endpoint_host), settings.listen_port),
    );
    if let Some(psk) = peer.preshared_key() {
        kv(&mut out, "PresharedKey", psk);
    }
    kv(&mut out, "AllowedIPs", CLIENT_ALLOWED_IPS);
    if peer.persistent_keepalive > 0 {
        kv(&mut out, "PersistentKeepalive", peer.persistent_keepalive);
    }
    out
}

/// Single-line `wg://` URI carrying the same fields as [`render_client_config`].
pub fn render_uri(settings: &InterfaceSettings, peer: &Peer, endpoint_host: Option<&str>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("public_key", &settings.public_key);
    query.append_pair(
        "address",
        peer.first_allowed_ip().unwrap_or(FALLBACK_CLIENT_ADDRESS),
    );
    query.append_pair("allowed_ips", CLIENT_ALLOWED_IPS);
    query.append_pair("dns", settings.host_address());
    if let Some(psk) = peer.preshared_key() {
        query.append_pair("preshared_key", psk);
    }
    if peer.persistent_keepalive > 0 {
        query.append_pair("persistent_keepalive", &peer.persistent_keepalive.to_string());
    }

    format!(
        "wg://{}@{}:{}?{}",
        CLIENT_PRIVATE_KEY_PLACEHOLDER,
        host_or_placeholder(endpoint_host),
        settings.listen_port,
        query.finish()
    )
}

fn host_or_placeholder(host: Option<&str>) -> &str {
    host.map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(SERVER_HOST_PLACEHOLDER)
}

fn line(out: &mut String, s: &str) {
    out.push_str(s);
    out.push('\n');
}

fn kv(out: &mut String, key: &str, value: impl std::fmt::Display) {
    // writing into a String cannot fail
    let _ = writeln!(out, "{} = {}", key, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> InterfaceSettings {
        InterfaceSettings {
            private_key: "K".into(),
            public_key: "SERVERPUB".into(),
            address: "10.0.0.1/24".into(),
            listen_port: 51820,
            mtu: 1280,
            ..Default::default()
        }
    }

    #[test]
    fn renders_interface_and_peer_lines() {
        let peers = vec![Peer::new("P1", "10.0.0.2/32").with_keepalive(25)];
        let text = render(&settings(), &peers, &RenderDefaults::default());

        for expected in [
            "PrivateKey = K",
            "Address = 10.0.0.1/24",
            "ListenPort = 51820",
            "MTU = 1280",
            "PublicKey = P1",
            "AllowedIPs = 10.0.0.2/32",
            "PersistentKeepalive = 25",
        ] {
            assert!(text.lines().any(|l| l == expected), "missing line {expected:?} in\n{text}");
        }
        assert!(text.starts_with("[Interface]\n"));
        assert!(!text.contains("PostUp"));
        assert!(!text.contains("PresharedKey"));
    }

    #[test]
    fn exact_layout() {
        let peers = vec![
            Peer::new("P1", "10.0.0.2/32").with_preshared_key("PSK").with_keepalive(0),
        ];
        let text = render(&settings(), &peers, &RenderDefaults::default());
        assert_eq!(
            text,
            "[Interface]\nPrivateKey = K\nAddress = 10.0.0.1/24\nListenPort = 51820\nMTU = 1280\n\n\
             [Peer]\nPublicKey = P1\nPresharedKey = PSK\nAllowedIPs = 10.0.0.2/32\n\n"
        );
    }

    #[test]
    fn disabled_peers_are_omitted() {
        let peers = vec![
            Peer::new("P1", "10.0.0.2/32"),
            Peer::new("P2", "10.0.0.3/32").disabled(),
            Peer::new("P3", "10.0.0.4/32"),
        ];
        let text = render(&settings(), &peers, &RenderDefaults::default());
        assert_eq!(text.matches("[Peer]").count(), 2);
        assert!(!text.contains("P2"));
        let p1 = text.find("P1").unwrap();
        let p3 = text.find("P3").unwrap();
        assert!(p1 < p3);
    }

    #[test]
    fn post_up_prefers_settings_then_defaults() {
        let defaults = RenderDefaults::new(
            Some("iptables -A FORWARD -i %i -j ACCEPT".into()),
            Some("iptables -D FORWARD -i %i -j ACCEPT".into()),
        );
        let mut s = settings();
        s.post_up = Some("echo up".into());

        let text = render(&s, &[], &defaults);
        assert!(text.contains("PostUp = echo up\n"));
        assert!(text.contains("PostDown = iptables -D FORWARD -i %i -j ACCEPT\n"));

        // an explicit blank value suppresses the default
        s.post_down = Some("  ".into());
        let text = render(&s, &[], &defaults);
        assert!(!text.contains("PostDown"));
    }

    #[test]
    fn render_is_deterministic() {
        let peers = vec![Peer::new("P1", "10.0.0.2/32"), Peer::new("P2", "10.0.0.3/32")];
        let a = render(&settings(), &peers, &RenderDefaults::default());
        let b = render(&settings(), &peers, &RenderDefaults::default());
        assert_eq!(a, b);
    }

    #[test]
    fn client_config_points_at_server() {
        let peer = Peer::new("P1", "10.0.0.2/32, 10.0.5.0/24").with_preshared_key("PSK");
        let text = render_client_config(&settings(), &peer, Some("vpn.example.com"));
        assert_eq!(
            text,
            "[Interface]\nPrivateKey = <client-private-key>\nAddress = 10.0.0.2/32\nDNS = 10.0.0.1\n\n\
             [Peer]\nPublicKey = SERVERPUB\nEndpoint = vpn.example.com:51820\nPresharedKey = PSK\n\
             AllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn client_config_placeholder_endpoint() {
        let peer = Peer::new("P1", "");
        let text = render_client_config(&settings(), &peer, None);
        assert!(text.contains("Endpoint = <server-ip>:51820\n"));
        assert!(text.contains("Address = 10.0.0.2/32\n"));
    }

    #[test]
    fn uri_encodes_query() {
        let peer = Peer::new("P1", "10.0.0.2/32").with_preshared_key("ab+c/d=");
        let uri = render_uri(&settings(), &peer, Some("1.2.3.4"));
        assert!(uri.starts_with("wg://<client-private-key>@1.2.3.4:51820?"));
        assert!(uri.contains("public_key=SERVERPUB"));
        assert!(uri.contains("allowed_ips=0.0.0.0%2F0"));
        assert!(uri.contains("dns=10.0.0.1"));
        assert!(uri.contains("preshared_key=ab%2Bc%2Fd%3D"));
        assert!(uri.contains("persistent_keepalive=25"));
        assert!(!uri.contains('\n'));
    }
}
