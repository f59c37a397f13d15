use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::common::ControlError;

/// Smallest MTU an IPv4 host must accept.
pub const MIN_MTU: u32 = 576;

/// WireGuard interface settings as stored by the management layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceSettings {
    pub private_key: String,
    pub public_key: String,
    pub listen_port: u16,
    /// CIDR, e.g. `10.0.0.1/24`
    pub address: String,
    pub mtu: u32,
    pub post_up: Option<String>,
    pub post_down: Option<String>,
    pub enabled: bool,
    pub interface_name: String,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            public_key: String::new(),
            listen_port: 51820,
            address: "10.0.0.1/24".to_string(),
            mtu: 1280,
            post_up: None,
            post_down: None,
            enabled: true,
            interface_name: "wg0".to_string(),
        }
    }
}

impl InterfaceSettings {
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.private_key.trim().is_empty() {
            return Err(ControlError::Config("interface private key is empty".into()));
        }
        if self.listen_port == 0 {
            return Err(ControlError::Config("listen port must be in 1..=65535".into()));
        }
        if self.mtu < MIN_MTU {
            return Err(ControlError::Config(format!(
                "MTU {} is below the minimum of {}",
                self.mtu, MIN_MTU
            )));
        }
        if !self.address.contains('/') {
            return Err(ControlError::Config(format!(
                "interface address '{}' is not in CIDR notation",
                self.address
            )));
        }
        Ok(())
    }

    /// Host part of `address`, used as the DNS server handed to clients.
    pub fn host_address(&self) -> &str {
        self.address.split('/').next().unwrap_or("10.0.0.1")
    }
}

/// A remote WireGuard peer.
///
/// `last_handshake`, `endpoint` and the transfer counters come from live
/// status and are not authoritative input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    /// Comma separated CIDR list.
    pub allowed_ips: String,
    pub name: String,
    pub device_type: Option<String>,
    pub endpoint: Option<String>,
    /// Seconds, 0 disables.
    pub persistent_keepalive: u32,
    pub enabled: bool,
    pub last_handshake: Option<SystemTime>,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
}

impl Default for Peer {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            preshared_key: None,
            allowed_ips: String::new(),
            name: String::new(),
            device_type: None,
            endpoint: None,
            persistent_keepalive: 25,
            enabled: true,
            last_handshake: None,
            transfer_rx: 0,
            transfer_tx: 0,
        }
    }
}

impl Peer {
    pub fn new(public_key: &str, allowed_ips: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
            allowed_ips: allowed_ips.to_string(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_preshared_key(mut self, key: &str) -> Self {
        self.preshared_key = Some(key.to_string());
        self
    }

    pub fn with_keepalive(mut self, secs: u32) -> Self {
        self.persistent_keepalive = secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn preshared_key(&self) -> Option<&str> {
        self.preshared_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// First entry of `allowed_ips`, the peer's own tunnel address.
    pub fn first_allowed_ip(&self) -> Option<&str> {
        self.allowed_ips
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}
