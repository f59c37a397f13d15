//! 管理层交给控制核心的数据快照。
//!
//! 这些类型由外部持久化层拥有，核心只读取、不修改。

pub mod proxy;
pub mod wireguard;

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use proxy::{
    outbound_tag, EncryptionMethod, NetworkType, ProxyProtocol, RoutingRule, RuleKind,
    UpstreamProxy,
};
pub use wireguard::{InterfaceSettings, Peer};

/// Lifecycle state of a managed daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the management layer hands over in one go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub interfaces: Vec<InterfaceSettings>,
    /// Stable order expected, e.g. creation time ascending.
    pub peers: Vec<Peer>,
    pub proxies: Vec<UpstreamProxy>,
    pub rules: Vec<RoutingRule>,
    pub singbox_template: Option<String>,
}

impl StateSnapshot {
    pub fn active_interface(&self) -> Option<&InterfaceSettings> {
        select_active_interface(&self.interfaces)
    }

    pub fn active_proxy(&self) -> Option<&UpstreamProxy> {
        select_active_proxy(&self.proxies)
    }
}

/// Load a snapshot from a JSON or YAML file.
pub fn load_state(path: &Path) -> Result<StateSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading state {}", path.display()))?;
    parse_state(&raw)
}

pub fn parse_state(content: &str) -> Result<StateSnapshot> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).context("parsing JSON state")
    } else if content.trim().is_empty() {
        Ok(StateSnapshot::default())
    } else {
        serde_yml::from_str(content).context("parsing YAML state")
    }
}

/// The settings object that gets rendered: the first enabled one, else the first one.
pub fn select_active_interface(interfaces: &[InterfaceSettings]) -> Option<&InterfaceSettings> {
    interfaces
        .iter()
        .find(|i| i.enabled)
        .or_else(|| interfaces.first())
}

/// The enabled proxy with the lowest priority value; ties go to the earlier entry.
pub fn select_active_proxy(proxies: &[UpstreamProxy]) -> Option<&UpstreamProxy> {
    proxies
        .iter()
        .filter(|p| p.enabled)
        .min_by_key(|p| p.priority)
}
