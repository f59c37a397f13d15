use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Linux caps interface names at IFNAMSIZ - 1.
const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub wireguard: WireGuardConfig,
    #[serde(default)]
    pub singbox: SingBoxConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let wg = &self.wireguard;
        if wg.executable.trim().is_empty() || wg.wg_quick.trim().is_empty() {
            anyhow::bail!("wireguard executable paths must not be empty");
        }
        if wg.interface_name.is_empty()
            || wg.interface_name.len() > MAX_INTERFACE_NAME_LEN
            || wg.interface_name.contains('/')
            || wg.interface_name.chars().any(char::is_whitespace)
        {
            anyhow::bail!("invalid wireguard interface name '{}'", wg.interface_name);
        }
        if wg.command_timeout_secs == 0 || wg.status_timeout_secs == 0 {
            anyhow::bail!("wireguard timeouts must be greater than zero");
        }

        let sb = &self.singbox;
        if sb.executable.trim().is_empty() {
            anyhow::bail!("singbox executable path must not be empty");
        }
        if sb.config_path.trim().is_empty() {
            anyhow::bail!("singbox config_path must not be empty");
        }
        if sb.check_timeout_secs == 0 || sb.stop_grace_secs == 0 {
            anyhow::bail!("singbox timeouts must be greater than zero");
        }

        if self.status.poll_interval_secs == 0 {
            anyhow::bail!("status poll_interval_secs must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    /// `wg` binary, used for `show`.
    pub executable: String,
    /// `wg-quick` binary, used for `up` / `down`.
    pub wg_quick: String,
    pub config_dir: String,
    pub interface_name: String,
    pub default_post_up: Option<String>,
    pub default_post_down: Option<String>,
    /// Where kernel network devices show up; `<dir>/<iface>` exists while the interface is up.
    pub sys_net_dir: String,
    pub command_timeout_secs: u64,
    pub status_timeout_secs: u64,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            executable: "/usr/bin/wg".to_string(),
            wg_quick: "/usr/bin/wg-quick".to_string(),
            config_dir: "/etc/wireguard".to_string(),
            interface_name: "wg0".to_string(),
            default_post_up: None,
            default_post_down: None,
            sys_net_dir: "/sys/class/net".to_string(),
            command_timeout_secs: 30,
            status_timeout_secs: 10,
        }
    }
}

impl WireGuardConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SingBoxConfig {
    pub executable: String,
    pub config_path: String,
    /// Optional template file used instead of the bundled default.
    pub template_path: Option<String>,
    pub check_timeout_secs: u64,
    pub stop_grace_secs: u64,
    /// Run `sing-box check` on the written config before starting.
    pub check_before_start: bool,
}

impl Default for SingBoxConfig {
    fn default() -> Self {
        Self {
            executable: "/usr/local/bin/sing-box".to_string(),
            config_path: "/etc/singbox/config.json".to_string(),
            template_path: None,
            check_timeout_secs: 30,
            stop_grace_secs: 5,
            check_before_start: false,
        }
    }
}

impl SingBoxConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub poll_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl StatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
