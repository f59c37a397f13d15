//! wg / wg-quick 调用与配置文件读写。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::common::fs::{remove_if_exists, write_atomic};
use crate::common::{CommandRunner, ControlError, SystemRunner};
use crate::config::types::WireGuardConfig;

use super::status::{parse_wg_show, PeerStats, WireGuardStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceAction {
    Up,
    Down,
}

impl InterfaceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceAction::Up => "up",
            InterfaceAction::Down => "down",
        }
    }
}

pub struct WireGuardExecutor {
    runner: Arc<dyn CommandRunner>,
    wg: String,
    wg_quick: String,
    config_dir: PathBuf,
    sys_net_dir: PathBuf,
    interface_name: String,
    status_timeout: Duration,
}

impl WireGuardExecutor {
    pub fn new(config: &WireGuardConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: &WireGuardConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            wg: config.executable.clone(),
            wg_quick: config.wg_quick.clone(),
            config_dir: PathBuf::from(&config.config_dir),
            sys_net_dir: PathBuf::from(&config.sys_net_dir),
            interface_name: config.interface_name.clone(),
            status_timeout: config.status_timeout(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// `wg-quick <up|down> <iface>`.
    pub async fn run_privileged(
        &self,
        action: InterfaceAction,
        interface_name: &str,
        timeout: Duration,
    ) -> Result<String, ControlError> {
        let output = self
            .runner
            .run(&self.wg_quick, &[action.as_str(), interface_name], timeout)
            .await?;
        info!(iface = interface_name, action = action.as_str(), "wg-quick finished");
        Ok(output)
    }

    /// `wg show`. Best effort: any failure yields [`WireGuardStatus::unknown`].
    pub async fn query_status(&self, timeout: Duration) -> WireGuardStatus {
        match self.try_query_status(timeout).await {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, "wg show failed, reporting unknown status");
                WireGuardStatus::unknown()
            }
        }
    }

    async fn try_query_status(&self, timeout: Duration) -> Result<WireGuardStatus, ControlError> {
        let output = self.runner.run(&self.wg, &["show"], timeout).await?;
        let mut status = parse_wg_show(&output);
        status.interface_name = self.interface_name.clone();
        Ok(status)
    }

    /// `wg show <public key>`, first matching peer record.
    pub async fn query_peer_status(&self, public_key: &str) -> Option<PeerStats> {
        match self
            .runner
            .run(&self.wg, &["show", public_key], self.status_timeout)
            .await
        {
            Ok(output) => parse_wg_show(&output).peers.into_iter().next(),
            Err(e) => {
                debug!(error = %e, "wg show <peer> failed");
                None
            }
        }
    }

    /// Write `<config_dir>/<name>` with owner-only permissions.
    pub async fn write_config(&self, name: &str, content: &str) -> Result<PathBuf, ControlError> {
        let path = self.config_path(name)?;
        write_atomic(&path, content, true).await?;
        info!(path = %path.display(), "wireguard config written");
        Ok(path)
    }

    pub async fn delete_config(&self, name: &str) -> Result<(), ControlError> {
        let path = self.config_path(name)?;
        if remove_if_exists(&path).await? {
            info!(path = %path.display(), "wireguard config deleted");
        }
        Ok(())
    }

    /// Whether the kernel currently has a network device called `name`. Runs no subprocess.
    pub async fn interface_exists(&self, name: &str) -> bool {
        if name.is_empty() || name.contains('/') {
            return false;
        }
        match tokio::fs::try_exists(self.sys_net_dir.join(name)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(iface = name, error = %e, "cannot check interface presence");
                false
            }
        }
    }

    fn config_path(&self, name: &str) -> Result<PathBuf, ControlError> {
        let file = Path::new(name);
        if name.is_empty() || file.components().count() != 1 || file.file_name().is_none() {
            return Err(ControlError::Config(format!("invalid config file name '{}'", name)));
        }
        Ok(self.config_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records calls and answers from a canned table.
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
        show_output: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<String, ControlError> {
            let line = crate::common::command::describe(program, args);
            self.calls.lock().unwrap().push(line.clone());
            if self.fail {
                return Err(ControlError::Execution {
                    command: line,
                    code: Some(1),
                    output: "Unable to access interface: No such device".into(),
                });
            }
            Ok(self.show_output.clone().unwrap_or_default())
        }
    }

    fn config(dir: &Path) -> WireGuardConfig {
        WireGuardConfig {
            config_dir: dir.join("wireguard").to_string_lossy().into_owned(),
            sys_net_dir: dir.join("net").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn privileged_call_shape() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let exec = WireGuardExecutor::with_runner(&config(dir.path()), runner.clone());

        exec.run_privileged(InterfaceAction::Up, "wg0", Duration::from_secs(30))
            .await
            .unwrap();
        exec.run_privileged(InterfaceAction::Down, "wg0", Duration::from_secs(30))
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["/usr/bin/wg-quick up wg0", "/usr/bin/wg-quick down wg0"]);
    }

    #[tokio::test]
    async fn status_failure_is_unknown_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail: true,
            ..Default::default()
        });
        let exec = WireGuardExecutor::with_runner(&config(dir.path()), runner.clone());

        let status = exec.query_status(Duration::from_secs(10)).await;
        assert_eq!(status, WireGuardStatus::unknown());
        assert!(exec.query_peer_status("ABC").await.is_none());
        assert_eq!(runner.calls.lock().unwrap()[1], "/usr/bin/wg show ABC");
    }

    #[tokio::test]
    async fn status_is_parsed_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            show_output: Some(
                "interface: wg0\n  public key: S=\n  listening port: 51820\n\npeer: A=\n  transfer: 3 B received, 4 B sent\n"
                    .into(),
            ),
            ..Default::default()
        });
        let exec = WireGuardExecutor::with_runner(&config(dir.path()), runner);

        let status = exec.query_status(Duration::from_secs(10)).await;
        assert_eq!(status.interface_name, "wg0");
        assert_eq!(status.public_key, "S=");
        assert_eq!(status.peers.len(), 1);

        let peer = exec.query_peer_status("A=").await.unwrap();
        assert_eq!(peer.transfer_tx, 4);
    }

    #[tokio::test]
    async fn write_and_delete_config() {
        let dir = tempfile::tempdir().unwrap();
        let exec = WireGuardExecutor::with_runner(&config(dir.path()), Arc::new(ScriptedRunner::default()));

        let path = exec.write_config("wg0.conf", "[Interface]\n").await.unwrap();
        assert_eq!(path, dir.path().join("wireguard").join("wg0.conf"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[Interface]\n");

        exec.delete_config("wg0.conf").await.unwrap();
        assert!(!path.exists());
        // deleting again is fine
        exec.delete_config("wg0.conf").await.unwrap();

        assert!(exec.write_config("../escape.conf", "x").await.is_err());
    }

    #[tokio::test]
    async fn interface_presence_uses_sys_net_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exec = WireGuardExecutor::with_runner(&config(dir.path()), Arc::new(ScriptedRunner::default()));

        assert!(!exec.interface_exists("wg0").await);
        std::fs::create_dir_all(dir.path().join("net").join("wg0")).unwrap();
        assert!(exec.interface_exists("wg0").await);
        assert!(!exec.interface_exists("../net").await);
    }
}
