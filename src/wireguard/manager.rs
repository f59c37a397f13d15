//! WireGuard 接口生命周期管理。
//!
//! 状态只经由 `start` / `stop` / `restart` 迁移；这些操作由实例内的互斥锁串行化，
//! 状态读取不加该锁。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::common::CommandRunner;
use crate::config::types::WireGuardConfig;
use crate::model::{InterfaceSettings, Peer, ServiceStatus};

use super::executor::{InterfaceAction, WireGuardExecutor};
use super::render::{render, RenderDefaults};
use super::status::{merge_peer_stats, WireGuardStatus};

pub struct WireGuardManager {
    executor: WireGuardExecutor,
    defaults: RenderDefaults,
    interface_name: String,
    command_timeout: Duration,
    status_timeout: Duration,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<ServiceStatus>,
}

impl WireGuardManager {
    pub fn new(config: &WireGuardConfig) -> Self {
        Self::from_executor(config, WireGuardExecutor::new(config))
    }

    pub fn with_runner(config: &WireGuardConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::from_executor(config, WireGuardExecutor::with_runner(config, runner))
    }

    fn from_executor(config: &WireGuardConfig, executor: WireGuardExecutor) -> Self {
        Self {
            executor,
            defaults: RenderDefaults::new(
                config.default_post_up.clone(),
                config.default_post_down.clone(),
            ),
            interface_name: config.interface_name.clone(),
            command_timeout: config.command_timeout(),
            status_timeout: config.status_timeout(),
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ServiceStatus::Stopped),
        }
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn executor(&self) -> &WireGuardExecutor {
        &self.executor
    }

    fn config_file(&self) -> String {
        format!("{}.conf", self.interface_name)
    }

    /// Last state recorded by a lifecycle operation.
    pub fn recorded_status(&self) -> ServiceStatus {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, status: ServiceStatus) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Render and write `<iface>.conf`. Nothing touches disk unless rendering succeeded.
    pub async fn setup_interface(
        &self,
        settings: &InterfaceSettings,
        peers: &[Peer],
    ) -> Result<PathBuf> {
        let _guard = self.op_lock.lock().await;
        settings
            .validate()
            .with_context(|| format!("invalid settings for {}", self.interface_name))?;
        let content = render(settings, peers, &self.defaults);
        let file = self.config_file();
        let path = self
            .executor
            .write_config(&file, &content)
            .await
            .with_context(|| format!("writing {}", file))?;
        info!(
            iface = self.interface_name.as_str(),
            peers = peers.iter().filter(|p| p.enabled).count(),
            "interface config prepared"
        );
        Ok(path)
    }

    pub async fn start(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<()> {
        if self.executor.interface_exists(&self.interface_name).await {
            info!(iface = self.interface_name.as_str(), "interface already up, bringing it down first");
            self.stop_locked().await;
        }

        match self
            .executor
            .run_privileged(InterfaceAction::Up, &self.interface_name, self.command_timeout)
            .await
        {
            Ok(_) => {
                self.set_state(ServiceStatus::Running);
                info!(iface = self.interface_name.as_str(), "wireguard started");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceStatus::Error);
                Err(e).with_context(|| format!("wg-quick up {}", self.interface_name))
            }
        }
    }

    /// Bring the interface down. Never fails: `wg-quick down` on an absent
    /// interface is the common case, so any failure still ends in `Stopped`.
    pub async fn stop(&self) {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        if let Err(e) = self
            .executor
            .run_privileged(InterfaceAction::Down, &self.interface_name, self.command_timeout)
            .await
        {
            warn!(
                iface = self.interface_name.as_str(),
                error = %e,
                "wg-quick down failed, treating interface as stopped"
            );
        }
        self.set_state(ServiceStatus::Stopped);
        info!(iface = self.interface_name.as_str(), "wireguard stopped");
    }

    pub async fn restart(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
        self.start_locked().await
    }

    /// Stop the interface and remove its config file.
    pub async fn teardown(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
        let file = self.config_file();
        self.executor
            .delete_config(&file)
            .await
            .with_context(|| format!("deleting {}", file))?;
        Ok(())
    }

    pub async fn status(&self) -> ServiceStatus {
        let exists = self.executor.interface_exists(&self.interface_name).await;
        match (exists, self.recorded_status()) {
            (true, ServiceStatus::Running) => ServiceStatus::Running,
            _ => ServiceStatus::Stopped,
        }
    }

    /// `status()` paired with a best-effort `wg show`. A failed live query
    /// leaves the status alone and reports [`WireGuardStatus::unknown`].
    pub async fn detailed_status(&self) -> (ServiceStatus, Option<WireGuardStatus>) {
        let status = self.status().await;
        let live = self.executor.query_status(self.status_timeout).await;
        (status, Some(live))
    }

    /// Peer snapshots with endpoint, traffic and handshake filled from `wg show`.
    pub async fn live_peers(&self, peers: &[Peer]) -> Vec<Peer> {
        let live = self.executor.query_status(self.status_timeout).await;
        merge_peer_stats(peers, &live, SystemTime::now())
    }
}
