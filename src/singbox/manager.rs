//! sing-box 生命周期管理：生成配置、写盘、启动 / 停止进程。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::common::fs::write_atomic;
use crate::common::CommandRunner;
use crate::config::types::SingBoxConfig;
use crate::model::{RoutingRule, ServiceStatus, UpstreamProxy};

use super::generator;
use super::log_stream::LogBroadcaster;
use super::process::SingBoxProcess;

pub struct SingBoxManager {
    process: SingBoxProcess,
    config_path: PathBuf,
    template_path: Option<PathBuf>,
    check_before_start: bool,
    check_timeout: Duration,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<ServiceStatus>,
}

impl SingBoxManager {
    pub fn new(config: &SingBoxConfig, logs: LogBroadcaster) -> Self {
        Self::from_process(config, SingBoxProcess::new(config, logs))
    }

    pub fn with_runner(
        config: &SingBoxConfig,
        logs: LogBroadcaster,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self::from_process(config, SingBoxProcess::with_runner(config, logs, runner))
    }

    fn from_process(config: &SingBoxConfig, process: SingBoxProcess) -> Self {
        Self {
            process,
            config_path: PathBuf::from(&config.config_path),
            template_path: config.template_path.as_ref().map(PathBuf::from),
            check_before_start: config.check_before_start,
            check_timeout: config.check_timeout(),
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ServiceStatus::Stopped),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn logs(&self) -> &LogBroadcaster {
        self.process.logs()
    }

    pub fn recorded_status(&self) -> ServiceStatus {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, status: ServiceStatus) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Template text used when the caller supplies none.
    async fn configured_template(&self) -> Option<String> {
        let path = self.template_path.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read sing-box template, using bundled one");
                None
            }
        }
    }

    /// Render, validate and write the config. The process is left alone.
    pub async fn generate_and_write(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<PathBuf> {
        let _guard = self.op_lock.lock().await;
        self.generate_locked(active_proxy, rules, template).await
    }

    async fn generate_locked(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<PathBuf> {
        let configured = match template {
            Some(_) => None,
            None => self.configured_template().await,
        };
        let text = generator::render(active_proxy, rules, template.or(configured.as_deref()));
        generator::validate(&text).context("generated sing-box config")?;
        write_atomic(&self.config_path, &text, true)
            .await
            .context("writing sing-box config")?;
        info!(
            path = %self.config_path.display(),
            proxy = active_proxy.map(|p| p.server.as_str()).unwrap_or("none"),
            rules = rules.iter().filter(|r| r.enabled).count(),
            "sing-box config written"
        );
        Ok(self.config_path.clone())
    }

    pub async fn start(&self, active_proxy: Option<&UpstreamProxy>, rules: &[RoutingRule]) -> Result<()> {
        self.start_with_template(active_proxy, rules, None).await
    }

    pub async fn start_with_template(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.start_locked(active_proxy, rules, template).await
    }

    async fn start_locked(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<()> {
        self.stop_locked().await;
        match self.launch(active_proxy, rules, template).await {
            Ok(pid) => {
                self.set_state(ServiceStatus::Running);
                info!(pid, "sing-box started");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceStatus::Error);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<u32> {
        let path = self.generate_locked(active_proxy, rules, template).await?;
        let path = path.to_string_lossy();
        if self.check_before_start {
            self.process
                .validate_config(&path, self.check_timeout)
                .await
                .context("sing-box check")?;
        }
        let pid = self
            .process
            .start(&path)
            .await
            .context("starting sing-box")?;
        Ok(pid)
    }

    /// Stop the daemon. Lenient like the WireGuard side: always ends in `Stopped`.
    pub async fn stop(&self) {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        self.process.stop().await;
        self.set_state(ServiceStatus::Stopped);
    }

    pub async fn restart(&self, active_proxy: Option<&UpstreamProxy>, rules: &[RoutingRule]) -> Result<()> {
        self.restart_with_template(active_proxy, rules, None).await
    }

    pub async fn restart_with_template(
        &self,
        active_proxy: Option<&UpstreamProxy>,
        rules: &[RoutingRule],
        template: Option<&str>,
    ) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
        self.start_locked(active_proxy, rules, template).await
    }

    /// `Running` whenever the process is alive, whatever was recorded.
    pub fn status(&self) -> ServiceStatus {
        if self.process.is_running() {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }

    pub fn uptime(&self) -> Duration {
        self.process.uptime()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Ask the daemon to check the config currently on disk.
    pub async fn check(&self) -> Result<String> {
        let path = self.config_path.to_string_lossy();
        self.process
            .validate_config(&path, self.check_timeout)
            .await
            .with_context(|| format!("sing-box check -c {}", path))
    }
}
