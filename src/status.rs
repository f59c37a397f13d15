//! 状态汇总：定时轮询两个守护进程的状态并广播快照。

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::ServiceStatus;
use crate::singbox::SingBoxManager;
use crate::wireguard::WireGuardManager;

/// One poll of both daemons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub wireguard: ServiceStatus,
    pub singbox: ServiceStatus,
    /// Peers with a recorded handshake.
    pub connected_peers: usize,
    pub total_rx: u64,
    pub total_tx: u64,
    pub singbox_uptime_secs: u64,
    pub singbox_pid: Option<u32>,
    /// Time since this monitor was created.
    pub uptime_secs: u64,
    /// Unix seconds.
    pub timestamp: u64,
}

pub struct StatusMonitor {
    wireguard: Arc<WireGuardManager>,
    singbox: Arc<SingBoxManager>,
    interval: Duration,
    started: Instant,
    tx: broadcast::Sender<SystemStatus>,
}

impl StatusMonitor {
    pub fn new(
        wireguard: Arc<WireGuardManager>,
        singbox: Arc<SingBoxManager>,
        interval: Duration,
    ) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            wireguard,
            singbox,
            interval,
            started: Instant::now(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemStatus> {
        self.tx.subscribe()
    }

    pub async fn snapshot(&self) -> SystemStatus {
        let (wireguard, live) = self.wireguard.detailed_status().await;
        let live = live.unwrap_or_default();
        SystemStatus {
            wireguard,
            singbox: self.singbox.status(),
            connected_peers: live.connected_peers(),
            total_rx: live.total_rx(),
            total_tx: live.total_tx(),
            singbox_uptime_secs: self.singbox.uptime().as_secs(),
            singbox_pid: self.singbox.pid(),
            uptime_secs: self.started.elapsed().as_secs(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Poll every `interval` until `cancel` fires. The first snapshot goes out immediately.
    pub fn spawn(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = this.snapshot().await;
                        debug!(
                            wireguard = %status.wireguard,
                            singbox = %status.singbox,
                            peers = status.connected_peers,
                            "status polled"
                        );
                        // 没有订阅者时发送失败是正常的
                        let _ = this.tx.send(status);
                    }
                }
            }
            debug!("status monitor stopped");
        })
    }
}
