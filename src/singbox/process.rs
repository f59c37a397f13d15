//! sing-box 子进程管理
//!
//! 同一时刻最多跟踪一个进程。stdout / stderr 由后台任务逐行转发到日志，
//! 该任务与进程同生命周期，`stop()` 时取消并回收。

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::{CommandRunner, ControlError, SystemRunner};
use crate::config::types::SingBoxConfig;

use super::log_stream::LogBroadcaster;

struct Tracked {
    child: Child,
    pid: Option<u32>,
    started: Instant,
    cancel: CancellationToken,
    drain: JoinHandle<()>,
}

pub struct SingBoxProcess {
    executable: String,
    grace: Duration,
    logs: LogBroadcaster,
    runner: Arc<dyn CommandRunner>,
    tracked: Mutex<Option<Tracked>>,
}

impl SingBoxProcess {
    pub fn new(config: &SingBoxConfig, logs: LogBroadcaster) -> Self {
        Self::with_runner(config, logs, Arc::new(SystemRunner))
    }

    /// `runner` is only used for `check`; `run` always spawns a real process.
    pub fn with_runner(
        config: &SingBoxConfig,
        logs: LogBroadcaster,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            executable: config.executable.clone(),
            grace: config.stop_grace(),
            logs,
            runner,
            tracked: Mutex::new(None),
        }
    }

    pub fn logs(&self) -> &LogBroadcaster {
        &self.logs
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Tracked>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn `sing-box run -c <config_path>`, replacing any tracked process.
    pub async fn start(&self, config_path: &str) -> Result<u32, ControlError> {
        self.stop().await;

        let mut child = Command::new(&self.executable)
            .args(["run", "-c", config_path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::Spawn {
                program: self.executable.clone(),
                source,
            })?;

        let pid = child.id();
        let cancel = CancellationToken::new();
        let out = child.stdout.take().map(|s| BufReader::new(s).lines());
        let err = child.stderr.take().map(|s| BufReader::new(s).lines());
        let drain = tokio::spawn(drain_output(out, err, self.logs.clone(), cancel.clone()));

        *self.slot() = Some(Tracked {
            child,
            pid,
            started: Instant::now(),
            cancel,
            drain,
        });
        info!(pid = ?pid, config = config_path, "sing-box process started");
        Ok(pid.unwrap_or_default())
    }

    /// Terminate the tracked process: SIGTERM, wait out the grace period, then kill.
    /// Always leaves nothing tracked.
    pub async fn stop(&self) {
        let Some(mut tracked) = self.slot().take() else {
            return;
        };

        if matches!(tracked.child.try_wait(), Ok(None)) {
            info!(pid = ?tracked.pid, "stopping sing-box process");
            if let Err(e) = request_termination(&mut tracked.child, tracked.pid) {
                warn!(pid = ?tracked.pid, error = %e, "failed to signal sing-box");
            }
            if tokio::time::timeout(self.grace, tracked.child.wait()).await.is_err() {
                warn!(pid = ?tracked.pid, grace_secs = self.grace.as_secs_f64(), "sing-box did not stop gracefully, killing");
                if let Err(e) = tracked.child.start_kill() {
                    warn!(pid = ?tracked.pid, error = %e, "failed to kill sing-box");
                }
                if tokio::time::timeout(self.grace, tracked.child.wait()).await.is_err() {
                    warn!(pid = ?tracked.pid, "sing-box still alive after kill");
                }
            }
            info!(pid = ?tracked.pid, "sing-box process stopped");
        }

        tracked.cancel.cancel();
        if let Err(e) = tracked.drain.await {
            debug!(error = %e, "log drain task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        match self.slot().as_mut() {
            Some(tracked) => matches!(tracked.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Wall clock time since start while running, zero otherwise.
    pub fn uptime(&self) -> Duration {
        match self.slot().as_mut() {
            Some(tracked) => {
                if matches!(tracked.child.try_wait(), Ok(None)) {
                    tracked.started.elapsed()
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot().as_ref().and_then(|t| t.pid)
    }

    /// `sing-box check -c <path>`: semantic validation by the daemon itself.
    pub async fn validate_config(&self, path: &str, timeout: Duration) -> Result<String, ControlError> {
        let output = self
            .runner
            .run(&self.executable, &["check", "-c", path], timeout)
            .await?;
        info!(config = path, "sing-box config is valid");
        Ok(output)
    }
}

#[cfg(target_os = "linux")]
fn request_termination(child: &mut Child, pid: Option<u32>) -> std::io::Result<()> {
    let Some(pid) = pid else {
        return child.start_kill();
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn request_termination(child: &mut Child, _pid: Option<u32>) -> std::io::Result<()> {
    child.start_kill()
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn drain_output<O, E>(
    mut out: Option<Lines<O>>,
    mut err: Option<Lines<E>>,
    logs: LogBroadcaster,
    cancel: CancellationToken,
) where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = next_line(&mut out), if out.is_some() => match line {
                Ok(Some(line)) => logs.forward_line(&line),
                Ok(None) => out = None,
                Err(e) => {
                    debug!(error = %e, "sing-box stdout closed");
                    out = None;
                }
            },
            line = next_line(&mut err), if err.is_some() => match line {
                Ok(Some(line)) => logs.forward_line(&line),
                Ok(None) => err = None,
                Err(e) => {
                    debug!(error = %e, "sing-box stderr closed");
                    err = None;
                }
            },
            else => break,
        }
    }
    debug!("sing-box log drain finished");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::singbox::log_stream::LogSource;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const FAKE: &str = r#"#!/bin/sh
case "$1" in
  check)
    if grep -q broken "$3"; then echo "FATAL decode config: broken" >&2; exit 1; fi
    echo "configuration ok"
    ;;
  run)
    echo "+0000 INFO sing-box started"
    echo "+0000 WARN using default dns" >&2
    trap 'exit 0' TERM
    while true; do sleep 0.05; done
    ;;
esac
"#;

    const STUBBORN: &str = "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 0.05; done\n";

    fn fake_binary(dir: &Path, body: &str) -> String {
        let path = dir.join("sing-box");
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn process(executable: String, grace_ms: u64) -> SingBoxProcess {
        let config = SingBoxConfig {
            executable,
            ..Default::default()
        };
        let mut p = SingBoxProcess::new(&config, LogBroadcaster::new(64));
        p.grace = Duration::from_millis(grace_ms);
        p
    }

    #[tokio::test]
    async fn start_drains_both_streams_and_stop_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let p = process(fake_binary(dir.path(), FAKE), 2000);
        let mut rx = p.logs().subscribe();

        assert!(!p.is_running());
        assert_eq!(p.uptime(), Duration::ZERO);

        let pid = p.start("/tmp/config.json").await.unwrap();
        assert!(pid > 0);
        assert_eq!(p.pid(), Some(pid));
        assert!(p.is_running());

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let entry = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.source, LogSource::SingBox);
            seen.push(entry.level);
        }
        seen.sort();
        assert_eq!(seen, vec!["info", "warning"]);
        assert!(p.uptime() > Duration::ZERO);

        p.stop().await;
        assert!(!p.is_running());
        assert_eq!(p.pid(), None);
        assert_eq!(p.uptime(), Duration::ZERO);
    }

    #[tokio::test]
    async fn start_replaces_previous_process() {
        let dir = tempfile::tempdir().unwrap();
        let p = process(fake_binary(dir.path(), FAKE), 2000);

        let first = p.start("/tmp/a.json").await.unwrap();
        let second = p.start("/tmp/b.json").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(p.pid(), Some(second));
        p.stop().await;
    }

    #[tokio::test]
    async fn stubborn_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let p = process(fake_binary(dir.path(), STUBBORN), 200);

        p.start("/tmp/config.json").await.unwrap();
        let started = Instant::now();
        p.stop().await;
        assert!(!p.is_running());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stop_without_process_is_noop() {
        let p = process("/nonexistent/sing-box".into(), 100);
        p.stop().await;
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let p = process("/nonexistent/sing-box".into(), 100);
        let err = p.start("/tmp/config.json").await.unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn check_reports_daemon_output() {
        let dir = tempfile::tempdir().unwrap();
        let p = process(fake_binary(dir.path(), FAKE), 100);

        let good = dir.path().join("good.json");
        std::fs::write(&good, "{}").unwrap();
        let out = p
            .validate_config(good.to_str().unwrap(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.contains("configuration ok"));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "broken").unwrap();
        let err = p
            .validate_config(bad.to_str().unwrap(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.output().map(str::trim), Some("FATAL decode config: broken"));
    }
}
