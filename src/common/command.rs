//! 子进程执行抽象
//!
//! 所有外部工具（wg / wg-quick / sing-box check）都通过 [`CommandRunner`] 调用，
//! 每次调用都带超时；超时后子进程被杀掉并返回 [`ControlError::Timeout`]。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::ControlError;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` to completion and return its combined output.
    ///
    /// A non-zero exit is `ControlError::Execution`, an exceeded bound is
    /// `ControlError::Timeout`.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> Result<String, ControlError>;
}

/// Runs commands as real OS subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, ControlError> {
        let command = describe(program, args);
        debug!(command = command.as_str(), "running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // dropping the wait future drops the child, kill_on_drop reaps it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    command = command.as_str(),
                    timeout_secs = timeout.as_secs_f64(),
                    "command timed out, killed"
                );
                return Err(ControlError::Timeout { command, timeout });
            }
        };

        let combined = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            Ok(combined)
        } else {
            warn!(
                command = command.as_str(),
                code = ?output.status.code(),
                output = combined.trim(),
                "command failed"
            );
            Err(ControlError::Execution {
                command,
                code: output.status.code(),
                output: combined,
            })
        }
    }
}

/// Human readable command line for logs and errors.
pub fn describe(program: &str, args: &[&str]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&String::from_utf8_lossy(stderr));
    }
    out
}
