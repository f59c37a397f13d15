use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("`{command}` failed with exit code {}: {output}", fmt_code(.code))]
    Execution {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        // killed by a signal
        None => "none".to_string(),
    }
}

impl ControlError {
    /// Try to extract a ControlError from an anyhow::Error, or classify
    /// the underlying error heuristically (e.g. io::Error kinds).
    pub fn classify(err: &anyhow::Error) -> ControlErrorKind {
        if let Some(ce) = err.downcast_ref::<ControlError>() {
            return ce.kind();
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return match io_err.kind() {
                std::io::ErrorKind::TimedOut => ControlErrorKind::Timeout,
                std::io::ErrorKind::InvalidData => ControlErrorKind::Parse,
                _ => ControlErrorKind::Io,
            };
        }
        if err.downcast_ref::<serde_json::Error>().is_some() {
            return ControlErrorKind::Parse;
        }
        ControlErrorKind::Other
    }

    pub fn kind(&self) -> ControlErrorKind {
        match self {
            ControlError::Execution { .. } => ControlErrorKind::Execution,
            ControlError::Timeout { .. } => ControlErrorKind::Timeout,
            ControlError::Spawn { .. } => ControlErrorKind::Spawn,
            ControlError::Io(_) | ControlError::Write { .. } => ControlErrorKind::Io,
            ControlError::Parse(_) => ControlErrorKind::Parse,
            ControlError::Config(_) => ControlErrorKind::Config,
        }
    }

    /// Captured tool output, if the failure carries any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ControlError::Execution { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

/// Lightweight error category for pattern matching without borrowing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlErrorKind {
    Execution,
    Timeout,
    Spawn,
    Io,
    Parse,
    Config,
    Other,
}

impl ControlErrorKind {
    /// Whether the same call may succeed if simply repeated.
    pub fn is_retryable(self) -> bool {
        matches!(self, ControlErrorKind::Timeout | ControlErrorKind::Io)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlErrorKind::Execution => "EXEC_FAILED",
            ControlErrorKind::Timeout => "TIMEOUT",
            ControlErrorKind::Spawn => "SPAWN_FAILED",
            ControlErrorKind::Io => "IO",
            ControlErrorKind::Parse => "PARSE",
            ControlErrorKind::Config => "CONFIG",
            ControlErrorKind::Other => "OTHER",
        }
    }
}

impl From<ControlError> for std::io::Error {
    fn from(e: ControlError) -> Self {
        std::io::Error::other(e.to_string())
    }
}
