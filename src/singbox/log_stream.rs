//! sing-box 日志转发
//!
//! 子进程输出的每一行按其级别重新发到 tracing（target `sing-box`），
//! 同时推送到 broadcast channel 供日志流订阅者使用。

use std::fmt::{self, Write};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// 日志条目
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub level: String,
    pub source: LogSource,
    pub payload: String,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogSource {
    SingBox,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LineLevel {
    /// Level of a daemon output line, taken from the first level keyword in it.
    pub fn infer(line: &str) -> Self {
        for token in line.split_whitespace().take(6) {
            let token = token.trim_matches(|c: char| c == '[' || c == ']' || c == ':');
            match token.to_ascii_uppercase().as_str() {
                "ERROR" | "FATAL" | "PANIC" => return LineLevel::Error,
                "WARN" | "WARNING" => return LineLevel::Warn,
                "INFO" => return LineLevel::Info,
                "DEBUG" | "TRACE" => return LineLevel::Debug,
                _ => {}
            }
        }
        LineLevel::Info
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineLevel::Error => "error",
            LineLevel::Warn => "warning",
            LineLevel::Info => "info",
            LineLevel::Debug => "debug",
        }
    }
}

/// 日志广播器
#[derive(Clone)]
pub struct LogBroadcaster {
    tx: broadcast::Sender<LogEntry>,
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn publish(&self, entry: LogEntry) {
        // 没有订阅者时发送失败是正常的
        let _ = self.tx.send(entry);
    }

    /// Log one daemon output line and publish it.
    pub fn forward_line(&self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        let level = LineLevel::infer(line);
        match level {
            LineLevel::Error => tracing::error!(target: "sing-box", "{}", line),
            LineLevel::Warn => tracing::warn!(target: "sing-box", "{}", line),
            LineLevel::Info => tracing::info!(target: "sing-box", "{}", line),
            LineLevel::Debug => tracing::debug!(target: "sing-box", "{}", line),
        }
        self.publish(LogEntry {
            level: level.as_str().to_string(),
            source: LogSource::SingBox,
            payload: line.to_string(),
        });
    }
}

/// tracing Layer，把控制面自身的日志事件也推送到广播器。
///
/// `sing-box` target 的事件已由 [`LogBroadcaster::forward_line`] 推送过，这里跳过。
pub struct LogLayer {
    broadcaster: LogBroadcaster,
}

impl LogLayer {
    pub fn new(broadcaster: LogBroadcaster) -> Self {
        Self { broadcaster }
    }
}

/// Renders an event as `message key=value ...`.
#[derive(Default)]
struct Payload(String);

impl Payload {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if field.name() == "message" {
            self.0.insert_str(0, &value.to_string());
        } else {
            let _ = write!(self.0, " {}={}", field.name(), value);
        }
    }
}

impl Visit for Payload {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, format_args!("{}", value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format_args!("{:?}", value));
    }
}

impl From<tracing::Level> for LineLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => LineLevel::Error,
            tracing::Level::WARN => LineLevel::Warn,
            tracing::Level::INFO => LineLevel::Info,
            _ => LineLevel::Debug,
        }
    }
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target() == "sing-box" {
            return;
        }
        let mut payload = Payload::default();
        event.record(&mut payload);
        self.broadcaster.publish(LogEntry {
            level: LineLevel::from(*meta.level()).as_str().to_string(),
            source: LogSource::Control,
            payload: payload.0,
        });
    }
}
