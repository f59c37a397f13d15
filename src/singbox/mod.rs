//! sing-box 控制面：配置生成、进程托管、日志转发与生命周期。

pub mod generator;
pub mod log_stream;
pub mod manager;
pub mod process;
pub mod template;

pub use log_stream::{LogBroadcaster, LogEntry, LogLayer};
pub use manager::SingBoxManager;
pub use process::SingBoxProcess;
