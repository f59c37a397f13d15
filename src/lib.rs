//! WireGuard + sing-box 控制面核心
//!
//! 把管理层给出的声明式状态渲染成 wg-quick `.conf` 与 sing-box JSON，
//! 托管两个守护进程的启停，并把外部工具的文本状态解析回结构化数据。

pub mod common;
pub mod config;
pub mod model;
pub mod singbox;
pub mod status;
pub mod wireguard;
