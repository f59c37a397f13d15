//! WireGuard 控制面：配置渲染、wg / wg-quick 调用、状态解析与生命周期。

pub mod executor;
pub mod keys;
pub mod manager;
pub mod render;
pub mod status;

pub use executor::{InterfaceAction, WireGuardExecutor};
pub use manager::WireGuardManager;
pub use render::{render, render_client_config, render_uri, RenderDefaults};
pub use status::{merge_peer_stats, parse_wg_show, PeerStats, WireGuardStatus};
