use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wgsingbox::common::ControlError;
use wgsingbox::config::{load_config, Config};
use wgsingbox::model::{load_state, InterfaceSettings, StateSnapshot};
use wgsingbox::singbox::{generator, LogBroadcaster, LogLayer, SingBoxManager};
use wgsingbox::status::StatusMonitor;
use wgsingbox::wireguard::{self, keys, RenderDefaults, WireGuardManager};

#[derive(Parser, Debug)]
#[command(name = "wgsingbox")]
#[command(about = "WireGuard + sing-box control plane", long_about = None)]
struct Cli {
    /// Control-plane config (YAML). Defaults apply when omitted.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a WireGuard key pair
    Genkey,
    /// Generate a preshared key
    Genpsk,
    /// Derive the public key of a base64 private key
    Pubkey { private_key: String },
    /// Print the server wg-quick config for a state snapshot
    RenderWg {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
    /// Print the config (or wg:// URI) a peer imports
    ClientConfig {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
        /// Peer public key or name
        peer: String,
        /// Server host clients connect to
        #[arg(short = 'e', long = "endpoint")]
        endpoint: Option<String>,
        #[arg(long)]
        uri: bool,
    },
    /// Print the sing-box JSON config for a state snapshot
    RenderSingbox {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
    /// Manage the WireGuard interface
    Wg {
        #[command(subcommand)]
        action: WgAction,
    },
    /// Write the sing-box config and have sing-box check it
    Check {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
    /// Apply both daemons and supervise them until Ctrl-C
    Run {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum WgAction {
    /// Write the interface config and bring it up
    Up {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
    Down,
    /// Rewrite the interface config and restart it
    Restart {
        #[arg(short = 's', long = "state")]
        state: PathBuf,
    },
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    let logs = LogBroadcaster::default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(LogLayer::new(logs.clone()))
        .init();

    if let Err(e) = dispatch(cli.command, &config, logs).await {
        let kind = ControlError::classify(&e);
        error!(code = kind.as_str(), retryable = kind.is_retryable(), "{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(command: Cmd, config: &Config, logs: LogBroadcaster) -> Result<()> {
    match command {
        Cmd::Genkey => {
            let pair = keys::generate_keypair();
            println!("private_key: {}", pair.private_key);
            println!("public_key: {}", pair.public_key);
        }
        Cmd::Genpsk => println!("{}", keys::generate_preshared_key()),
        Cmd::Pubkey { private_key } => {
            println!("{}", keys::public_key_from_private(&private_key)?);
        }
        Cmd::RenderWg { state } => {
            let state = load_state(&state)?;
            let settings = active_interface(&state)?;
            let defaults = RenderDefaults::new(
                config.wireguard.default_post_up.clone(),
                config.wireguard.default_post_down.clone(),
            );
            print!("{}", wireguard::render(&settings, &state.peers, &defaults));
        }
        Cmd::ClientConfig {
            state,
            peer,
            endpoint,
            uri,
        } => {
            let state = load_state(&state)?;
            let settings = active_interface(&state)?;
            let Some(peer) = state
                .peers
                .iter()
                .find(|p| p.public_key == peer || p.name == peer)
            else {
                bail!("no peer named or keyed '{}'", peer);
            };
            if uri {
                println!("{}", wireguard::render_uri(&settings, peer, endpoint.as_deref()));
            } else {
                print!("{}", wireguard::render_client_config(&settings, peer, endpoint.as_deref()));
            }
        }
        Cmd::RenderSingbox { state } => {
            let state = load_state(&state)?;
            println!(
                "{}",
                generator::render(
                    state.active_proxy(),
                    &state.rules,
                    state.singbox_template.as_deref()
                )
            );
        }
        Cmd::Wg { action } => wg_command(config, action).await?,
        Cmd::Check { state } => {
            let state = load_state(&state)?;
            let manager = SingBoxManager::new(&config.singbox, logs);
            manager
                .generate_and_write(
                    state.active_proxy(),
                    &state.rules,
                    state.singbox_template.as_deref(),
                )
                .await?;
            let output = manager.check().await?;
            print!("{}", output);
        }
        Cmd::Run { state } => run(config, load_state(&state)?, logs).await?,
    }
    Ok(())
}

/// Active interface with its public key derived when the snapshot omits it.
fn active_interface(state: &StateSnapshot) -> Result<InterfaceSettings> {
    let mut settings = state
        .active_interface()
        .cloned()
        .context("state has no interface settings")?;
    if settings.public_key.trim().is_empty() && !settings.private_key.trim().is_empty() {
        settings.public_key = keys::public_key_from_private(&settings.private_key)
            .context("deriving interface public key")?;
    }
    Ok(settings)
}

async fn wg_command(config: &Config, action: WgAction) -> Result<()> {
    let manager = WireGuardManager::new(&config.wireguard);
    match action {
        WgAction::Up { state } => {
            let state = load_state(&state)?;
            manager
                .setup_interface(&active_interface(&state)?, &state.peers)
                .await?;
            manager.start().await?;
        }
        WgAction::Down => manager.stop().await,
        WgAction::Restart { state } => {
            let state = load_state(&state)?;
            manager
                .setup_interface(&active_interface(&state)?, &state.peers)
                .await?;
            manager.restart().await?;
        }
        WgAction::Status => {
            let (status, live) = manager.detailed_status().await;
            // a fresh process has no recorded state, so only presence is meaningful here
            let present = manager
                .executor()
                .interface_exists(manager.interface_name())
                .await;
            let report = serde_json::json!({
                "interface": manager.interface_name(),
                "present": present,
                "status": status,
                "live": live,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn run(config: &Config, state: StateSnapshot, logs: LogBroadcaster) -> Result<()> {
    let wireguard = Arc::new(WireGuardManager::new(&config.wireguard));
    let singbox = Arc::new(SingBoxManager::new(&config.singbox, logs));

    wireguard
        .setup_interface(&active_interface(&state)?, &state.peers)
        .await?;
    wireguard.start().await?;
    if let Err(e) = singbox
        .start_with_template(
            state.active_proxy(),
            &state.rules,
            state.singbox_template.as_deref(),
        )
        .await
    {
        wireguard.stop().await;
        return Err(e);
    }

    let monitor = Arc::new(StatusMonitor::new(
        Arc::clone(&wireguard),
        Arc::clone(&singbox),
        config.status.poll_interval(),
    ));
    let mut updates = monitor.subscribe();
    let cancel = CancellationToken::new();
    let poller = monitor.spawn(cancel.clone());

    let mut last = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            update = updates.recv() => match update {
                Ok(status) => {
                    let current = (status.wireguard, status.singbox);
                    if last != Some(current) {
                        info!(
                            wireguard = %status.wireguard,
                            singbox = %status.singbox,
                            peers = status.connected_peers,
                            "service status changed"
                        );
                        last = Some(current);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "status updates lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    if let Err(e) = poller.await {
        warn!(error = %e, "status monitor ended abnormally");
    }
    singbox.stop().await;
    wireguard.stop().await;
    Ok(())
}
