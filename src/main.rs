//! Pierlink - Discord <-> IRC chat bridge
//!
//! Runs one or more bridges, each relaying messages between a set of
//! Discord channels and IRC channels through a mutator pipeline.

mod bridge;
mod command;
mod common;
mod config;
mod mutator;
mod pier;
mod stats;

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::signal;
use tracing::{error, info, info_span, warn};

use bridge::{Bridge, BridgeBuilder, ChannelMappingManager};
use config::{env::get_config_path, load_and_validate, BridgeConfig};
use pier::{DiscordPier, IrcPier};
use stats::JsonFileStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Pierlink v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let configs = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        error!("See pierlink.conf.example for reference.");
        e
    })?;

    info!("Configuration loaded: {} bridge(s)", configs.len());

    // ============================================================
    // Build and start every bridge
    // ============================================================
    let mut running = Vec::with_capacity(configs.len());

    for config in configs {
        // An invalid bridge is skipped; the others still run.
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                error!("Skipping bridge with invalid configuration:\n{}", e);
                continue;
            }
        };
        let name = config.name.clone();
        info!(
            "  {}: Discord <-> {}:{} ({} mapping(s))",
            name,
            config.irc.server,
            config.irc.port,
            config.channel_mappings.len()
        );

        let bridge = match build_bridge(config) {
            Ok(bridge) => bridge,
            Err(e) => {
                error!("Failed to set up bridge '{}': {}", name, e);
                continue;
            }
        };

        // A failed bridge is left stopped; the others keep running.
        match bridge.start().await {
            Ok(()) => {
                info!("Bridge '{}' is up", bridge.name());
                running.push(bridge);
            }
            Err(e) => error!("{}", e),
        }
    }

    if running.is_empty() {
        bail!("No bridge could be started");
    }

    info!("{} bridge(s) running", running.len());

    // ============================================================
    // Run until signalled
    // ============================================================
    shutdown_signal().await;
    info!("Shutdown signal received - stopping bridges...");

    futures::future::join_all(running.iter().map(|bridge| bridge.shutdown())).await;
    for bridge in &running {
        info!(
            "Bridge '{}' relayed {} message(s) in total",
            bridge.name(),
            bridge.statistics().snapshot().message_count
        );
    }

    info!("Exiting...");
    Ok(())
}

fn build_bridge(config: BridgeConfig) -> Result<Arc<Bridge>> {
    let irc_channels = ChannelMappingManager::new(&config.channel_mappings)?
        .irc_channels()
        .into_iter()
        .map(String::from)
        .collect();
    let irc = Arc::new(IrcPier::new(config.irc.clone(), irc_channels));
    let discord = Arc::new(DiscordPier::new(config.discord.clone()));
    let store = JsonFileStore::new(config.statistics_file.clone());
    let span = info_span!("bridge", name = %config.name);
    span.in_scope(|| info!("Statistics are kept in {}", store.path().display()));

    let bridge = BridgeBuilder::new(config)
        .pier(irc)
        .pier(discord)
        .store(store)
        .span(span)
        .build()?;
    Ok(bridge)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
