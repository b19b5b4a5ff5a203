//! Tambola Game Server
//!
//! Authoritative game server for Tambola.
//! Configured through `TAMBOLA_*` environment variables; logging through
//! `RUST_LOG`.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use tambola::{GameServer, ServerConfig};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let config = ServerConfig::from_env();
    info!("Tambola Server v{}", config.version);
    info!(
        "Draw interval: {:?} (min delay {:?})",
        config.cadence.interval, config.cadence.min_delay,
    );
    match &config.card_dir {
        Some(dir) => info!("Persisting cards under {}", dir.display()),
        None => info!("Cards kept in memory only"),
    }

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("game server failed")?;
    info!("Server stopped");
    Ok(())
}
