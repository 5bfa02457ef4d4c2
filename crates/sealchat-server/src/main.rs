//! # sealchat-server
//!
//! Relay server for sealchat.
//!
//! This binary provides:
//! - **Ciphertext storage**: messages arrive already encrypted; the server
//!   never holds a key that could read them
//! - **Signed deletion**: delete requests are accepted only from the original
//!   sender with a valid signature, applied to the stored copy, and queued
//!   for every other member
//! - **Signaling relay**: a short-lived per-chat mailbox for call setup
//! - **REST API** (axum) with per-principal rate limiting

mod api;
mod auth;
mod config;
mod error;
mod rate_limit;
mod relay;

use std::time::Duration;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sealchat_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sealchat_server=debug")),
        )
        .init();

    info!("Starting sealchat relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and build shared state
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background maintenance
    // -----------------------------------------------------------------------
    spawn_maintenance(&app_state);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

const BUCKET_PURGE_INTERVAL: Duration = Duration::from_secs(300);
const BUCKET_MAX_IDLE: Duration = Duration::from_secs(600);

/// Evicts idle rate-limit buckets and expired signaling records.
fn spawn_maintenance(state: &AppState) {
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BUCKET_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = limiter.purge_stale(BUCKET_MAX_IDLE).await;
            if evicted > 0 {
                debug!(evicted, "Purged idle rate-limit buckets");
            }
        }
    });

    let relay = state.relay.clone();
    let mut interval = tokio::time::interval(state.config.signal_purge_interval);
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            if let Err(e) = relay.purge_expired().await {
                warn!(error = %e, "Signal purge failed");
            }
        }
    });
}
