//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sealchat_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_SIGNAL_TTL_SECS, MAX_SIGNAL_TTL_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: unset, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Lifetime of a signaling record.
    /// Env: `SIGNAL_TTL_SECS`
    /// Default: `30`, capped at `MAX_SIGNAL_TTL_SECS`
    pub signal_ttl: Duration,

    /// How often the background task removes expired signaling records.
    /// Env: `SIGNAL_PURGE_INTERVAL_SECS`
    /// Default: `60`
    pub signal_purge_interval: Duration,

    /// Sustained requests per second per principal.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Token bucket capacity per principal.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Largest accepted request body.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 2 MiB, room for a 1 MiB plaintext after base64.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            signal_ttl: Duration::from_secs(DEFAULT_SIGNAL_TTL_SECS),
            signal_purge_interval: Duration::from_secs(60),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "SIGNAL_TTL_SECS") {
            if secs == 0 {
                tracing::warn!("SIGNAL_TTL_SECS must be positive, using default");
            } else if secs > MAX_SIGNAL_TTL_SECS {
                tracing::warn!(secs, max = MAX_SIGNAL_TTL_SECS, "SIGNAL_TTL_SECS too large, capping");
                config.signal_ttl = Duration::from_secs(MAX_SIGNAL_TTL_SECS);
            } else {
                config.signal_ttl = Duration::from_secs(secs);
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "SIGNAL_PURGE_INTERVAL_SECS") {
            if secs == 0 {
                tracing::warn!("SIGNAL_PURGE_INTERVAL_SECS must be positive, using default");
            } else {
                config.signal_purge_interval = Duration::from_secs(secs);
            }
        }

        if let Some(rate) = parse_var::<f64>(&lookup, "RATE_LIMIT_PER_SEC") {
            config.rate_limit_per_sec = rate;
        }

        if let Some(burst) = parse_var::<f64>(&lookup, "RATE_LIMIT_BURST") {
            config.rate_limit_burst = burst;
        }

        if let Some(bytes) = parse_var(&lookup, "MAX_BODY_BYTES") {
            config.max_body_bytes = bytes;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
