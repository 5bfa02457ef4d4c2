//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use sealchat_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_SIGNAL_POLL_INTERVAL_MS};
use sealchat_shared::types::UserId;
use sealchat_store::Database;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `SEALCHAT_SERVER_URL`
    pub server_url: String,
    /// Principal presented to the relay. Env: `SEALCHAT_USER_ID` (required)
    pub user_id: UserId,
    /// Env: `SEALCHAT_POLL_INTERVAL_MS`
    pub poll_interval: Duration,
    /// Local cache and key database. Env: `SEALCHAT_DB_PATH`; unset means
    /// the platform data directory.
    pub db_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            server_url: server_url.into(),
            user_id,
            poll_interval: Duration::from_millis(DEFAULT_SIGNAL_POLL_INTERVAL_MS),
            db_path: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let user_id = lookup("SEALCHAT_USER_ID")
            .ok_or_else(|| ClientError::Config("SEALCHAT_USER_ID is not set".into()))?
            .trim()
            .parse::<UserId>()
            .map_err(|e| ClientError::Config(format!("SEALCHAT_USER_ID is not a UUID: {e}")))?;

        let server_url = lookup("SEALCHAT_SERVER_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"));
        let mut config = Self::new(server_url.trim_end_matches('/'), user_id);

        if let Some(raw) = lookup("SEALCHAT_POLL_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(value = %raw, "Invalid SEALCHAT_POLL_INTERVAL_MS, using default"),
            }
        }

        if let Some(path) = lookup("SEALCHAT_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Open the local database at `db_path`, or the default location.
    pub fn open_database(&self) -> Result<Database> {
        let db = match &self.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_user_id_required() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("SEALCHAT_USER_ID", "alice")])),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let id = UserId::new();
        let id_str = id.to_string();

        let config = ClientConfig::from_lookup(lookup(&[("SEALCHAT_USER_ID", id_str.as_str())])).unwrap();
        assert_eq!(config.user_id, id);
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));

        let config = ClientConfig::from_lookup(lookup(&[
            ("SEALCHAT_USER_ID", id_str.as_str()),
            ("SEALCHAT_SERVER_URL", "https://relay.example/"),
            ("SEALCHAT_POLL_INTERVAL_MS", "250"),
            ("SEALCHAT_DB_PATH", "/tmp/c.db"),
        ]))
        .unwrap();
        assert_eq!(config.server_url, "https://relay.example");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/c.db")));
    }

    #[test]
    fn test_bad_interval_ignored() {
        let id = UserId::new().to_string();
        let config = ClientConfig::from_lookup(lookup(&[
            ("SEALCHAT_USER_ID", id.as_str()),
            ("SEALCHAT_POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_open_database_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::new("http://localhost", UserId::new());
        config.db_path = Some(dir.path().join("client.db"));

        let db = config.open_database().unwrap();
        assert!(db.path().is_some());
        assert!(dir.path().join("client.db").exists());
    }
}
