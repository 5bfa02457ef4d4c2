//! Device key persistence in the single-row `device_keys` table.

use rusqlite::{params, OptionalExtension};

use sealchat_shared::error::KeyError;
use sealchat_shared::keys::{KeyStore, StoredKeySet};
use sealchat_shared::types::now_millis;

use crate::database::Database;

fn storage_err(e: impl std::fmt::Display) -> KeyError {
    KeyError::Storage(e.to_string())
}

impl KeyStore for Database {
    fn load(&self) -> Result<Option<StoredKeySet>, KeyError> {
        let json: Option<String> = self
            .conn()
            .query_row("SELECT json FROM device_keys WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_err)?;

        json.map(|j| {
            serde_json::from_str(&j)
                .map_err(|e| KeyError::Format(format!("stored key set is unreadable: {e}")))
        })
        .transpose()
    }

    /// One statement, so a failure leaves the previous row untouched.
    fn replace(&self, keys: &StoredKeySet) -> Result<(), KeyError> {
        let json = serde_json::to_string(keys).map_err(storage_err)?;
        self.conn()
            .execute(
                "INSERT INTO device_keys (id, json, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                     json = excluded.json,
                     updated_at = excluded.updated_at",
                params![json, now_millis()],
            )
            .map_err(storage_err)?;
        Ok(())
    }
}
