//! Users and their published signing keys.

use rusqlite::{params, OptionalExtension};

use sealchat_shared::types::{now_millis, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{id_col, User};

impl Database {
    /// Make sure a user row exists. Safe to call repeatedly.
    pub fn ensure_user(&self, id: &UserId) -> Result<()> {
        let now = now_millis();
        self.conn().execute(
            "INSERT OR IGNORE INTO users (id, signing_pubkey, created_at, updated_at)
             VALUES (?1, NULL, ?2, ?2)",
            params![id.to_string(), now],
        )?;
        Ok(())
    }

    /// Publish (or replace) a user's hex-encoded public signing key.
    pub fn set_signing_key(&self, id: &UserId, pubkey_hex: &str) -> Result<()> {
        let now = now_millis();
        self.conn().execute(
            "INSERT INTO users (id, signing_pubkey, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET signing_pubkey = excluded.signing_pubkey,
                                           updated_at = excluded.updated_at",
            params![id.to_string(), pubkey_hex, now],
        )?;
        tracing::debug!(user = %id, "signing key published");
        Ok(())
    }

    /// The user's published key, or `None` if they never published one.
    pub fn get_signing_key(&self, id: &UserId) -> Result<Option<String>> {
        let key: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT signing_pubkey FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key.flatten())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, signing_pubkey, created_at, updated_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(User {
                        id: id_col(row, 0)?,
                        signing_pubkey: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}
