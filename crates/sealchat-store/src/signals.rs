//! Signaling mailbox: short-lived call-setup records, consumed on fetch.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{ChatId, TimestampMillis, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{id_col, opt_id_col, placeholders};

impl Database {
    pub fn insert_signal(&self, record: &SignalRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO signals
                 (id, chat_id, from_user, to_user, kind, body, created_at, expires_at, consumed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                record.id.to_string(),
                record.chat_id.to_string(),
                record.from.to_string(),
                record.to.map(|u| u.to_string()),
                record.body.kind().as_str(),
                record.body.to_json()?,
                record.created_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Return every unconsumed, unexpired record addressed to `user_id` in
    /// the chat (directly, or broadcast by someone else), oldest first, and
    /// mark them consumed within the same transaction.
    pub fn take_signals(
        &mut self,
        chat_id: &ChatId,
        user_id: &UserId,
        now: TimestampMillis,
    ) -> Result<Vec<SignalRecord>> {
        let tx = self.conn_mut().transaction()?;

        let mut records = {
            let mut stmt = tx.prepare(
                "SELECT id, chat_id, from_user, to_user, body, created_at, expires_at
                 FROM signals
                 WHERE chat_id = ?1
                   AND consumed = 0
                   AND expires_at > ?3
                   AND (to_user = ?2 OR (to_user IS NULL AND from_user != ?2))
                 ORDER BY created_at ASC, seq ASC",
            )?;
            let rows = stmt.query_map(
                params![chat_id.to_string(), user_id.to_string(), now],
                row_to_signal,
            )?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            records
        };

        if !records.is_empty() {
            let sql = format!(
                "UPDATE signals SET consumed = 1 WHERE id IN ({})",
                placeholders(records.len())
            );
            tx.execute(
                &sql,
                params_from_iter(records.iter().map(|r| Value::Text(r.id.to_string()))),
            )?;
            for record in &mut records {
                record.consumed = true;
            }
        }

        tx.commit()?;
        Ok(records)
    }

    /// Physically remove records whose expiry has passed. Returns how many.
    pub fn purge_expired_signals(&self, now: TimestampMillis) -> Result<usize> {
        let removed = self
            .conn()
            .execute("DELETE FROM signals WHERE expires_at <= ?1", params![now])?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired signals");
        }
        Ok(removed)
    }

    pub fn count_signals(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalRecord> {
    let body_json: String = row.get(4)?;
    let body = SignalBody::from_json(&body_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(SignalRecord {
        id: id_col(row, 0)?,
        chat_id: id_col(row, 1)?,
        from: id_col(row, 2)?,
        to: opt_id_col(row, 3)?,
        body,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        consumed: false,
    })
}
