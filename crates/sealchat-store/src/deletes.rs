//! Signed delete records and their per-recipient delivery receipts.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use sealchat_shared::deletion::DeleteRecord;
use sealchat_shared::types::{now_millis, ChatId, DeleteId, TimestampMillis, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{id_col, placeholders, DeleteFilter};

impl Database {
    /// Persist a delete record. Validation happens before this call.
    pub fn insert_delete_record(&self, record: &DeleteRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO delete_records
                 (id, message_id, chat_id, requester_id, signature, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.message_id.to_string(),
                record.chat_id.to_string(),
                record.requester_id.to_string(),
                record.signature,
                record.timestamp,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    /// Keep a record fetched from the relay, stamped with the relay's
    /// acceptance time. Returns `false` if it was already queued.
    pub fn queue_delete_record(&self, record: &DeleteRecord) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO delete_records
                 (id, message_id, chat_id, requester_id, signature, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.message_id.to_string(),
                record.chat_id.to_string(),
                record.requester_id.to_string(),
                record.signature,
                record.timestamp,
                record.received_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Newest acceptance time among the chat's records, if any.
    pub fn latest_delete_received_at(&self, chat_id: &ChatId) -> Result<Option<TimestampMillis>> {
        Ok(self.conn().query_row(
            "SELECT MAX(created_at) FROM delete_records WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Delete records of a chat in creation order, with `delivered` set from
    /// the recipient's point of view.
    pub fn list_deletes(
        &self,
        chat_id: &ChatId,
        recipient: &UserId,
        filter: DeleteFilter,
    ) -> Result<Vec<DeleteRecord>> {
        list_deletes_on(self.conn(), chat_id, recipient, filter)
    }

    /// Record that `recipient` has received the given delete records.
    pub fn mark_deletes_delivered(&self, ids: &[DeleteId], recipient: &UserId) -> Result<usize> {
        mark_delivered_on(self.conn(), ids, recipient)
    }

    /// Fetch the recipient's undelivered records and mark them delivered in
    /// one transaction, so concurrent polls never see the same record twice.
    pub fn take_undelivered_deletes(
        &mut self,
        chat_id: &ChatId,
        recipient: &UserId,
    ) -> Result<Vec<DeleteRecord>> {
        let tx = self.conn_mut().transaction()?;
        let records = list_deletes_on(&tx, chat_id, recipient, DeleteFilter::Undelivered)?;
        let ids: Vec<DeleteId> = records.iter().map(|r| r.id).collect();
        mark_delivered_on(&tx, &ids, recipient)?;
        tx.commit()?;
        Ok(records)
    }
}

fn list_deletes_on(
    conn: &Connection,
    chat_id: &ChatId,
    recipient: &UserId,
    filter: DeleteFilter,
) -> Result<Vec<DeleteRecord>> {
    let (condition, since) = match filter {
        DeleteFilter::Undelivered => ("r.recipient_id IS NULL", i64::MIN),
        DeleteFilter::CreatedAfter(ts) => ("d.created_at > ?3", ts),
    };

    let sql = format!(
        "SELECT d.id, d.message_id, d.chat_id, d.requester_id, d.signature, d.timestamp,
                r.recipient_id IS NOT NULL, d.created_at
         FROM delete_records d
         LEFT JOIN delete_receipts r
                ON r.delete_id = d.id AND r.recipient_id = ?2
         WHERE d.chat_id = ?1 AND {condition}
         ORDER BY d.created_at ASC, d.seq ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(DeleteRecord {
            id: id_col(row, 0)?,
            message_id: id_col(row, 1)?,
            chat_id: id_col(row, 2)?,
            requester_id: id_col(row, 3)?,
            signature: row.get(4)?,
            timestamp: row.get(5)?,
            delivered: row.get(6)?,
            received_at: row.get(7)?,
        })
    };

    let rows = match filter {
        DeleteFilter::Undelivered => {
            stmt.query_map(params![chat_id.to_string(), recipient.to_string()], map_row)?
        }
        DeleteFilter::CreatedAfter(_) => stmt.query_map(
            params![chat_id.to_string(), recipient.to_string(), since],
            map_row,
        )?,
    };

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn mark_delivered_on(conn: &Connection, ids: &[DeleteId], recipient: &UserId) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let now = now_millis();
    let sql = format!(
        "INSERT OR IGNORE INTO delete_receipts (delete_id, recipient_id, delivered_at)
         SELECT id, ?, ? FROM delete_records WHERE id IN ({})",
        placeholders(ids.len())
    );

    let mut values = vec![Value::Text(recipient.to_string()), Value::Integer(now)];
    values.extend(ids.iter().map(|id| Value::Text(id.to_string())));

    Ok(conn.execute(&sql, params_from_iter(values))?)
}
