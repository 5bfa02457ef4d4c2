use rusqlite::{params, OptionalExtension};

use sealchat_shared::deletion::{MessageStatus, MessageStore};
use sealchat_shared::types::{now_millis, ChatId, ContentMarker, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{id_col, marker_col, Message};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, ciphertext, nonce, marker, created_at";

/// Upper bound on a single page of messages.
pub const MAX_PAGE_SIZE: u32 = 500;

impl Database {
    /// Store a freshly sent message and return it with its new id.
    pub fn create_message(
        &self,
        chat_id: &ChatId,
        sender_id: &UserId,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            chat_id: *chat_id,
            sender_id: *sender_id,
            ciphertext: ciphertext.to_vec(),
            nonce: nonce.to_vec(),
            marker: ContentMarker::Text,
            created_at: now_millis(),
        };
        self.insert_message(&message)?;
        Ok(message)
    }

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, ciphertext, nonce, marker, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.ciphertext,
                message.nonce,
                message.marker.as_str(),
                message.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a message received from elsewhere, or refresh a cached copy.
    /// A cached tombstone is never brought back to life.
    pub fn cache_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, ciphertext, nonce, marker, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 ciphertext = excluded.ciphertext,
                 nonce      = excluded.nonce,
                 marker     = excluded.marker
             WHERE messages.marker = 'text'",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.ciphertext,
                message.nonce,
                message.marker.as_str(),
                message.created_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite content fields of a message. Returns `false` if no such id.
    pub fn update_message(
        &self,
        id: &MessageId,
        ciphertext: &[u8],
        nonce: &[u8],
        marker: ContentMarker,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET ciphertext = ?2, nonce = ?3, marker = ?4 WHERE id = ?1",
            params![id.to_string(), ciphertext, nonce, marker.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.find_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .optional()?)
    }

    /// Messages of a chat in creation order. With `after`, the page starts
    /// right after that message; an unknown cursor yields an empty page.
    pub fn list_messages(
        &self,
        chat_id: &ChatId,
        after: Option<&MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let cursor: (i64, i64) = match after {
            None => (i64::MIN, 0),
            Some(cursor) => {
                let found: Option<(i64, i64)> = self
                    .conn()
                    .query_row(
                        "SELECT created_at, seq FROM messages WHERE id = ?1 AND chat_id = ?2",
                        params![cursor.to_string(), chat_id.to_string()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                match found {
                    Some(position) => position,
                    None => return Ok(Vec::new()),
                }
            }
        };

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1 AND (created_at, seq) > (?2, ?3)
             ORDER BY created_at ASC, seq ASC
             LIMIT ?4"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![chat_id.to_string(), cursor.0, cursor.1, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

impl MessageStore for Database {
    type Error = StoreError;

    fn message_status(&self, id: &MessageId) -> Result<Option<MessageStatus>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT chat_id, sender_id, marker FROM messages WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(MessageStatus {
                        chat_id: id_col(row, 0)?,
                        sender_id: id_col(row, 1)?,
                        marker: marker_col(row, 2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Single conditional UPDATE: only an active row is tombstoned, so two
    /// racing applies cannot both succeed.
    fn tombstone(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET ciphertext = X'', nonce = X'', marker = 'deleted'
             WHERE id = ?1 AND marker = 'text'",
            params![id.to_string()],
        )?;
        Ok(affected == 1)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: id_col(row, 0)?,
        chat_id: id_col(row, 1)?,
        sender_id: id_col(row, 2)?,
        ciphertext: row.get(3)?,
        nonce: row.get(4)?,
        marker: marker_col(row, 5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(n: usize) -> (Database, ChatId, UserId, Vec<Message>) {
        let db = Database::open_in_memory().unwrap();
        let chat = ChatId::new();
        let sender = UserId::new();
        let messages = (0..n)
            .map(|i| db.create_message(&chat, &sender, &[i as u8; 4], &[0; 12]).unwrap())
            .collect();
        (db, chat, sender, messages)
    }

    #[test]
    fn create_and_find() {
        let (db, chat, sender, messages) = seeded(1);
        let found = db.get_message(&messages[0].id).unwrap();
        assert_eq!(found, messages[0]);
        assert_eq!(found.chat_id, chat);
        assert_eq!(found.sender_id, sender);
        assert!(db.find_message(&MessageId::new()).unwrap().is_none());
        assert!(matches!(db.get_message(&MessageId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn list_paginates_by_cursor() {
        let (db, chat, _, messages) = seeded(5);

        let first = db.list_messages(&chat, None, 2).unwrap();
        assert_eq!(first.iter().map(|m| m.id).collect::<Vec<_>>(), vec![messages[0].id, messages[1].id]);

        let next = db.list_messages(&chat, Some(&first[1].id), 10).unwrap();
        assert_eq!(next.len(), 3);
        assert_eq!(next[0].id, messages[2].id);
        assert_eq!(next[2].id, messages[4].id);

        assert!(db.list_messages(&chat, Some(&MessageId::new()), 10).unwrap().is_empty());
        assert!(db.list_messages(&ChatId::new(), None, 10).unwrap().is_empty());
    }

    #[test]
    fn update_by_id() {
        let (db, _, _, messages) = seeded(1);
        assert!(db
            .update_message(&messages[0].id, b"new", &[1; 12], ContentMarker::Text)
            .unwrap());
        assert_eq!(db.get_message(&messages[0].id).unwrap().ciphertext, b"new");
        assert!(!db
            .update_message(&MessageId::new(), b"x", &[], ContentMarker::Text)
            .unwrap());
    }

    #[test]
    fn tombstone_clears_content_once() {
        let (db, chat, sender, messages) = seeded(1);
        let id = messages[0].id;

        let status = db.message_status(&id).unwrap().unwrap();
        assert_eq!(status, MessageStatus { chat_id: chat, sender_id: sender, marker: ContentMarker::Text });

        assert!(db.tombstone(&id).unwrap());
        assert!(!db.tombstone(&id).unwrap());

        let m = db.get_message(&id).unwrap();
        assert_eq!(m.marker, ContentMarker::Deleted);
        assert!(m.ciphertext.is_empty());
        assert!(m.nonce.is_empty());
    }

    #[test]
    fn cache_never_resurrects_tombstone() {
        let (db, _, _, messages) = seeded(1);
        let original = messages[0].clone();
        db.tombstone(&original.id).unwrap();

        db.cache_message(&original).unwrap();
        assert_eq!(db.get_message(&original.id).unwrap().marker, ContentMarker::Deleted);
    }

    #[test]
    fn cache_inserts_and_refreshes() {
        let db = Database::open_in_memory().unwrap();
        let mut m = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            ciphertext: vec![1],
            nonce: vec![2; 12],
            marker: ContentMarker::Text,
            created_at: 10,
        };
        db.cache_message(&m).unwrap();

        m.ciphertext.clear();
        m.nonce.clear();
        m.marker = ContentMarker::Deleted;
        db.cache_message(&m).unwrap();

        assert_eq!(db.get_message(&m.id).unwrap(), m);
    }
}
