//! Record types persisted in SQLite, plus the row-decoding helpers shared by
//! the CRUD modules.
//!
//! Delete and signal records reuse the protocol types from
//! `sealchat-shared` directly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sealchat_shared::protocol::MessageEnvelope;
use sealchat_shared::types::{ChatId, ContentMarker, MessageId, TimestampMillis, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user and, once published, their public signing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Hex Ed25519 public key.
    pub signing_pubkey: Option<String>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    pub created_at: TimestampMillis,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Content is only ever ciphertext; a tombstoned
/// message has empty ciphertext and nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub marker: ContentMarker,
    pub created_at: TimestampMillis,
}

impl From<Message> for MessageEnvelope {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            ciphertext: m.ciphertext,
            nonce: m.nonce,
            marker: m.marker,
            created_at: m.created_at,
        }
    }
}

impl From<MessageEnvelope> for Message {
    fn from(e: MessageEnvelope) -> Self {
        Self {
            id: e.id,
            chat_id: e.chat_id,
            sender_id: e.sender_id,
            ciphertext: e.ciphertext,
            nonce: e.nonce,
            marker: e.marker,
            created_at: e.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Delete record queries
// ---------------------------------------------------------------------------

/// Which delete records to list for a chat, as seen by one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFilter {
    /// Records the recipient has not fetched yet.
    Undelivered,
    /// Every record created strictly after the timestamp.
    CreatedAfter(TimestampMillis),
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Read a UUID-backed id from a TEXT column.
pub(crate) fn id_col<T: From<Uuid>>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map(T::from).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_id_col<T: From<Uuid>>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map(T::from))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown content marker '{0}'")]
struct UnknownMarker(String);

pub(crate) fn marker_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<ContentMarker> {
    let s: String = row.get(idx)?;
    ContentMarker::from_str_opt(&s).ok_or_else(|| conversion_error(idx, UnknownMarker(s)))
}

/// Build a `?, ?, ...` placeholder list for `IN (...)` clauses.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn read_marker(raw: &str) -> rusqlite::Result<ContentMarker> {
        let conn = Connection::open_in_memory().unwrap();
        conn.query_row("SELECT ?1", [raw], |row| marker_col(row, 0))
    }

    #[test]
    fn test_marker_column() {
        assert_eq!(read_marker("deleted").unwrap(), ContentMarker::Deleted);

        let err = read_marker("shredded").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(0, _, _)));
        assert!(err.to_string().contains("unknown content marker 'shredded'"));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
