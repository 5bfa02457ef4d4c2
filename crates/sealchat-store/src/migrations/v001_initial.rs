//! v001 -- Initial schema creation.
//!
//! Creates `users`, `chats`, `chat_members`, `messages` and `device_keys`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (id comes from the identity provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY NOT NULL,   -- UUID
    signing_pubkey TEXT,                        -- hex Ed25519 public key, NULL until published
    created_at     INTEGER NOT NULL,            -- ms since epoch
    updated_at     INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Chats and membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    name       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id   TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    joined_at INTEGER NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages (ciphertext only; soft-tombstoned, never removed)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,             -- UUID v4
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    nonce      BLOB NOT NULL,
    marker     TEXT NOT NULL CHECK (marker IN ('text', 'deleted')),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_seq ON messages(chat_id, seq);

-- ----------------------------------------------------------------
-- Local device keys (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS device_keys (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    json       TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
