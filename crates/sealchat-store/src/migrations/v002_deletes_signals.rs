use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Signed delete requests, kept for audit and replay detection
CREATE TABLE IF NOT EXISTS delete_records (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,         -- UUID v4
    message_id   TEXT NOT NULL,
    chat_id      TEXT NOT NULL,
    requester_id TEXT NOT NULL,
    signature    BLOB NOT NULL,                -- 64-byte Ed25519 signature
    timestamp    INTEGER NOT NULL,             -- signed logical timestamp, ms
    created_at   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_delete_records_chat ON delete_records(chat_id, created_at, seq);

-- One row per (record, recipient) once the recipient has fetched it
CREATE TABLE IF NOT EXISTS delete_receipts (
    delete_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    delivered_at INTEGER NOT NULL,

    PRIMARY KEY (delete_id, recipient_id),
    FOREIGN KEY (delete_id) REFERENCES delete_records(id) ON DELETE CASCADE
);

-- Call-setup mailbox
CREATE TABLE IF NOT EXISTS signals (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,           -- UUID v4
    chat_id    TEXT NOT NULL,
    from_user  TEXT NOT NULL,
    to_user    TEXT,                           -- NULL = every other member
    kind       TEXT NOT NULL,                  -- offer / answer / ice-candidate
    body       TEXT NOT NULL,                  -- JSON SignalBody
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    consumed   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_signals_mailbox ON signals(chat_id, to_user, consumed, expires_at);
CREATE INDEX IF NOT EXISTS idx_signals_expiry ON signals(expires_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
