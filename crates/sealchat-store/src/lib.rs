//! # sealchat-store
//!
//! Persistent record storage for sealchat, backed by SQLite.
//!
//! The same schema serves both sides: the relay server keeps users, chat
//! membership, ciphertext, delete records and signaling mailboxes; a client
//! keeps its local message cache and its device keys. Message content is
//! only ever stored as ciphertext. The crate exposes a synchronous
//! `Database` handle that wraps a `rusqlite::Connection` and provides typed
//! helpers for every record type.

pub mod chats;
pub mod database;
pub mod deletes;
pub mod keys;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod signals;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
