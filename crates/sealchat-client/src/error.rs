use thiserror::Error;

use sealchat_shared::error::{CryptoError, DeletionError, KeyError, RelayError};
use sealchat_shared::types::ChatId;
use sealchat_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Deletion(#[from] DeletionError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("No key registered for chat {0}")]
    MissingChatKey(ChatId),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Call has ended")]
    CallEnded,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
