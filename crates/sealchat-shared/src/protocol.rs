//! JSON bodies exchanged between clients and the relay server.
//!
//! Binary fields travel as standard base64 strings.

use serde::{Deserialize, Serialize};

use crate::deletion::ApplyOutcome;
use crate::signal::SignalBody;
use crate::types::{ChatId, ContentMarker, DeleteId, MessageId, SignalId, TimestampMillis, UserId};

/// Serde adapter for `Vec<u8>` as base64 text.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub name: String,
    /// Other members; the caller is always added.
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishKeyRequest {
    /// Hex Ed25519 public key
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyResponse {
    pub user_id: UserId,
    pub public_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
}

/// A stored message as the server returns it. Only ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub marker: ContentMarker,
    pub created_at: TimestampMillis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMessagesQuery {
    /// Return messages created after this one.
    pub after: Option<MessageId>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDeleteRequest {
    pub message_id: MessageId,
    pub timestamp: TimestampMillis,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDeleteResponse {
    pub id: DeleteId,
    /// Result of applying the request to the server's own copy.
    pub outcome: ApplyOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDeletesQuery {
    /// Replay every record created after this timestamp instead of the
    /// undelivered queue. Replays do not mark anything delivered.
    pub since: Option<TimestampMillis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSignalRequest {
    #[serde(default)]
    pub to: Option<UserId>,
    pub signal: SignalBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSignalResponse {
    pub id: SignalId,
    pub expires_at: TimestampMillis,
}

/// Machine-readable reason sent next to the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    AccessDenied,
    SignatureInvalid,
    NotFound,
    BadRequest,
    Internal,
}

/// Body of every error response the relay produces itself. Rejections
/// raised by the HTTP framework carry no `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}
