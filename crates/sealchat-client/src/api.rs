//! The relay server as seen by a single signed-in user.

use async_trait::async_trait;

use sealchat_shared::deletion::DeleteRecord;
use sealchat_shared::protocol::{MessageEnvelope, PostDeleteResponse, PostSignalResponse};
use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{ChatId, MessageId, TimestampMillis, UserId};

use crate::error::Result;

/// Every call acts as the user the implementation was built for.
#[async_trait]
pub trait RelayApi: Send + Sync {
    fn user_id(&self) -> UserId;

    async fn create_chat(&self, name: &str, members: &[UserId]) -> Result<ChatId>;

    async fn publish_signing_key(&self, public_key_hex: &str) -> Result<()>;

    /// `None` when the user never published a key.
    async fn signing_key(&self, user_id: UserId) -> Result<Option<String>>;

    async fn post_message(
        &self,
        chat_id: ChatId,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<MessageEnvelope>;

    async fn list_messages(
        &self,
        chat_id: ChatId,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageEnvelope>>;

    async fn post_delete(&self, record: &DeleteRecord) -> Result<PostDeleteResponse>;

    /// Undelivered delete records; the server marks them delivered.
    async fn fetch_deletes(&self, chat_id: ChatId) -> Result<Vec<DeleteRecord>>;

    /// Every record the relay accepted after `since`, delivered or not.
    /// Nothing is marked delivered.
    async fn fetch_deletes_since(
        &self,
        chat_id: ChatId,
        since: TimestampMillis,
    ) -> Result<Vec<DeleteRecord>>;

    async fn post_signal(
        &self,
        chat_id: ChatId,
        to: Option<UserId>,
        signal: SignalBody,
    ) -> Result<PostSignalResponse>;

    async fn fetch_signals(&self, chat_id: ChatId) -> Result<Vec<SignalRecord>>;
}
