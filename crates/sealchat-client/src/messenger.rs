//! End-to-end encrypted messaging and signed deletion on top of a relay.
//!
//! The relay only ever sees ciphertext. Each message is cached locally as
//! received; a local tombstone is never overwritten by a later fetch.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use sealchat_shared::constants::PUBKEY_SIZE;
use sealchat_shared::crypto::{decrypt_text, encrypt, MessageKey};
use sealchat_shared::deletion::{
    apply_if_valid, authorize_requester, create_delete_request, verify_delete_request,
    ApplyOutcome, DeleteRecord, MessageStore,
};
use sealchat_shared::identity::parse_public_key;
use sealchat_shared::keys::{DeviceKeySet, KeyManager};
use sealchat_shared::protocol::PostDeleteResponse;
use sealchat_shared::types::{ChatId, DeleteId, MessageId, TimestampMillis, UserId};
use sealchat_store::{Database, DeleteFilter, Message};

use crate::api::RelayApi;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Deleted,
    Undecryptable,
}

impl MessageContent {
    /// What a UI shows in place of the message body.
    pub fn display_text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Deleted => "message deleted",
            MessageContent::Undecryptable => "unable to decrypt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub created_at: TimestampMillis,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied(ApplyOutcome),
    /// Processing failed; the record stays queued for the next sync.
    Deferred(String),
}

/// Result of processing one queued delete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedDelete {
    pub delete_id: DeleteId,
    pub message_id: MessageId,
    pub outcome: SyncOutcome,
}

pub struct Messenger<R: RelayApi> {
    api: R,
    store: Mutex<Database>,
    keys: DeviceKeySet,
    chat_keys: Mutex<HashMap<ChatId, MessageKey>>,
    signing_keys: Mutex<HashMap<UserId, [u8; PUBKEY_SIZE]>>,
    deletes_in_sync: Mutex<HashSet<ChatId>>,
}

impl<R: RelayApi> Messenger<R> {
    /// Load this device's keys from `store`, generating them on first use.
    pub fn open(api: R, store: Database) -> Result<Self> {
        let keys = KeyManager::new(&store).initialize_or_load()?;
        Ok(Self::new(api, store, keys))
    }

    pub fn new(api: R, store: Database, keys: DeviceKeySet) -> Self {
        Self {
            api,
            store: Mutex::new(store),
            keys,
            chat_keys: Mutex::new(HashMap::new()),
            signing_keys: Mutex::new(HashMap::new()),
            deletes_in_sync: Mutex::new(HashSet::new()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.api.user_id()
    }

    pub fn keys(&self) -> &DeviceKeySet {
        &self.keys
    }

    pub fn api(&self) -> &R {
        &self.api
    }

    fn store(&self) -> MutexGuard<'_, Database> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn publish_signing_key(&self) -> Result<()> {
        self.api
            .publish_signing_key(&self.keys.public_signing_key())
            .await?;
        info!(fingerprint = %self.keys.fingerprint(), "Published signing key");
        Ok(())
    }

    /// Register the shared key for a chat. Distributing it to the other
    /// participants happens out of band.
    pub fn set_chat_key(&self, chat_id: ChatId, key: MessageKey) {
        self.chat_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, key);
    }

    fn chat_key(&self, chat_id: ChatId) -> Option<MessageKey> {
        self.chat_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .cloned()
    }

    pub async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<DecryptedMessage> {
        let key = self
            .chat_key(chat_id)
            .ok_or(ClientError::MissingChatKey(chat_id))?;
        let sealed = encrypt(text.as_bytes(), &key)?;

        let envelope = self
            .api
            .post_message(chat_id, &sealed.ciphertext, &sealed.nonce)
            .await?;
        let message = Message::from(envelope);
        self.store().cache_message(&message)?;

        debug!(chat = %chat_id, message = %message.id, "Message sent");
        Ok(DecryptedMessage {
            id: message.id,
            chat_id,
            sender_id: message.sender_id,
            created_at: message.created_at,
            content: MessageContent::Text(text.to_string()),
        })
    }

    /// Pull a page of messages from the relay, cache it and decrypt it.
    /// One bad message never fails the batch.
    pub async fn fetch_messages(
        &self,
        chat_id: ChatId,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<DecryptedMessage>> {
        let envelopes = self.api.list_messages(chat_id, after, limit).await?;
        let key = self.chat_key(chat_id);

        let store = self.store();
        let mut messages = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = envelope.id;
            store.cache_message(&envelope.into())?;
            messages.push(open_message(store.get_message(&id)?, key.as_ref()));
        }
        Ok(messages)
    }

    /// Decrypt what is already cached, without touching the network.
    pub fn cached_messages(&self, chat_id: ChatId, limit: u32) -> Result<Vec<DecryptedMessage>> {
        let key = self.chat_key(chat_id);
        let cached = self.store().list_messages(&chat_id, None, limit)?;
        Ok(cached
            .into_iter()
            .map(|m| open_message(m, key.as_ref()))
            .collect())
    }

    /// Sign and submit a delete for one of our own messages, then tombstone
    /// the local copy.
    pub async fn request_delete(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<PostDeleteResponse> {
        let record = create_delete_request(message_id, chat_id, self.user_id(), &self.keys.signing)?;
        let response = self.api.post_delete(&record).await?;

        let own_key = self.keys.signing.public_key_bytes();
        let local = apply_if_valid(&record, &*self.store(), |r| {
            verify_delete_request(r, &own_key)
        })?;

        info!(
            chat = %chat_id,
            message = %message_id,
            server = ?response.outcome,
            local = ?local,
            "Delete requested"
        );
        Ok(response)
    }

    /// Apply every delete record the relay has handed us and we have not
    /// processed yet. Fetched records are queued locally first; a record
    /// whose processing fails stays queued and comes back on the next call.
    pub async fn sync_deletes(&self, chat_id: ChatId) -> Result<Vec<SyncedDelete>> {
        self.pull_deletes(chat_id).await?;

        let me = self.user_id();
        let pending = self
            .store()
            .list_deletes(&chat_id, &me, DeleteFilter::Undelivered)?;
        let mut results = Vec::with_capacity(pending.len());

        for record in pending {
            let outcome = match self.process_delete(&record).await {
                Ok(outcome) => {
                    self.store().mark_deletes_delivered(&[record.id], &me)?;
                    SyncOutcome::Applied(outcome)
                }
                Err(e) => {
                    warn!(
                        delete = %record.id,
                        message = %record.message_id,
                        error = %e,
                        "Delete record deferred"
                    );
                    SyncOutcome::Deferred(e.to_string())
                }
            };
            results.push(SyncedDelete {
                delete_id: record.id,
                message_id: record.message_id,
                outcome,
            });
        }

        debug!(chat = %chat_id, count = results.len(), "Deletes synced");
        Ok(results)
    }

    /// Move records from the relay into the local queue. The first pull of
    /// a session, and the first after a failed one, replays from the newest
    /// record already queued so a lost response costs nothing.
    async fn pull_deletes(&self, chat_id: ChatId) -> Result<()> {
        let replay = !self.deletes_in_sync().contains(&chat_id);
        let fetched = if replay {
            let since = self
                .store()
                .latest_delete_received_at(&chat_id)?
                .map_or(0, |t| t.saturating_sub(1));
            self.api.fetch_deletes_since(chat_id, since).await
        } else {
            self.api.fetch_deletes(chat_id).await
        };

        let queued = fetched.and_then(|records| {
            let store = self.store();
            let mut added = 0;
            for record in &records {
                if store.queue_delete_record(record)? {
                    added += 1;
                }
            }
            Ok(added)
        });

        match queued {
            Ok(added) => {
                debug!(chat = %chat_id, replay, added, "Delete records queued");
                self.deletes_in_sync().insert(chat_id);
                Ok(())
            }
            Err(e) => {
                self.deletes_in_sync().remove(&chat_id);
                Err(e)
            }
        }
    }

    fn deletes_in_sync(&self) -> MutexGuard<'_, HashSet<ChatId>> {
        self.deletes_in_sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn process_delete(&self, record: &DeleteRecord) -> Result<ApplyOutcome> {
        match self.requester_key(record.requester_id).await? {
            Some(key) => self.apply_remote_delete(record, &key),
            None => {
                warn!(
                    target: "security",
                    requester = %record.requester_id,
                    message = %record.message_id,
                    "Delete from a user without a usable signing key"
                );
                Ok(ApplyOutcome::Rejected)
            }
        }
    }

    fn apply_remote_delete(
        &self,
        record: &DeleteRecord,
        requester_key: &[u8; PUBKEY_SIZE],
    ) -> Result<ApplyOutcome> {
        let store = self.store();

        // When the cached copy names its sender, only that sender may delete.
        if let Some(status) = store.message_status(&record.message_id)? {
            if !status.marker.is_deleted() && authorize_requester(record, &status).is_err() {
                return Ok(ApplyOutcome::Rejected);
            }
        }

        Ok(apply_if_valid(record, &*store, |r| {
            verify_delete_request(r, requester_key)
        })?)
    }

    async fn requester_key(&self, user_id: UserId) -> Result<Option<[u8; PUBKEY_SIZE]>> {
        let cached = self
            .signing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .copied();
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(hex_key) = self.api.signing_key(user_id).await? else {
            return Ok(None);
        };
        let Ok(key) = parse_public_key(&hex_key) else {
            warn!(target: "security", user = %user_id, "Published signing key is malformed");
            return Ok(None);
        };

        self.signing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, key);
        Ok(Some(key))
    }
}

fn open_message(message: Message, key: Option<&MessageKey>) -> DecryptedMessage {
    let content = if message.marker.is_deleted() {
        MessageContent::Deleted
    } else {
        match key {
            None => MessageContent::Undecryptable,
            Some(key) => match decrypt_text(&message.ciphertext, &message.nonce, key) {
                Ok(text) => MessageContent::Text(text),
                Err(e) => {
                    warn!(message = %message.id, error = %e, "Unable to decrypt message");
                    MessageContent::Undecryptable
                }
            },
        }
    };

    DecryptedMessage {
        id: message.id,
        chat_id: message.chat_id,
        sender_id: message.sender_id,
        created_at: message.created_at,
        content,
    }
}
