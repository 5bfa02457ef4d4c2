//! Signed "delete for everyone" requests.
//!
//! A sender signs `(message_id, chat_id, requester_id, timestamp)` with their
//! device signing key. Every participant, and the server, rebuilds the same
//! canonical bytes from the record and checks the signature against the
//! requester's published key before tombstoning its copy of the message.
//!
//! Per message the state machine is `Active -> Deleted`; `Deleted` is
//! terminal and re-applying a request is a no-op.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{DELETE_SIGNATURE_DOMAIN, PUBKEY_SIZE};
use crate::error::DeletionError;
use crate::identity::{verify_signature, SigningIdentity};
use crate::protocol::b64;
use crate::types::{now_millis, ChatId, ContentMarker, DeleteId, MessageId, TimestampMillis, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub id: DeleteId,
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub requester_id: UserId,
    /// Chosen once at creation and covered by the signature.
    pub timestamp: TimestampMillis,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    /// Whether the record has been handed to the recipient viewing it.
    #[serde(default)]
    pub delivered: bool,
    /// When the relay accepted the record; zero before that. Clients use
    /// it as their replay cursor.
    #[serde(default)]
    pub received_at: TimestampMillis,
}

#[derive(Serialize)]
struct CanonicalDelete<'a> {
    domain: &'a str,
    message_id: &'a [u8; 16],
    chat_id: &'a [u8; 16],
    requester_id: &'a [u8; 16],
    timestamp: TimestampMillis,
}

/// Deterministic byte encoding of the signed tuple.
pub fn canonical_bytes(
    message_id: &MessageId,
    chat_id: &ChatId,
    requester_id: &UserId,
    timestamp: TimestampMillis,
) -> Result<Vec<u8>, DeletionError> {
    bincode::serialize(&CanonicalDelete {
        domain: DELETE_SIGNATURE_DOMAIN,
        message_id: message_id.as_bytes(),
        chat_id: chat_id.as_bytes(),
        requester_id: requester_id.as_bytes(),
        timestamp,
    })
    .map_err(|e| DeletionError::Encoding(e.to_string()))
}

impl DeleteRecord {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, DeletionError> {
        canonical_bytes(&self.message_id, &self.chat_id, &self.requester_id, self.timestamp)
    }
}

pub fn create_delete_request(
    message_id: MessageId,
    chat_id: ChatId,
    requester_id: UserId,
    signing_key: &SigningIdentity,
) -> Result<DeleteRecord, DeletionError> {
    create_delete_request_at(message_id, chat_id, requester_id, signing_key, now_millis())
}

pub fn create_delete_request_at(
    message_id: MessageId,
    chat_id: ChatId,
    requester_id: UserId,
    signing_key: &SigningIdentity,
    timestamp: TimestampMillis,
) -> Result<DeleteRecord, DeletionError> {
    let payload = canonical_bytes(&message_id, &chat_id, &requester_id, timestamp)?;
    let signature = signing_key.sign(&payload);

    debug!(message = %message_id, chat = %chat_id, "Signed delete request");

    Ok(DeleteRecord {
        id: DeleteId::new(),
        message_id,
        chat_id,
        requester_id,
        timestamp,
        signature: signature.to_bytes().to_vec(),
        delivered: false,
        received_at: 0,
    })
}

/// Returns `false` on any mismatch, including malformed keys or signature
/// bytes. Never errors.
pub fn verify_delete_request(record: &DeleteRecord, requester_public_key: &[u8; PUBKEY_SIZE]) -> bool {
    let Ok(signature) = Signature::from_slice(&record.signature) else {
        return false;
    };
    let Ok(payload) = record.canonical_bytes() else {
        return false;
    };
    verify_signature(requester_public_key, &payload, &signature).is_ok()
}

/// Same check as [`verify_delete_request`], as a typed error for callers
/// that surface it.
pub fn require_valid_signature(
    record: &DeleteRecord,
    requester_public_key: &[u8; PUBKEY_SIZE],
) -> Result<(), DeletionError> {
    if verify_delete_request(record, requester_public_key) {
        Ok(())
    } else {
        warn!(
            target: "security",
            message = %record.message_id,
            requester = %record.requester_id,
            "Delete request signature rejected"
        );
        Err(DeletionError::SignatureInvalid)
    }
}

/// Authorization rule, distinct from the signature: only the original
/// sender may delete a message.
pub fn authorize_requester(record: &DeleteRecord, status: &MessageStatus) -> Result<(), DeletionError> {
    if record.requester_id != status.sender_id || record.chat_id != status.chat_id {
        warn!(
            target: "security",
            message = %record.message_id,
            requester = %record.requester_id,
            sender = %status.sender_id,
            "Delete requested by someone other than the sender"
        );
        return Err(DeletionError::NotSender);
    }
    Ok(())
}

/// What a store knows about a message, without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStatus {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub marker: ContentMarker,
}

/// Storage seam for applying deletions.
///
/// `tombstone` must clear ciphertext and nonce and flip the marker only if
/// the message is still active, returning whether it did. That
/// compare-and-set is what serializes racing applies per message.
pub trait MessageStore {
    type Error;

    fn message_status(&self, id: &MessageId) -> Result<Option<MessageStatus>, Self::Error>;
    fn tombstone(&self, id: &MessageId) -> Result<bool, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    Deleted,
    Rejected,
    Skipped,
}

pub fn apply_if_valid<S, F>(record: &DeleteRecord, store: &S, verify_fn: F) -> Result<ApplyOutcome, S::Error>
where
    S: MessageStore,
    F: FnOnce(&DeleteRecord) -> bool,
{
    let Some(status) = store.message_status(&record.message_id)? else {
        debug!(message = %record.message_id, "Delete target not present locally");
        return Ok(ApplyOutcome::Skipped);
    };

    if status.marker.is_deleted() {
        debug!(message = %record.message_id, "Message already deleted");
        return Ok(ApplyOutcome::Skipped);
    }

    if status.chat_id != record.chat_id {
        warn!(
            target: "security",
            message = %record.message_id,
            "Delete record chat does not match message chat"
        );
        return Ok(ApplyOutcome::Rejected);
    }

    if !verify_fn(record) {
        warn!(
            target: "security",
            message = %record.message_id,
            requester = %record.requester_id,
            "Rejected delete record with invalid signature"
        );
        return Ok(ApplyOutcome::Rejected);
    }

    if store.tombstone(&record.message_id)? {
        debug!(message = %record.message_id, "Message tombstoned");
        Ok(ApplyOutcome::Deleted)
    } else {
        Ok(ApplyOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::{Arc, Barrier, Mutex};

    #[derive(Debug, Clone)]
    struct Row {
        status: MessageStatus,
        ciphertext: Vec<u8>,
        nonce: Vec<u8>,
    }

    #[derive(Default)]
    struct MemoryMessages {
        rows: Mutex<HashMap<MessageId, Row>>,
    }

    impl MemoryMessages {
        fn insert(&self, id: MessageId, chat_id: ChatId, sender_id: UserId) {
            self.rows.lock().unwrap().insert(
                id,
                Row {
                    status: MessageStatus {
                        chat_id,
                        sender_id,
                        marker: ContentMarker::Text,
                    },
                    ciphertext: vec![1, 2, 3],
                    nonce: vec![4; 12],
                },
            );
        }

        fn row(&self, id: &MessageId) -> Row {
            self.rows.lock().unwrap()[id].clone()
        }
    }

    impl MessageStore for MemoryMessages {
        type Error = Infallible;

        fn message_status(&self, id: &MessageId) -> Result<Option<MessageStatus>, Infallible> {
            Ok(self.rows.lock().unwrap().get(id).map(|r| r.status.clone()))
        }

        fn tombstone(&self, id: &MessageId) -> Result<bool, Infallible> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(id) {
                Some(row) if !row.status.marker.is_deleted() => {
                    row.status.marker = ContentMarker::Deleted;
                    row.ciphertext.clear();
                    row.nonce.clear();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    struct Fixture {
        signer: SigningIdentity,
        sender: UserId,
        chat: ChatId,
        message: MessageId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                signer: SigningIdentity::generate(),
                sender: UserId::new(),
                chat: ChatId::new(),
                message: MessageId::new(),
            }
        }

        fn record(&self) -> DeleteRecord {
            create_delete_request(self.message, self.chat, self.sender, &self.signer).unwrap()
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let f = Fixture::new();
        let record = f.record();
        assert!(verify_delete_request(&record, &f.signer.public_key_bytes()));
    }

    #[test]
    fn test_verify_fails_on_any_field_change() {
        let f = Fixture::new();
        let pk = f.signer.public_key_bytes();
        let record = f.record();

        let mut r = record.clone();
        r.message_id = MessageId::new();
        assert!(!verify_delete_request(&r, &pk));

        let mut r = record.clone();
        r.chat_id = ChatId::new();
        assert!(!verify_delete_request(&r, &pk));

        let mut r = record.clone();
        r.requester_id = UserId::new();
        assert!(!verify_delete_request(&r, &pk));

        let mut r = record.clone();
        r.timestamp += 1;
        assert!(!verify_delete_request(&r, &pk));
    }

    #[test]
    fn test_verify_fails_with_other_key_or_bad_signature() {
        let f = Fixture::new();
        let record = f.record();

        let other = SigningIdentity::generate();
        assert!(!verify_delete_request(&record, &other.public_key_bytes()));

        let mut r = record.clone();
        r.signature[10] ^= 0x01;
        assert!(!verify_delete_request(&r, &f.signer.public_key_bytes()));

        let mut r = record;
        r.signature.truncate(12);
        assert!(!verify_delete_request(&r, &f.signer.public_key_bytes()));
    }

    #[test]
    fn test_verify_with_garbage_public_key_is_false() {
        let f = Fixture::new();
        assert!(!verify_delete_request(&f.record(), &[0xFF; 32]));
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let f = Fixture::new();
        let a = canonical_bytes(&f.message, &f.chat, &f.sender, 42).unwrap();
        let b = canonical_bytes(&f.message, &f.chat, &f.sender, 42).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, canonical_bytes(&f.message, &f.chat, &f.sender, 43).unwrap());
    }

    #[test]
    fn test_timestamp_is_not_recomputed() {
        let f = Fixture::new();
        let record =
            create_delete_request_at(f.message, f.chat, f.sender, &f.signer, 1_000).unwrap();
        assert_eq!(record.timestamp, 1_000);
        assert!(verify_delete_request(&record, &f.signer.public_key_bytes()));
    }

    #[test]
    fn test_apply_valid_then_repeat_is_skipped() {
        let f = Fixture::new();
        let store = MemoryMessages::default();
        store.insert(f.message, f.chat, f.sender);
        let record = f.record();
        let pk = f.signer.public_key_bytes();

        let outcome = apply_if_valid(&record, &store, |r| verify_delete_request(r, &pk)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Deleted);

        let row = store.row(&f.message);
        assert_eq!(row.status.marker, ContentMarker::Deleted);
        assert!(row.ciphertext.is_empty());
        assert!(row.nonce.is_empty());

        let outcome = apply_if_valid(&record, &store, |r| verify_delete_request(r, &pk)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
    }

    #[test]
    fn test_apply_bad_signature_rejected_and_untouched() {
        let f = Fixture::new();
        let store = MemoryMessages::default();
        store.insert(f.message, f.chat, f.sender);
        let record = f.record();
        let wrong = SigningIdentity::generate().public_key_bytes();

        let outcome =
            apply_if_valid(&record, &store, |r| verify_delete_request(r, &wrong)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected);

        let row = store.row(&f.message);
        assert_eq!(row.status.marker, ContentMarker::Text);
        assert_eq!(row.ciphertext, vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_to_unknown_message_skipped() {
        let f = Fixture::new();
        let store = MemoryMessages::default();
        let outcome = apply_if_valid(&f.record(), &store, |_| true).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
    }

    #[test]
    fn test_apply_with_mismatched_chat_rejected() {
        let f = Fixture::new();
        let store = MemoryMessages::default();
        store.insert(f.message, ChatId::new(), f.sender);
        let outcome = apply_if_valid(&f.record(), &store, |_| true).unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected);
    }

    #[test]
    fn test_authorize_requester_must_be_sender() {
        let f = Fixture::new();
        let status = MessageStatus {
            chat_id: f.chat,
            sender_id: UserId::new(),
            marker: ContentMarker::Text,
        };
        // Correctly signed by the requester, but the requester did not send it.
        let record = f.record();
        assert!(verify_delete_request(&record, &f.signer.public_key_bytes()));
        assert_eq!(authorize_requester(&record, &status), Err(DeletionError::NotSender));

        let status = MessageStatus {
            sender_id: f.sender,
            ..status
        };
        assert!(authorize_requester(&record, &status).is_ok());
    }

    #[test]
    fn test_racing_applies_delete_once() {
        let f = Fixture::new();
        let store = Arc::new(MemoryMessages::default());
        store.insert(f.message, f.chat, f.sender);
        let pk = f.signer.public_key_bytes();
        let first = f.record();
        let second = f.record();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|record| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    apply_if_valid(&record, store.as_ref(), |r| verify_delete_request(r, &pk))
                        .unwrap()
                })
            })
            .collect();

        let mut outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![ApplyOutcome::Deleted, ApplyOutcome::Skipped]);
    }

    #[test]
    fn test_record_json_roundtrip_keeps_signature() {
        let f = Fixture::new();
        let record = f.record();
        let json = serde_json::to_string(&record).unwrap();
        let back: DeleteRecord = serde_json::from_str(&json).unwrap();
        assert!(verify_delete_request(&back, &f.signer.public_key_bytes()));
    }
}
