//! In-process relay for tests: the same store operations the server runs,
//! without HTTP in between. Failures reach callers through the same
//! status-to-error mapping the HTTP client applies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::StatusCode;

use sealchat_shared::deletion::{
    apply_if_valid, authorize_requester, require_valid_signature, DeleteRecord, MessageStore,
};
use sealchat_shared::error::DeletionError;
use sealchat_shared::identity::parse_public_key;
use sealchat_shared::protocol::{
    ErrorBody, ErrorCode, MessageEnvelope, PostDeleteResponse, PostSignalResponse,
};
use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{
    now_millis, ChatId, DeleteId, MessageId, SignalId, TimestampMillis, UserId,
};
use sealchat_store::{Database, DeleteFilter, StoreError};

use crate::api::RelayApi;
use crate::error::{ClientError, Result};
use crate::http::rejection;

pub struct Hub {
    db: Mutex<Database>,
    failures: AtomicUsize,
    targeted: Mutex<HashMap<&'static str, usize>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            db: Mutex::new(Database::open_in_memory().unwrap()),
            failures: AtomicUsize::new(0),
            targeted: Mutex::new(HashMap::new()),
        })
    }

    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap()
    }

    pub fn create_chat(&self, members: &[UserId]) -> ChatId {
        self.db().create_chat("test", members).unwrap().id
    }

    pub fn client(self: &Arc<Self>, user: UserId) -> FakeRelay {
        FakeRelay {
            hub: self.clone(),
            user,
        }
    }

    /// Make the next `n` requests from any client fail with a 503.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls of one operation fail with a 503. A failed
    /// `fetch_deletes` has already handed the records over, like a
    /// response lost on the way back.
    pub fn fail_next_on(&self, op: &'static str, n: usize) {
        self.targeted.lock().unwrap().insert(op, n);
    }

    fn maybe_fail(&self, op: &'static str) -> Result<()> {
        let targeted = match self.targeted.lock().unwrap().get_mut(op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        let failed = targeted
            || self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failed {
            return Err(rejection(StatusCode::SERVICE_UNAVAILABLE, None));
        }
        Ok(())
    }
}

/// The error the HTTP client would surface for this server response.
fn reply(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> ClientError {
    rejection(
        status,
        Some(ErrorBody {
            error: message.into(),
            code: Some(code),
        }),
    )
}

fn store_error(e: StoreError) -> ClientError {
    match e {
        StoreError::NotFound => reply(StatusCode::NOT_FOUND, ErrorCode::NotFound, "Not found: record"),
        _ => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            "Internal server error",
        ),
    }
}

fn deletion_error(e: DeletionError) -> ClientError {
    match e {
        DeletionError::SignatureInvalid => reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::SignatureInvalid,
            e.to_string(),
        ),
        DeletionError::NotSender => reply(
            StatusCode::FORBIDDEN,
            ErrorCode::AccessDenied,
            format!("Access denied: {e}"),
        ),
        DeletionError::Encoding(_) => reply(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            format!("Invalid request: {e}"),
        ),
    }
}

pub struct FakeRelay {
    hub: Arc<Hub>,
    user: UserId,
}

impl FakeRelay {
    fn member_db(&self, op: &'static str, chat_id: ChatId) -> Result<MutexGuard<'_, Database>> {
        self.hub.maybe_fail(op)?;
        self.open_member_db(chat_id)
    }

    fn open_member_db(&self, chat_id: ChatId) -> Result<MutexGuard<'_, Database>> {
        let db = self.hub.db();
        if !db.is_member(&chat_id, &self.user).map_err(store_error)? {
            return Err(reply(
                StatusCode::FORBIDDEN,
                ErrorCode::AccessDenied,
                "Access denied: not a member of this chat",
            ));
        }
        Ok(db)
    }
}

#[async_trait]
impl RelayApi for FakeRelay {
    fn user_id(&self) -> UserId {
        self.user
    }

    async fn create_chat(&self, name: &str, members: &[UserId]) -> Result<ChatId> {
        self.hub.maybe_fail("create_chat")?;
        let mut all = vec![self.user];
        all.extend_from_slice(members);
        let chat = self.hub.db().create_chat(name, &all).map_err(store_error)?;
        Ok(chat.id)
    }

    async fn publish_signing_key(&self, public_key_hex: &str) -> Result<()> {
        self.hub.maybe_fail("publish_signing_key")?;
        self.hub
            .db()
            .set_signing_key(&self.user, public_key_hex)
            .map_err(store_error)?;
        Ok(())
    }

    async fn signing_key(&self, user_id: UserId) -> Result<Option<String>> {
        self.hub.maybe_fail("signing_key")?;
        self.hub.db().get_signing_key(&user_id).map_err(store_error)
    }

    async fn post_message(
        &self,
        chat_id: ChatId,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<MessageEnvelope> {
        let db = self.member_db("post_message", chat_id)?;
        let message = db
            .create_message(&chat_id, &self.user, ciphertext, nonce)
            .map_err(store_error)?;
        Ok(message.into())
    }

    async fn list_messages(
        &self,
        chat_id: ChatId,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageEnvelope>> {
        let db = self.member_db("list_messages", chat_id)?;
        let messages = db
            .list_messages(&chat_id, after.as_ref(), limit)
            .map_err(store_error)?;
        Ok(messages.into_iter().map(MessageEnvelope::from).collect())
    }

    async fn post_delete(&self, record: &DeleteRecord) -> Result<PostDeleteResponse> {
        let db = self.member_db("post_delete", record.chat_id)?;
        let record = DeleteRecord {
            id: DeleteId::new(),
            requester_id: self.user,
            received_at: 0,
            ..record.clone()
        };

        let status = db
            .message_status(&record.message_id)
            .map_err(store_error)?
            .filter(|s| s.chat_id == record.chat_id)
            .ok_or_else(|| reply(StatusCode::NOT_FOUND, ErrorCode::NotFound, "Not found: message"))?;
        authorize_requester(&record, &status).map_err(deletion_error)?;

        let key = db
            .get_signing_key(&self.user)
            .map_err(store_error)?
            .ok_or_else(|| deletion_error(DeletionError::SignatureInvalid))?;
        let key = parse_public_key(&key).map_err(|_| {
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Internal,
                "Internal server error",
            )
        })?;
        require_valid_signature(&record, &key).map_err(deletion_error)?;

        db.insert_delete_record(&record).map_err(store_error)?;
        let outcome = apply_if_valid(&record, &*db, |_| true).map_err(store_error)?;
        Ok(PostDeleteResponse { id: record.id, outcome })
    }

    async fn fetch_deletes(&self, chat_id: ChatId) -> Result<Vec<DeleteRecord>> {
        let records = {
            let mut db = self.open_member_db(chat_id)?;
            db.take_undelivered_deletes(&chat_id, &self.user)
                .map_err(store_error)?
        };
        self.hub.maybe_fail("fetch_deletes")?;
        Ok(records)
    }

    async fn fetch_deletes_since(
        &self,
        chat_id: ChatId,
        since: TimestampMillis,
    ) -> Result<Vec<DeleteRecord>> {
        let db = self.member_db("fetch_deletes_since", chat_id)?;
        db.list_deletes(&chat_id, &self.user, DeleteFilter::CreatedAfter(since))
            .map_err(store_error)
    }

    async fn post_signal(
        &self,
        chat_id: ChatId,
        to: Option<UserId>,
        signal: SignalBody,
    ) -> Result<PostSignalResponse> {
        let db = self.member_db("post_signal", chat_id)?;
        let now = now_millis();
        let record = SignalRecord {
            id: SignalId::new(),
            chat_id,
            from: self.user,
            to,
            body: signal,
            created_at: now,
            expires_at: now + 30_000,
            consumed: false,
        };
        db.insert_signal(&record).map_err(store_error)?;
        Ok(PostSignalResponse {
            id: record.id,
            expires_at: record.expires_at,
        })
    }

    async fn fetch_signals(&self, chat_id: ChatId) -> Result<Vec<SignalRecord>> {
        let mut db = self.member_db("fetch_signals", chat_id)?;
        db.take_signals(&chat_id, &self.user, now_millis())
            .map_err(store_error)
    }
}
