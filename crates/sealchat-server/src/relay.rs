//! Signaling relay: a per-chat mailbox of short-lived call-setup records.
//!
//! Records are addressed to one member or broadcast to the rest of the
//! chat, handed out exactly once, and never returned after expiry. Expired
//! rows are removed lazily on every post and by a periodic purge task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use sealchat_shared::error::RelayError;
use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{now_millis, ChatId, SignalId, UserId};
use sealchat_store::Database;

use crate::error::ServerError;

#[derive(Clone)]
pub struct SignalRelay {
    db: Arc<Mutex<Database>>,
    ttl: Duration,
}

impl SignalRelay {
    pub fn new(db: Arc<Mutex<Database>>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Queue a signal from `from` to `to` (or every other member when
    /// `to` is `None`). Both ends must belong to the chat.
    pub async fn post_signal(
        &self,
        from: UserId,
        to: Option<UserId>,
        chat_id: ChatId,
        body: SignalBody,
    ) -> Result<SignalRecord, ServerError> {
        let db = self.db.lock().await;

        ensure_member(&db, &chat_id, &from)?;
        if let Some(to) = to {
            if !db.is_member(&chat_id, &to)? {
                warn!(chat = %chat_id, from = %from, to = %to, "Signal addressed to a non-member");
                return Err(RelayError::AccessDenied("recipient is not a member of this chat".into()).into());
            }
        }

        let now = now_millis();
        db.purge_expired_signals(now)?;
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);

        let record = SignalRecord {
            id: SignalId::new(),
            chat_id,
            from,
            to,
            body,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            consumed: false,
        };
        db.insert_signal(&record)?;

        debug!(
            chat = %chat_id,
            from = %from,
            kind = %record.body.kind(),
            "Signal queued"
        );
        Ok(record)
    }

    /// Hand out and consume everything waiting for `user_id` in the chat.
    pub async fn fetch_signals(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Vec<SignalRecord>, ServerError> {
        let mut db = self.db.lock().await;
        ensure_member(&db, &chat_id, &user_id)?;
        Ok(db.take_signals(&chat_id, &user_id, now_millis())?)
    }

    pub async fn purge_expired(&self) -> Result<usize, ServerError> {
        let db = self.db.lock().await;
        Ok(db.purge_expired_signals(now_millis())?)
    }
}

/// Membership gate shared by every chat-scoped operation.
pub fn ensure_member(db: &Database, chat_id: &ChatId, user_id: &UserId) -> Result<(), ServerError> {
    if db.is_member(chat_id, user_id)? {
        return Ok(());
    }
    warn!(chat = %chat_id, user = %user_id, "Access denied: not a chat member");
    Err(RelayError::AccessDenied("not a member of this chat".into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        relay: SignalRelay,
        db: Arc<Mutex<Database>>,
        chat: ChatId,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture(ttl: Duration) -> Fixture {
        let mut db = Database::open_in_memory().unwrap();
        let alice = UserId::new();
        let bob = UserId::new();
        let chat = db.create_chat("call", &[alice, bob]).unwrap().id;
        let db = Arc::new(Mutex::new(db));
        Fixture {
            relay: SignalRelay::new(db.clone(), ttl),
            db,
            chat,
            alice,
            bob,
        }
    }

    fn offer(n: u32) -> SignalBody {
        SignalBody::Offer { sdp: format!("v=0 #{n}") }
    }

    #[tokio::test]
    async fn test_exactly_once_in_order() {
        let f = fixture(Duration::from_secs(30)).await;
        for n in 0..3 {
            f.relay.post_signal(f.alice, Some(f.bob), f.chat, offer(n)).await.unwrap();
        }

        let got = f.relay.fetch_signals(f.chat, f.bob).await.unwrap();
        let bodies: Vec<_> = got.into_iter().map(|s| s.body).collect();
        assert_eq!(bodies, vec![offer(0), offer(1), offer(2)]);

        assert!(f.relay.fetch_signals(f.chat, f.bob).await.unwrap().is_empty());
        assert!(f.relay.fetch_signals(f.chat, f.alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_member_denied() {
        let f = fixture(Duration::from_secs(30)).await;
        let mallory = UserId::new();

        let err = f.relay.post_signal(mallory, Some(f.bob), f.chat, offer(0)).await;
        assert!(matches!(err, Err(ServerError::AccessDenied(_))));

        let err = f.relay.post_signal(f.alice, Some(mallory), f.chat, offer(0)).await;
        assert!(matches!(err, Err(ServerError::AccessDenied(_))));

        let err = f.relay.fetch_signals(f.chat, mallory).await;
        assert!(matches!(err, Err(ServerError::AccessDenied(_))));

        assert_eq!(f.db.lock().await.count_signals().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_signals_dropped() {
        let f = fixture(Duration::from_millis(1)).await;
        let posted = f.relay.post_signal(f.alice, None, f.chat, offer(0)).await.unwrap();
        assert_eq!(posted.expires_at, posted.created_at + 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.relay.fetch_signals(f.chat, f.bob).await.unwrap().is_empty());

        // The next post purges the stale row before inserting.
        f.relay.post_signal(f.bob, None, f.chat, offer(1)).await.unwrap();
        assert_eq!(f.db.lock().await.count_signals().unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.relay.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates() {
        let f = fixture(Duration::MAX).await;
        let posted = f.relay.post_signal(f.alice, Some(f.bob), f.chat, offer(0)).await.unwrap();
        assert_eq!(posted.expires_at, i64::MAX);

        let got = f.relay.fetch_signals(f.chat, f.bob).await.unwrap();
        assert_eq!(got.len(), 1);
    }
}
