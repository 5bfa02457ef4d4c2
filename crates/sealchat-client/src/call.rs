//! Poll loop driving one call through the relay mailbox.
//!
//! The loop runs in its own tokio task. The application talks to it through
//! a typed command channel and observes progress on a `watch` channel.
//! Network failures, and remote descriptions the media layer refuses, are
//! logged and retried on the next tick; they never end the call. Only [`CallHandle::hang_up`] does.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{ChatId, UserId};

use crate::api::RelayApi;
use crate::error::{ClientError, Result};
use crate::media::{PeerConnection, SdpKind};
use crate::signaling::{CallRole, CallSession, CallState, IceCandidate, SignalingAction};

#[derive(Debug, Clone)]
pub struct CallParams {
    pub chat_id: ChatId,
    pub remote_user: UserId,
    pub role: CallRole,
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub enum CallCommand {
    /// A candidate gathered by the local media stack, to be posted.
    LocalCandidate(IceCandidate),
    HangUp,
}

pub struct CallHandle {
    cmd_tx: mpsc::Sender<CallCommand>,
    state_rx: watch::Receiver<CallState>,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn state(&self) -> CallState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    pub async fn send_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.cmd_tx
            .send(CallCommand::LocalCandidate(candidate))
            .await
            .map_err(|_| ClientError::CallEnded)
    }

    /// Stop polling, close the peer connection and wait for the loop to
    /// exit. A poll already in flight completes first.
    pub async fn hang_up(self) -> Result<()> {
        // The loop may already be gone after a failed setup.
        let _ = self.cmd_tx.send(CallCommand::HangUp).await;
        self.task
            .await
            .map_err(|e| ClientError::Media(format!("call task failed: {e}")))
    }
}

/// Spawn the poll loop for one call and return its handle.
pub fn start_call<R, P>(api: Arc<R>, peer: P, params: CallParams) -> CallHandle
where
    R: RelayApi + 'static,
    P: PeerConnection,
{
    let session = CallSession::new(api.user_id(), params.remote_user, params.chat_id, params.role);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(CallState::Idle);

    info!(
        chat = %params.chat_id,
        remote = %params.remote_user.short(),
        role = ?params.role,
        "Starting call"
    );

    let call_loop = CallLoop {
        api,
        peer,
        session,
        outbox: VecDeque::new(),
        unapplied: None,
        state_tx,
        poll_interval: params.poll_interval,
    };
    let task = tokio::spawn(call_loop.run(cmd_rx));

    CallHandle {
        cmd_tx,
        state_rx,
        task,
    }
}

struct CallLoop<R, P> {
    api: Arc<R>,
    peer: P,
    session: CallSession,
    /// Signals not yet accepted by the relay, oldest first.
    outbox: VecDeque<SignalBody>,
    /// Remote description the media layer refused last time.
    unapplied: Option<SignalingAction>,
    state_tx: watch::Sender<CallState>,
    poll_interval: Duration,
}

impl<R: RelayApi, P: PeerConnection> CallLoop<R, P> {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<CallCommand>) {
        if let Err(e) = self.setup().await {
            warn!(error = %e, "Call setup failed");
            self.finish().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_outbox().await;
                    if let Some(action) = self.unapplied.take() {
                        self.perform(action).await;
                    }
                    self.poll().await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(CallCommand::LocalCandidate(candidate)) => {
                            self.outbox.push_back(candidate.into());
                            self.flush_outbox().await;
                        }
                        Some(CallCommand::HangUp) | None => {
                            info!(chat = %self.session.chat_id, "Hanging up");
                            break;
                        }
                    }
                }
            }
        }

        self.finish().await;
    }

    async fn setup(&mut self) -> Result<()> {
        self.peer.acquire_local_media().await?;
        match self.session.role {
            CallRole::Caller => {
                let sdp = self.peer.create_offer().await?;
                let offer = self.session.offer_created(sdp);
                self.outbox.push_back(offer);
                self.flush_outbox().await;
            }
            CallRole::Callee => self.session.await_offer(),
        }
        self.publish_state();
        Ok(())
    }

    async fn flush_outbox(&mut self) {
        while let Some(body) = self.outbox.front().cloned() {
            let kind = body.kind();
            match self
                .api
                .post_signal(self.session.chat_id, Some(self.session.remote_user), body)
                .await
            {
                Ok(_) => {
                    debug!(kind = %kind, "Signal posted");
                    self.outbox.pop_front();
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Posting signal failed, retrying next tick");
                    break;
                }
            }
        }
    }

    async fn poll(&mut self) {
        let records = match self.api.fetch_signals(self.session.chat_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Signal poll failed, retrying next tick");
                return;
            }
        };

        for record in &records {
            self.apply(record).await;
        }
    }

    async fn apply(&mut self, record: &SignalRecord) {
        let action = self.session.handle_signal(record);
        self.perform(action).await;
    }

    async fn perform(&mut self, action: SignalingAction) {
        let result = match &action {
            SignalingAction::ApplyOffer(sdp) => self.accept_offer(sdp).await,
            SignalingAction::ApplyAnswer(sdp) => self.accept_answer(sdp).await,
            SignalingAction::AddIceCandidate(candidate) => {
                self.add_candidate(candidate).await;
                return;
            }
            SignalingAction::Ignore => return,
        };

        match result {
            Ok(()) => self.unapplied = None,
            Err(e) => {
                warn!(error = %e, "Applying remote description failed, retrying next tick");
                self.unapplied = Some(action);
            }
        }
    }

    async fn accept_offer(&mut self, sdp: &str) -> Result<()> {
        self.peer.set_remote_description(SdpKind::Offer, sdp).await?;
        let answer = self.peer.create_answer().await?;
        let answer = self.session.answer_created(answer);
        self.outbox.push_back(answer);
        self.flush_outbox().await;
        self.flush_pending_candidates().await;
        self.publish_state();
        Ok(())
    }

    async fn accept_answer(&mut self, sdp: &str) -> Result<()> {
        self.peer.set_remote_description(SdpKind::Answer, sdp).await?;
        self.session.answer_applied();
        self.flush_pending_candidates().await;
        self.publish_state();
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        for candidate in self.session.take_pending_candidates() {
            self.add_candidate(&candidate).await;
        }
    }

    async fn add_candidate(&mut self, candidate: &IceCandidate) {
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "Adding ICE candidate failed");
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.session.state());
    }

    async fn finish(&mut self) {
        self.session.close();
        self.peer.close().await;
        self.publish_state();
        info!(chat = %self.session.chat_id, "Call closed");
    }
}
