//! Call-setup state machine for one peer-to-peer call.
//!
//! The session decides what each incoming signal means for the call; the
//! poll loop in [`crate::call`] performs the resulting media operations.

use sealchat_shared::signal::{SignalBody, SignalRecord};
use sealchat_shared::types::{ChatId, UserId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Caller posted its offer and waits for the answer.
    OfferSent,
    /// Callee waits for the caller's offer.
    AwaitingOffer,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl From<IceCandidate> for SignalBody {
    fn from(c: IceCandidate) -> Self {
        SignalBody::IceCandidate {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    ApplyOffer(String),
    ApplyAnswer(String),
    AddIceCandidate(IceCandidate),
    Ignore,
}

pub struct CallSession {
    pub local_user: UserId,
    pub remote_user: UserId,
    pub chat_id: ChatId,
    pub role: CallRole,
    state: CallState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl CallSession {
    pub fn new(local_user: UserId, remote_user: UserId, chat_id: ChatId, role: CallRole) -> Self {
        Self {
            local_user,
            remote_user,
            chat_id,
            role,
            state: CallState::Idle,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Caller side: record the local offer and return the signal to post.
    pub fn offer_created(&mut self, sdp: String) -> SignalBody {
        self.state = CallState::OfferSent;
        debug!(remote = %self.remote_user.short(), "Creating SDP offer");
        SignalBody::Offer { sdp }
    }

    /// Callee side: start waiting for the caller's offer.
    pub fn await_offer(&mut self) {
        self.state = CallState::AwaitingOffer;
    }

    /// Callee side: the offer is applied and the answer exists. Commits the
    /// session and returns the signal to post.
    pub fn answer_created(&mut self, sdp: String) -> SignalBody {
        self.commit_remote_description();
        debug!(remote = %self.remote_user.short(), "Creating SDP answer");
        SignalBody::Answer { sdp }
    }

    /// Caller side: the remote answer has been applied.
    pub fn answer_applied(&mut self) {
        self.commit_remote_description();
    }

    fn commit_remote_description(&mut self) {
        if self.state == CallState::Closed {
            return;
        }
        self.remote_description_set = true;
        self.state = CallState::Connected;
    }

    /// Offers and answers return an action without changing state. The
    /// session commits through [`Self::answer_created`] or
    /// [`Self::answer_applied`] once the media layer has accepted them.
    pub fn handle_signal(&mut self, signal: &SignalRecord) -> SignalingAction {
        if self.state == CallState::Closed || signal.from != self.remote_user {
            return SignalingAction::Ignore;
        }

        match &signal.body {
            SignalBody::Offer { sdp } => {
                if self.role != CallRole::Callee
                    || self.state != CallState::AwaitingOffer
                    || self.remote_description_set
                {
                    debug!(from = %signal.from.short(), state = ?self.state, "Ignoring unexpected offer");
                    return SignalingAction::Ignore;
                }
                debug!(from = %signal.from.short(), "Received SDP offer");
                SignalingAction::ApplyOffer(sdp.clone())
            }
            SignalBody::Answer { sdp } => {
                if self.role != CallRole::Caller || self.state != CallState::OfferSent {
                    debug!(from = %signal.from.short(), state = ?self.state, "Ignoring unexpected answer");
                    return SignalingAction::Ignore;
                }
                debug!(from = %signal.from.short(), "Received SDP answer");
                SignalingAction::ApplyAnswer(sdp.clone())
            }
            SignalBody::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let candidate = IceCandidate {
                    candidate: candidate.clone(),
                    sdp_mid: sdp_mid.clone(),
                    sdp_mline_index: *sdp_mline_index,
                };
                if self.remote_description_set {
                    debug!(from = %signal.from.short(), "Received ICE candidate");
                    SignalingAction::AddIceCandidate(candidate)
                } else {
                    debug!(from = %signal.from.short(), "Buffering early ICE candidate");
                    self.pending_candidates.push(candidate);
                    SignalingAction::Ignore
                }
            }
        }
    }

    /// Candidates that arrived before the remote description, in arrival
    /// order. Drained once the description has been applied.
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    pub fn close(&mut self) {
        self.state = CallState::Closed;
        self.pending_candidates.clear();
    }
}
