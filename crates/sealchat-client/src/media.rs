//! Seam to the platform's real-time media stack.

use async_trait::async_trait;

use crate::error::Result;
use crate::signaling::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// One local peer connection. Implementations report failures as
/// `ClientError::Media`.
#[async_trait]
pub trait PeerConnection: Send + 'static {
    async fn acquire_local_media(&mut self) -> Result<()>;

    async fn create_offer(&mut self) -> Result<String>;

    async fn create_answer(&mut self) -> Result<String>;

    async fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    async fn close(&mut self);
}
