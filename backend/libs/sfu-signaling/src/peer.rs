use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Jsep;

/// Capture-side peer connection, as far as signaling is concerned.
///
/// Implementations wrap whatever WebRTC stack owns the camera and microphone
/// tracks. The offer must be send-only (no receive transceivers).
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn create_offer(&self) -> Result<Jsep>;

    async fn set_local_description(&self, offer: &Jsep) -> Result<()>;

    async fn set_remote_description(&self, answer: &Jsep) -> Result<()>;
}
