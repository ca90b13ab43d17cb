//! Business logic layer for livestream-service
//!
//! - Session orchestrator: livestream lifecycle across store, CDN and bridge
//! - Bridge: transcode worker supervision
//! - CDN: stream provisioning client
//! - Webhook: CDN event verification and decoding
//! - SDP: session description for the RTP forward
pub mod bridge;
pub mod cdn;
pub mod livestream_service;
pub mod sdp;
pub mod webhook;

pub use bridge::{BridgePorts, BridgeSupervisor, FfmpegLauncher, WorkerExit, WorkerLauncher};
pub use cdn::{DeliveryEndpoints, LivepeerClient, ProviderError, StreamProvider};
pub use livestream_service::{LivestreamService, WebhookOutcome};
pub use webhook::{WebhookEvent, WebhookVerifier};
