//! Capture-side signaling for the livestream ingest path
//!
//! Drives the Janus videoroom handshake for a publishing seller:
//! - **Session**: create, attach to the videoroom plugin, join as publisher
//! - **Negotiation**: send-only offer, trickled candidates, answer from the SFU
//! - **Bridge**: ask the livestream service to start the transcode worker, then
//!   point the SFU's RTP forwarders at the ports it returns
//!
//! The bridge is always started before `rtp_forward` is issued, so the worker
//! is listening when the first packets arrive.
//!
//! # Example
//!
//! ```rust,no_run
//! use sfu_signaling::{HttpBridgeClient, HttpJanusApi, Publisher, SignalingConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> sfu_signaling::Result<()> {
//! let config = SignalingConfig::new("http://localhost:8088/janus", "http://localhost:8080");
//! let publisher = Publisher::new(
//!     Arc::new(HttpJanusApi::new(&config)?),
//!     Arc::new(HttpBridgeClient::new(&config)?),
//!     config,
//! );
//! # let _ = publisher;
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod peer;
pub mod poller;
pub mod protocol;
pub mod publisher;

pub use api::{HttpJanusApi, JanusApi};
pub use bridge::{BridgePorts, BridgeStarter, HttpBridgeClient};
pub use config::{ConfigError, SignalingConfig};
pub use error::{Result, SignalingError};
pub use peer::MediaPeer;
pub use poller::EventPoller;
pub use protocol::{IceCandidate, Jsep, LocalCandidate, MediaMids, SfuEvent};
pub use publisher::{LiveSession, PublishRequest, Publisher};
