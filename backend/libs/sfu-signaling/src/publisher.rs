//! Publisher handshake
//!
//! create session -> attach videoroom -> join as publisher -> publish offer
//! -> wait for `configured` + answer -> start the server bridge -> rtp_forward.
//! Any failure after the session exists tears it down before returning, and a
//! bridge this attempt started is stopped again so a retry can start its own.

use resilience::{with_timeout_result, TimeoutError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::JanusApi;
use crate::bridge::{BridgePorts, BridgeStarter};
use crate::config::SignalingConfig;
use crate::error::{Result, SignalingError};
use crate::peer::MediaPeer;
use crate::poller::EventPoller;
use crate::protocol::{self, LocalCandidate, MediaMids, SfuEvent, VIDEOROOM_PLUGIN};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One live attempt.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub livestream_id: i64,
    /// Shown to other room participants
    pub display: String,
    /// Egress URL returned by create-and-start, handed to the bridge
    pub egress_url: String,
}

pub struct Publisher {
    api: Arc<dyn JanusApi>,
    bridge: Arc<dyn BridgeStarter>,
    config: SignalingConfig,
}

/// Negotiated, forwarding session. Call [`LiveSession::destroy`] on every
/// end path.
pub struct LiveSession {
    api: Arc<dyn JanusApi>,
    pub session_id: u64,
    pub handle_id: u64,
    pub publisher_id: u64,
    pub mids: MediaMids,
    pub ports: BridgePorts,
    poller: EventPoller,
    trickle: JoinHandle<()>,
    events: mpsc::Receiver<SfuEvent>,
}

impl LiveSession {
    /// Next event from the SFU after the handshake (e.g. a hangup). None once
    /// the long-poll has stopped.
    pub async fn next_event(&mut self) -> Option<SfuEvent> {
        self.events.recv().await
    }

    /// Stop polling and trickling, then destroy the SFU session.
    pub async fn destroy(self) -> Result<()> {
        let session_id = self.session_id;
        teardown(self.api.as_ref(), session_id, self.poller, Some(self.trickle)).await?;
        info!(session_id, "Signaling session destroyed");
        Ok(())
    }
}

struct Handshake {
    session_id: u64,
    poller: EventPoller,
    events: mpsc::Receiver<SfuEvent>,
    trickle: Option<JoinHandle<()>>,
    bridge_started: bool,
}

impl Publisher {
    pub fn new(
        api: Arc<dyn JanusApi>,
        bridge: Arc<dyn BridgeStarter>,
        config: SignalingConfig,
    ) -> Self {
        Self {
            api,
            bridge,
            config,
        }
    }

    /// Run the full publisher handshake. Local candidates are read from
    /// `candidates` and trickled as they arrive.
    pub async fn go_live(
        &self,
        peer: Arc<dyn MediaPeer>,
        request: &PublishRequest,
        candidates: mpsc::Receiver<LocalCandidate>,
    ) -> Result<LiveSession> {
        let session_id = self.api.create_session().await?;
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let poller = EventPoller::spawn(
            self.api.clone(),
            session_id,
            self.config.max_events,
            self.config.poll_backoff.clone(),
            events_tx,
        );

        let mut handshake = Handshake {
            session_id,
            poller,
            events,
            trickle: None,
            bridge_started: false,
        };

        let negotiated = self
            .negotiate(&mut handshake, peer, request, candidates)
            .await;
        match negotiated {
            Ok((handle_id, publisher_id, mids, ports)) => {
                info!(
                    livestream_id = request.livestream_id,
                    session_id,
                    publisher_id,
                    audio_port = ports.audio_port,
                    video_port = ports.video_port,
                    "Publishing and forwarding to bridge"
                );
                let trickle = handshake
                    .trickle
                    .unwrap_or_else(|| tokio::spawn(async {}));
                Ok(LiveSession {
                    api: self.api.clone(),
                    session_id,
                    handle_id,
                    publisher_id,
                    mids,
                    ports,
                    poller: handshake.poller,
                    trickle,
                    events: handshake.events,
                })
            }
            Err(e) => {
                warn!(
                    livestream_id = request.livestream_id,
                    session_id,
                    error = %e,
                    "Publish attempt failed, tearing down"
                );
                if let Err(teardown_err) = teardown(
                    self.api.as_ref(),
                    session_id,
                    handshake.poller,
                    handshake.trickle,
                )
                .await
                {
                    warn!(session_id, error = %teardown_err, "Failed to destroy signaling session");
                }
                if handshake.bridge_started {
                    self.release_bridge(request.livestream_id).await;
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        handshake: &mut Handshake,
        peer: Arc<dyn MediaPeer>,
        request: &PublishRequest,
        candidates: mpsc::Receiver<LocalCandidate>,
    ) -> Result<(u64, u64, MediaMids, BridgePorts)> {
        let session_id = handshake.session_id;
        let room = request.livestream_id;

        let handle_id = self.api.attach(session_id, VIDEOROOM_PLUGIN).await?;

        // Join
        self.api
            .message(
                session_id,
                handle_id,
                protocol::join_publisher(room, &request.display),
                None,
            )
            .await?
            .check("join")?;
        let publisher_id = self
            .wait_for(&mut handshake.events, "join", |event| match event {
                SfuEvent::Joined { publisher_id } => Some(publisher_id),
                _ => None,
            })
            .await?;
        debug!(session_id, publisher_id, "Joined room as publisher");

        // Offer / answer
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        self.api
            .message(session_id, handle_id, protocol::publish(), Some(offer))
            .await?
            .check("publish")?;
        handshake.trickle = Some(spawn_trickle(
            self.api.clone(),
            session_id,
            handle_id,
            candidates,
        ));

        let mut answered = false;
        let streams = loop {
            let event = self
                .wait_for(&mut handshake.events, "publish", |event| match event {
                    SfuEvent::Configured { .. } | SfuEvent::Answer(_) => Some(event),
                    _ => None,
                })
                .await?;
            match event {
                SfuEvent::Configured { streams, jsep } => {
                    if let Some(answer) = jsep.filter(|j| j.is_answer()) {
                        peer.set_remote_description(&answer).await?;
                        answered = true;
                    }
                    break streams;
                }
                SfuEvent::Answer(answer) => {
                    peer.set_remote_description(&answer).await?;
                    answered = true;
                }
                _ => {}
            }
        };
        if !answered {
            return Err(SignalingError::protocol("publish", "configured without an answer"));
        }
        let mids = protocol::resolve_mids(&streams)?;

        // The bridge must be listening before the SFU starts forwarding.
        let ports = self
            .bridge
            .start_bridge(request.livestream_id, &request.egress_url)
            .await?;
        handshake.bridge_started = true;

        self.api
            .message(
                session_id,
                handle_id,
                protocol::rtp_forward(
                    room,
                    publisher_id,
                    &self.config.forward_host,
                    &[
                        (mids.audio.as_str(), ports.audio_port),
                        (mids.video.as_str(), ports.video_port),
                    ],
                    self.config.rtp_forward_secret.as_deref(),
                ),
                None,
            )
            .await?
            .check("rtp_forward")?;

        Ok((handle_id, publisher_id, mids, ports))
    }

    async fn release_bridge(&self, livestream_id: i64) {
        match self.bridge.stop_bridge(livestream_id).await {
            Ok(stopped) => debug!(livestream_id, stopped, "Bridge released after failed publish"),
            Err(e) => warn!(livestream_id, error = %e, "Failed to stop bridge after failed publish"),
        }
    }

    /// Next event `select` accepts, within the handshake timeout. Plugin
    /// errors and hangups fail `step`.
    async fn wait_for<T>(
        &self,
        events: &mut mpsc::Receiver<SfuEvent>,
        step: &'static str,
        select: impl Fn(SfuEvent) -> Option<T>,
    ) -> Result<T> {
        let wait = async {
            loop {
                let event = events
                    .recv()
                    .await
                    .ok_or_else(|| SignalingError::SessionClosed("long-poll stopped".to_string()))?;
                match event {
                    SfuEvent::PluginError { code, reason } => {
                        return Err(SignalingError::protocol(
                            step,
                            format!("{} (code {})", reason, code),
                        ))
                    }
                    SfuEvent::Hangup { reason } => return Err(SignalingError::SessionClosed(reason)),
                    other => {
                        if let Some(found) = select(other) {
                            return Ok(found);
                        }
                    }
                }
            }
        };

        match with_timeout_result(self.config.handshake_timeout, wait).await {
            Ok(found) => Ok(found),
            Err(TimeoutError::Elapsed(_)) => Err(SignalingError::Timeout(step)),
            Err(TimeoutError::OperationFailed(e)) => Err(e),
        }
    }
}

fn spawn_trickle(
    api: Arc<dyn JanusApi>,
    session_id: u64,
    handle_id: u64,
    mut candidates: mpsc::Receiver<LocalCandidate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = candidates.recv().await {
            let (candidate, complete) = match candidate {
                LocalCandidate::Candidate(c) => (Some(c), false),
                LocalCandidate::Complete => (None, true),
            };
            if let Err(e) = api.trickle(session_id, handle_id, candidate).await {
                warn!(session_id, error = %e, "Failed to trickle ICE candidate");
            }
            if complete {
                debug!(session_id, "ICE gathering complete");
                break;
            }
        }
    })
}

async fn teardown(
    api: &dyn JanusApi,
    session_id: u64,
    poller: EventPoller,
    trickle: Option<JoinHandle<()>>,
) -> Result<()> {
    if let Some(trickle) = trickle {
        trickle.abort();
    }
    poller.stop().await;
    api.destroy(session_id).await
}
