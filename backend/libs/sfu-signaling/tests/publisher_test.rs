//! Publisher handshake against a scripted in-process SFU.

use async_trait::async_trait;
use resilience::RetryConfig;
use serde_json::{json, Value};
use sfu_signaling::protocol::JanusMessage;
use sfu_signaling::{
    BridgePorts, BridgeStarter, EventPoller, IceCandidate, JanusApi, Jsep, LocalCandidate,
    MediaPeer, PublishRequest, Publisher, Result, SfuEvent, SignalingConfig, SignalingError,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type CallLog = Arc<Mutex<Vec<String>>>;

fn message(value: Value) -> JanusMessage {
    serde_json::from_value(value).unwrap()
}

fn videoroom_event(data: Value) -> JanusMessage {
    message(json!({
        "janus": "event",
        "sender": 99,
        "plugindata": { "plugin": "janus.plugin.videoroom", "data": data }
    }))
}

#[derive(Default)]
struct FakeJanus {
    log: CallLog,
    queue: Mutex<VecDeque<JanusMessage>>,
    rtp_forward_body: Mutex<Option<Value>>,
    reject_join: bool,
    reject_rtp_forward: bool,
    silent_publish: bool,
    session_gone: bool,
    poll_failures: AtomicU32,
}

impl FakeJanus {
    fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }

    fn push(&self, msg: JanusMessage) {
        self.queue.lock().unwrap().push_back(msg);
    }
}

#[async_trait]
impl JanusApi for FakeJanus {
    async fn create_session(&self) -> Result<u64> {
        self.record("create");
        Ok(1234)
    }

    async fn attach(&self, _session_id: u64, plugin: &str) -> Result<u64> {
        self.record(format!("attach:{}", plugin));
        Ok(99)
    }

    async fn message(
        &self,
        _session_id: u64,
        _handle_id: u64,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Result<JanusMessage> {
        let request = body["request"].as_str().unwrap_or_default().to_string();
        self.record(format!("message:{}", request));

        match request.as_str() {
            "join" if self.reject_join => self.push(videoroom_event(json!({
                "videoroom": "event",
                "error_code": 426,
                "error": "No such room"
            }))),
            "join" => self.push(videoroom_event(json!({
                "videoroom": "joined",
                "room": body["room"],
                "id": 777
            }))),
            "publish" => {
                assert_eq!(jsep.map(|j| j.kind), Some("offer".to_string()));
                if !self.silent_publish {
                    let mut configured = videoroom_event(json!({
                        "videoroom": "event",
                        "configured": "ok",
                        "streams": [
                            { "type": "audio", "mid": "0", "codec": "opus" },
                            { "type": "video", "mid": "1", "codec": "h264" }
                        ]
                    }));
                    configured.jsep = Some(Jsep {
                        kind: "answer".to_string(),
                        sdp: "v=0 answer".to_string(),
                    });
                    self.push(configured);
                }
            }
            "rtp_forward" if self.reject_rtp_forward => {
                return Ok(message(json!({
                    "janus": "success",
                    "plugindata": {
                        "plugin": "janus.plugin.videoroom",
                        "data": {
                            "videoroom": "event",
                            "error_code": 433,
                            "error": "Unauthorized (wrong admin_key)"
                        }
                    }
                })));
            }
            "rtp_forward" => {
                *self.rtp_forward_body.lock().unwrap() = Some(body.clone());
                return Ok(message(json!({
                    "janus": "success",
                    "plugindata": {
                        "plugin": "janus.plugin.videoroom",
                        "data": { "videoroom": "rtp_forward", "room": body["room"] }
                    }
                })));
            }
            _ => {}
        }

        Ok(message(json!({ "janus": "ack" })))
    }

    async fn trickle(
        &self,
        _session_id: u64,
        _handle_id: u64,
        candidate: Option<IceCandidate>,
    ) -> Result<()> {
        match candidate {
            Some(_) => self.record("trickle:candidate"),
            None => self.record("trickle:completed"),
        }
        Ok(())
    }

    async fn poll(&self, _session_id: u64, _max_events: u32) -> Result<Vec<JanusMessage>> {
        if self.session_gone {
            return Err(SignalingError::SessionClosed("No such session (code 458)".into()));
        }
        if self
            .poll_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SignalingError::HttpStatus {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }

        let drained: Vec<JanusMessage> = self.queue.lock().unwrap().drain(..).collect();
        if drained.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            return Ok(vec![message(json!({ "janus": "keepalive" }))]);
        }
        Ok(drained)
    }

    async fn destroy(&self, _session_id: u64) -> Result<()> {
        self.record("destroy");
        Ok(())
    }
}

/// Livestream-service stand-in: one worker per livestream id.
struct FakeBridge {
    log: CallLog,
    delay: Duration,
    conflict: bool,
    running: Mutex<HashSet<i64>>,
}

impl FakeBridge {
    fn running(&self) -> HashSet<i64> {
        self.running.lock().unwrap().clone()
    }
}

#[async_trait]
impl BridgeStarter for FakeBridge {
    async fn start_bridge(&self, livestream_id: i64, egress_url: &str) -> Result<BridgePorts> {
        assert_eq!(egress_url, "srt://rtmp.livepeer.com:2935?streamid=key-1");
        self.log.lock().unwrap().push("start_bridge:begin".to_string());
        tokio::time::sleep(self.delay).await;
        if self.conflict || !self.running.lock().unwrap().insert(livestream_id) {
            return Err(SignalingError::BridgeAlreadyRunning(livestream_id));
        }
        self.log.lock().unwrap().push("start_bridge:done".to_string());
        Ok(BridgePorts {
            audio_port: 5002,
            video_port: 5004,
        })
    }

    async fn stop_bridge(&self, livestream_id: i64) -> Result<bool> {
        self.log.lock().unwrap().push("stop_bridge".to_string());
        Ok(self.running.lock().unwrap().remove(&livestream_id))
    }
}

#[derive(Default)]
struct FakePeer {
    local: Mutex<Option<Jsep>>,
    remote: Mutex<Option<Jsep>>,
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn create_offer(&self) -> Result<Jsep> {
        Ok(Jsep::offer("v=0 offer"))
    }

    async fn set_local_description(&self, offer: &Jsep) -> Result<()> {
        *self.local.lock().unwrap() = Some(offer.clone());
        Ok(())
    }

    async fn set_remote_description(&self, answer: &Jsep) -> Result<()> {
        *self.remote.lock().unwrap() = Some(answer.clone());
        Ok(())
    }
}

fn config() -> SignalingConfig {
    let mut config = SignalingConfig::new("http://unused/janus", "http://unused");
    config.handshake_timeout = Duration::from_secs(2);
    config.poll_backoff = RetryConfig {
        max_retries: u32::MAX,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

fn request() -> PublishRequest {
    PublishRequest {
        livestream_id: 7,
        display: "seller-42".to_string(),
        egress_url: "srt://rtmp.livepeer.com:2935?streamid=key-1".to_string(),
    }
}

fn bridge(log: &CallLog, delay: Duration) -> Arc<FakeBridge> {
    Arc::new(FakeBridge {
        log: log.clone(),
        delay,
        conflict: false,
        running: Mutex::default(),
    })
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{} not called: {:?}", call, calls))
}

async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn rtp_forward_waits_for_slow_bridge() {
    let log = CallLog::default();
    let janus = Arc::new(FakeJanus::new(log.clone()));
    let peer = Arc::new(FakePeer::default());
    let publisher = Publisher::new(
        janus.clone(),
        bridge(&log, Duration::from_millis(150)),
        config(),
    );
    let (_candidates_tx, candidates) = mpsc::channel(8);

    let session = publisher
        .go_live(peer.clone(), &request(), candidates)
        .await
        .unwrap();

    let calls = calls(&log);
    assert!(position(&calls, "message:publish") < position(&calls, "start_bridge:begin"));
    assert!(position(&calls, "start_bridge:done") < position(&calls, "message:rtp_forward"));

    assert_eq!(session.publisher_id, 777);
    assert_eq!(session.mids.audio, "0");
    assert_eq!(session.mids.video, "1");
    assert_eq!(session.ports.audio_port, 5002);
    assert_eq!(session.ports.video_port, 5004);
    assert_eq!(
        peer.remote.lock().unwrap().as_ref().map(|j| j.sdp.clone()),
        Some("v=0 answer".to_string())
    );
    assert!(peer.local.lock().unwrap().is_some());

    let body = janus.rtp_forward_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["room"], 7);
    assert_eq!(body["publisher_id"], 777);
    assert_eq!(
        body["streams"],
        json!([
            { "mid": "0", "host": "127.0.0.1", "port": 5002 },
            { "mid": "1", "host": "127.0.0.1", "port": 5004 }
        ])
    );

    session.destroy().await.unwrap();
    assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("destroy"));
}

#[tokio::test]
async fn rejected_join_destroys_session_without_starting_bridge() {
    let log = CallLog::default();
    let janus = Arc::new(FakeJanus {
        reject_join: true,
        ..FakeJanus::new(log.clone())
    });
    let publisher = Publisher::new(janus, bridge(&log, Duration::ZERO), config());
    let (_candidates_tx, candidates) = mpsc::channel(8);

    let err = publisher
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .err()
        .unwrap();

    match err {
        SignalingError::Protocol { step, reason } => {
            assert_eq!(step, "join");
            assert!(reason.contains("No such room"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let calls = calls(&log);
    assert!(calls.contains(&"destroy".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("start_bridge")));
    assert!(!calls.contains(&"message:publish".to_string()));
}

#[tokio::test]
async fn bridge_conflict_skips_rtp_forward() {
    let log = CallLog::default();
    let janus = Arc::new(FakeJanus::new(log.clone()));
    let conflicting = Arc::new(FakeBridge {
        log: log.clone(),
        delay: Duration::ZERO,
        conflict: true,
        running: Mutex::default(),
    });
    let publisher = Publisher::new(janus, conflicting, config());
    let (_candidates_tx, candidates) = mpsc::channel(8);

    let err = publisher
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SignalingError::BridgeAlreadyRunning(7)));
    let calls = calls(&log);
    assert!(!calls.contains(&"message:rtp_forward".to_string()));
    assert!(calls.contains(&"destroy".to_string()));
    // The running worker belongs to someone else.
    assert!(!calls.contains(&"stop_bridge".to_string()));
}

#[tokio::test]
async fn rejected_rtp_forward_stops_the_bridge_so_a_retry_can_start() {
    let log = CallLog::default();
    let bridge = bridge(&log, Duration::ZERO);
    let rejecting = Arc::new(FakeJanus {
        reject_rtp_forward: true,
        ..FakeJanus::new(log.clone())
    });
    let publisher = Publisher::new(rejecting, bridge.clone(), config());
    let (_candidates_tx, candidates) = mpsc::channel(8);

    let err = publisher
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .err()
        .unwrap();

    match err {
        SignalingError::Protocol { step, reason } => {
            assert_eq!(step, "rtp_forward");
            assert!(reason.contains("433"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let calls_now = calls(&log);
    assert!(position(&calls_now, "destroy") < position(&calls_now, "stop_bridge"));
    assert!(bridge.running().is_empty());

    let healthy = Arc::new(FakeJanus::new(log.clone()));
    let retry = Publisher::new(healthy, bridge.clone(), config());
    let (_candidates_tx, candidates) = mpsc::channel(8);
    let session = retry
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .unwrap();

    assert_eq!(bridge.running(), HashSet::from([7]));
    assert_eq!(session.ports.audio_port, 5002);
    session.destroy().await.unwrap();
}

#[tokio::test]
async fn missing_configured_event_times_out() {
    let log = CallLog::default();
    let janus = Arc::new(FakeJanus {
        silent_publish: true,
        ..FakeJanus::new(log.clone())
    });
    let mut config = config();
    config.handshake_timeout = Duration::from_millis(100);
    let publisher = Publisher::new(janus, bridge(&log, Duration::ZERO), config);
    let (_candidates_tx, candidates) = mpsc::channel(8);

    let err = publisher
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SignalingError::Timeout("publish")));
    assert!(calls(&log).contains(&"destroy".to_string()));
}

#[tokio::test]
async fn local_candidates_are_trickled_until_complete() {
    let log = CallLog::default();
    let janus = Arc::new(FakeJanus::new(log.clone()));
    let publisher = Publisher::new(janus, bridge(&log, Duration::ZERO), config());
    let (candidates_tx, candidates) = mpsc::channel(8);

    candidates_tx
        .send(LocalCandidate::Candidate(IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }))
        .await
        .unwrap();
    candidates_tx.send(LocalCandidate::Complete).await.unwrap();

    let session = publisher
        .go_live(Arc::new(FakePeer::default()), &request(), candidates)
        .await
        .unwrap();

    assert!(
        eventually(Duration::from_secs(1), || {
            calls(&log).contains(&"trickle:completed".to_string())
        })
        .await
    );
    let calls_now = calls(&log);
    assert!(position(&calls_now, "trickle:candidate") < position(&calls_now, "trickle:completed"));

    session.destroy().await.unwrap();
}

#[tokio::test]
async fn poller_recovers_from_transient_failures() {
    let janus = Arc::new(FakeJanus {
        poll_failures: AtomicU32::new(3),
        ..FakeJanus::default()
    });
    janus.push(videoroom_event(json!({ "videoroom": "joined", "id": 5 })));

    let (events_tx, mut events) = mpsc::channel(8);
    let poller = EventPoller::spawn(janus.clone(), 1234, 5, config().poll_backoff, events_tx);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(SfuEvent::Joined { publisher_id: 5 }));
    assert_eq!(janus.poll_failures.load(Ordering::SeqCst), 0);

    poller.stop().await;
}

#[tokio::test]
async fn poller_reports_lost_session_as_hangup() {
    let janus = Arc::new(FakeJanus {
        session_gone: true,
        ..FakeJanus::default()
    });
    let (events_tx, mut events) = mpsc::channel(8);
    let poller = EventPoller::spawn(janus, 1234, 5, config().poll_backoff, events_tx);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap();
    match event {
        Some(SfuEvent::Hangup { reason }) => assert!(reason.contains("458")),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(eventually(Duration::from_secs(1), || poller.is_finished()).await);
}
