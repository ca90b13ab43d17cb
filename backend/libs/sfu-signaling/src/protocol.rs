//! Janus HTTP API messages (core + videoroom plugin)
//!
//! Only the subset a publisher needs. Incoming messages are decoded into the
//! loose [`JanusMessage`] envelope and then classified into [`SfuEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, SignalingError};

pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// Janus core error for a session it does not know.
pub const ERROR_SESSION_NOT_FOUND: i64 = 458;

/// Session description carried next to a request or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn is_answer(&self) -> bool {
        self.kind == "answer"
    }
}

/// Local ICE candidate as produced by the capture peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// What the capture peer yields while gathering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCandidate {
    Candidate(IceCandidate),
    /// Gathering finished
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JanusErrorBody {
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdData {
    pub id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

/// Envelope shared by every Janus response and event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JanusMessage {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub sender: Option<u64>,
    #[serde(default)]
    pub data: Option<IdData>,
    #[serde(default)]
    pub error: Option<JanusErrorBody>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JanusMessage {
    /// Fail with `step` when this is a core or plugin-level error.
    pub fn check(self, step: &'static str) -> Result<Self> {
        if let Some(error) = &self.error {
            return Err(SignalingError::protocol(
                step,
                format!("{} (code {})", error.reason, error.code),
            ));
        }
        if self.janus == "error" {
            return Err(SignalingError::protocol(step, "error without details"));
        }
        if let Some((code, reason)) = self.plugin_error() {
            return Err(SignalingError::protocol(
                step,
                format!("{} (code {})", reason, code),
            ));
        }
        Ok(self)
    }

    /// `data.id` of a `success` reply (session or handle id).
    pub fn id(&self, step: &'static str) -> Result<u64> {
        self.data
            .as_ref()
            .map(|d| d.id)
            .ok_or_else(|| SignalingError::protocol(step, "reply carried no id"))
    }

    fn plugin_field(&self, key: &str) -> Option<&Value> {
        self.plugindata.as_ref().and_then(|p| p.data.get(key))
    }

    fn plugin_error(&self) -> Option<(i64, String)> {
        let reason = self.plugin_field("error")?.as_str()?.to_string();
        let code = self
            .plugin_field("error_code")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        Some((code, reason))
    }
}

/// One entry of the `streams` list in a videoroom `configured` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub mid: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMids {
    pub audio: String,
    pub video: String,
}

/// Pick the first audio and the first video mid.
pub fn resolve_mids(streams: &[StreamDescriptor]) -> Result<MediaMids> {
    let find = |kind: &str| {
        streams
            .iter()
            .find(|s| s.kind == kind)
            .and_then(|s| s.mid.clone())
    };

    match (find("audio"), find("video")) {
        (Some(audio), Some(video)) => Ok(MediaMids { audio, video }),
        (None, _) => Err(SignalingError::protocol("configure", "no audio stream reported")),
        (_, None) => Err(SignalingError::protocol("configure", "no video stream reported")),
    }
}

/// Asynchronous happenings on the long-poll channel that the handshake cares
/// about.
#[derive(Debug, Clone, PartialEq)]
pub enum SfuEvent {
    Joined {
        publisher_id: u64,
    },
    /// Publish accepted; the answer usually rides along
    Configured {
        streams: Vec<StreamDescriptor>,
        jsep: Option<Jsep>,
    },
    /// Answer delivered without a `configured` marker
    Answer(Jsep),
    PluginError {
        code: i64,
        reason: String,
    },
    /// PeerConnection or session went away on the SFU side
    Hangup {
        reason: String,
    },
    Keepalive,
    /// Anything else (acks, media/webrtcup notifications, room events)
    Other(String),
}

impl From<JanusMessage> for SfuEvent {
    fn from(msg: JanusMessage) -> Self {
        match msg.janus.as_str() {
            "keepalive" => return SfuEvent::Keepalive,
            "hangup" | "detached" | "timeout" => {
                return SfuEvent::Hangup {
                    reason: msg.reason.unwrap_or_else(|| msg.janus.clone()),
                }
            }
            _ => {}
        }

        if let Some((code, reason)) = msg.plugin_error() {
            return SfuEvent::PluginError { code, reason };
        }

        let videoroom = msg
            .plugin_field("videoroom")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if videoroom == "joined" {
            if let Some(publisher_id) = msg.plugin_field("id").and_then(Value::as_u64) {
                return SfuEvent::Joined { publisher_id };
            }
        }

        if msg.plugin_field("configured").and_then(Value::as_str) == Some("ok") {
            let streams = msg
                .plugin_field("streams")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            return SfuEvent::Configured {
                streams,
                jsep: msg.jsep,
            };
        }

        match msg.jsep {
            Some(jsep) if jsep.is_answer() => SfuEvent::Answer(jsep),
            _ => SfuEvent::Other(msg.janus),
        }
    }
}

/// Long-poll replies are an array when `maxev` is set, a bare object otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PollReply {
    Many(Vec<JanusMessage>),
    One(JanusMessage),
}

impl PollReply {
    pub fn into_vec(self) -> Vec<JanusMessage> {
        match self {
            PollReply::Many(messages) => messages,
            PollReply::One(message) => vec![message],
        }
    }
}

// =============================================================================
// Videoroom request bodies
// =============================================================================

pub fn join_publisher(room: i64, display: &str) -> Value {
    json!({
        "request": "join",
        "ptype": "publisher",
        "room": room,
        "display": display,
    })
}

pub fn publish() -> Value {
    json!({
        "request": "publish",
        "audio": true,
        "video": true,
    })
}

/// Forward each mid to `host:<port>`.
pub fn rtp_forward(
    room: i64,
    publisher_id: u64,
    host: &str,
    forwards: &[(&str, u16)],
    secret: Option<&str>,
) -> Value {
    let streams: Vec<Value> = forwards
        .iter()
        .map(|(mid, port)| json!({ "mid": mid, "host": host, "port": port }))
        .collect();

    let mut body = json!({
        "request": "rtp_forward",
        "room": room,
        "publisher_id": publisher_id,
        "host": host,
        "streams": streams,
    });
    if let Some(secret) = secret {
        body["secret"] = Value::String(secret.to_string());
    }
    body
}
