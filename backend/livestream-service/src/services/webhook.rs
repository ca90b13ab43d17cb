// CDN webhook signature verification and event decoding.
//
// Header format: `t=<unix_ts>,v1=<hex hmac-sha256(raw body)>`. The MAC is
// checked over the exact bytes received, before the body is parsed.

use crate::error::{AppError, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Accepted header names, in lookup order.
pub const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "livepeer-signature"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

/// Parse `t=..,v1=..`; order-insensitive, unknown keys ignored.
pub fn parse_signature_header(value: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signature = None;

    for part in value.split(',') {
        let (key, val) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = val.parse::<i64>().ok(),
            "v1" => signature = hex::decode(val).ok(),
            _ => {}
        }
    }

    Some(SignatureHeader {
        timestamp: timestamp?,
        signature: signature?,
    })
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))
    }

    /// Hex HMAC of `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Full header value for `body` at `timestamp`.
    pub fn signature_header(&self, timestamp: i64, body: &[u8]) -> Result<String> {
        Ok(format!("t={},v1={}", timestamp, self.sign(body)?))
    }

    /// Constant-time check of `header` against `body`.
    pub fn verify(&self, header: Option<&str>, body: &[u8]) -> Result<SignatureHeader> {
        let parsed = header
            .and_then(parse_signature_header)
            .ok_or(AppError::InvalidSignature)?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&parsed.signature)
            .map_err(|_| AppError::InvalidSignature)?;

        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    #[serde(default)]
    stream: Option<WebhookStream>,
}

#[derive(Debug, Deserialize)]
struct WebhookStream {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    StreamStarted { stream_id: String },
    StreamIdle { stream_id: String },
    /// Event types this service does not act on, or lifecycle events
    /// without a stream id
    Ignored { event: String },
}

impl WebhookEvent {
    pub fn name(&self) -> &str {
        match self {
            WebhookEvent::StreamStarted { .. } => "stream.started",
            WebhookEvent::StreamIdle { .. } => "stream.idle",
            WebhookEvent::Ignored { event } => event,
        }
    }
}

/// Decode a verified body. None when it is not a JSON event object.
pub fn parse_event(body: &[u8]) -> Option<WebhookEvent> {
    let payload: WebhookPayload = serde_json::from_slice(body).ok()?;
    let stream_id = payload.stream.map(|s| s.id);

    Some(match (payload.event.as_str(), stream_id) {
        ("stream.started", Some(stream_id)) => WebhookEvent::StreamStarted { stream_id },
        ("stream.idle", Some(stream_id)) => WebhookEvent::StreamIdle { stream_id },
        _ => WebhookEvent::Ignored {
            event: payload.event,
        },
    })
}
