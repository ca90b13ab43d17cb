use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    /// Network or HTTP-level failure; worth retrying
    #[error("signaling transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The SFU (or the bridge API) rejected a handshake step
    #[error("{step} rejected: {reason}")]
    Protocol { step: &'static str, reason: String },

    /// Expected event did not arrive in time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Long-poll ended before the handshake finished
    #[error("signaling session closed: {0}")]
    SessionClosed(String),

    #[error("local media peer error: {0}")]
    Peer(String),

    /// Server-side bridge already registered for this livestream
    #[error("bridge already running for livestream {0}")]
    BridgeAlreadyRunning(i64),
}

impl SignalingError {
    pub fn protocol(step: &'static str, reason: impl Into<String>) -> Self {
        SignalingError::Protocol {
            step,
            reason: reason.into(),
        }
    }

    /// Transport errors are retried by the long-poll loop; everything else is
    /// fatal to the publish attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SignalingError::Transport(_) => true,
            SignalingError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;
