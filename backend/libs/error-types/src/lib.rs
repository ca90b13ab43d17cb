use serde::{Deserialize, Serialize};

/// Uniform API error body returned by every livestream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP reason phrase ("Not Found", "Conflict", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse category used by clients to route handling, see [`error_types`]
    pub error_type: String,

    /// Stable machine code, see [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Livestream lifecycle
    pub const LIVESTREAM_NOT_FOUND: &str = "LIVESTREAM_NOT_FOUND";
    pub const LIVESTREAM_NOT_ENDED: &str = "LIVESTREAM_NOT_ENDED";
    pub const NOT_LIVESTREAM_OWNER: &str = "NOT_LIVESTREAM_OWNER";
    pub const MISSING_PARAMETERS: &str = "MISSING_PARAMETERS";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // Transcode bridge
    pub const BRIDGE_ALREADY_RUNNING: &str = "BRIDGE_ALREADY_RUNNING";
    pub const BRIDGE_PORT_IN_USE: &str = "BRIDGE_PORT_IN_USE";

    // CDN provider
    pub const UPSTREAM_PROVIDER_ERROR: &str = "UPSTREAM_PROVIDER_ERROR";
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// Standard error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const SERVER_ERROR: &str = "server_error";
}
