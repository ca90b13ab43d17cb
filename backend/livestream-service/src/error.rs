/// Error types for livestream-service
///
/// Every failure surfaced by a handler is an `AppError`, rendered as the shared
/// `error_types::ErrorResponse` body.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use thiserror::Error;

use crate::services::bridge::BridgeError;
use crate::services::cdn::ProviderError;

/// Result type for livestream-service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// A required request field was absent
    #[error("Missing parameters: {0}")]
    MissingParameters(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation requires the livestream to have ended first
    #[error("Livestream {0} has not ended")]
    NotEnded(i64),

    /// Webhook signature header missing, malformed or wrong
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// A transcode worker is already registered for this livestream
    #[error("Transcode bridge already running for livestream {0}")]
    AlreadyRunning(i64),

    /// Requested UDP ports belong to another livestream's worker
    #[error("Transcode bridge ports unavailable: {0}")]
    PortInUse(String),

    /// CDN API call failed
    #[error("Upstream provider error: {0}")]
    UpstreamProvider(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingParameters(_) | AppError::BadRequest(_) | AppError::NotEnded(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::AlreadyRunning(_) | AppError::PortInUse(_) => StatusCode::CONFLICT,
            AppError::UpstreamProvider(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let (error_type, code) = match self {
            AppError::MissingParameters(_) => {
                (kinds::VALIDATION_ERROR, error_codes::MISSING_PARAMETERS)
            }
            AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
            AppError::NotEnded(_) => (kinds::VALIDATION_ERROR, error_codes::LIVESTREAM_NOT_ENDED),
            AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::LIVESTREAM_NOT_FOUND),
            AppError::Forbidden(_) => {
                (kinds::AUTHORIZATION_ERROR, error_codes::NOT_LIVESTREAM_OWNER)
            }
            AppError::InvalidSignature => {
                (kinds::AUTHENTICATION_ERROR, error_codes::INVALID_SIGNATURE)
            }
            AppError::AlreadyRunning(_) => {
                (kinds::CONFLICT_ERROR, error_codes::BRIDGE_ALREADY_RUNNING)
            }
            AppError::PortInUse(_) => (kinds::CONFLICT_ERROR, error_codes::BRIDGE_PORT_IN_USE),
            AppError::UpstreamProvider(_) => {
                (kinds::UPSTREAM_ERROR, error_codes::UPSTREAM_PROVIDER_ERROR)
            }
            AppError::DatabaseError(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
            AppError::Internal(_) => (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR),
        };

        // Internal details stay in the logs.
        let message = match self {
            AppError::DatabaseError(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let response = ErrorResponse::new(
            status.canonical_reason().unwrap_or("Error"),
            &message,
            status.as_u16(),
            error_type,
            code,
        );

        HttpResponse::build(status).json(response)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::UpstreamProvider(err.to_string())
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::AlreadyRunning(id) => AppError::AlreadyRunning(id),
            e @ (BridgeError::PortInUse { .. } | BridgeError::NoFreePorts) => {
                AppError::PortInUse(e.to_string())
            }
            BridgeError::Sdp(e) => AppError::BadRequest(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
