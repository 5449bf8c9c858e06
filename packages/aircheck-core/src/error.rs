//! Centralized error types for the Aircheck core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Subsystem errors (`EngineError`, `StoreError`, `ProviderError`) are defined
//! next to their owning modules; this module aggregates them into the
//! application-wide [`AircheckError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::providers::ProviderError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "engine_unavailable",
            Self::Rejected(_) => "engine_rejected",
            Self::Timeout => "engine_timeout",
            Self::Protocol(_) => "engine_protocol_error",
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateEvent { .. } => "duplicate_event",
            Self::NotReady(_) => "tts_not_ready",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::NotFound { .. } => "not_found",
            Self::Unavailable(_) => "store_unavailable",
        }
    }
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "provider_timeout",
            Self::RateLimited => "provider_rate_limited",
            Self::Upstream(_) => "provider_error",
            Self::QualityReject(_) => "quality_reject",
            Self::Exhausted => "provider_exhausted",
            Self::Io(_) => "provider_io_error",
        }
    }
}

/// Application-wide error type for the Aircheck server.
#[derive(Debug, Error)]
pub enum AircheckError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The audio engine did not respond within the timeout.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The audio engine explicitly refused the operation.
    #[error("Engine rejected request: {0}")]
    EngineRejected(String),

    /// Requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A referenced TTS artifact is not in the `ready` state.
    #[error("TTS artifact not ready: {0}")]
    NotReady(String),

    /// Storage backend is unreachable or failed.
    #[error("Storage unavailable: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AircheckError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::EngineRejected(_) => "engine_rejected",
            Self::NotFound(_) => "not_found",
            Self::NotReady(_) => "tts_not_ready",
            Self::Storage(_) => "store_unavailable",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(_) => StatusCode::CONFLICT,
            Self::EngineUnavailable(_) | Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::EngineRejected(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AircheckResult<T> = Result<T, AircheckError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AircheckError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for AircheckError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(msg) => Self::EngineRejected(msg),
            EngineError::Timeout => Self::EngineUnavailable("command timed out".into()),
            other => Self::EngineUnavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for AircheckError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{} {}", entity, id)),
            StoreError::NotReady(id) => Self::NotReady(format!("artifact {}", id)),
            // DuplicateEvent is handled by ingest before reaching the API layer;
            // seeing it here means a handler skipped the dedup path.
            other => Self::Storage(other.to_string()),
        }
    }
}
