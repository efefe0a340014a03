//! Error types for the resource access layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

use crate::models::ErrorResponse;

// == Configuration Error ==
/// Invalid configuration, raised synchronously at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Eviction bound must hold at least one entry
    #[error("Eviction max_size must be greater than zero (got {0})")]
    InvalidMaxSize(usize),

    /// Sweep interval must be non-zero
    #[error("Eviction check interval must be greater than zero")]
    InvalidCheckInterval,

    /// Breaker needs at least one failure to trip
    #[error("Circuit breaker threshold must be greater than zero")]
    InvalidThreshold,

    /// Unrecognised eviction policy name
    #[error("Unknown eviction policy: {0} (expected 'lru' or 'oldest')")]
    UnknownEvictionKind(String),

    /// Environment variable present but unparsable
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

// == Fetch Error ==
/// Request-time failure.
///
/// Cloneable so that a single deduplicated outcome can be handed to every
/// waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// Circuit breaker suppressed the request locally
    #[error("Circuit breaker is blocking requests for {key}")]
    CircuitOpen { key: String },

    /// Response body could not be decoded
    #[error("Failed to decode response body: {0}")]
    Decode(String),

    /// Shared request task panicked or was cancelled
    #[error("Request aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// True for failures that reflect upstream health and feed the breaker.
    pub fn is_upstream_failure(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(err: tokio::task::JoinError) -> Self {
        FetchError::Aborted(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            FetchError::Network(_) => StatusCode::BAD_GATEWAY,
            FetchError::Status { status, .. } => *status,
            FetchError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            FetchError::Decode(_) => StatusCode::BAD_GATEWAY,
            FetchError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for request-time operations.
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_failure_classification() {
        assert!(FetchError::Network("reset".into()).is_upstream_failure());
        assert!(FetchError::Status {
            status: StatusCode::BAD_GATEWAY,
            message: String::new()
        }
        .is_upstream_failure());
        assert!(!FetchError::Status {
            status: StatusCode::NOT_FOUND,
            message: String::new()
        }
        .is_upstream_failure());
        assert!(!FetchError::CircuitOpen { key: "k".into() }.is_upstream_failure());
    }

    #[test]
    fn test_into_response_status() {
        let response = FetchError::CircuitOpen { key: "k".into() }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = FetchError::Status {
            status: StatusCode::NOT_FOUND,
            message: "missing".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
