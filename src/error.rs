//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`AppError`]: errors returned from HTTP handlers. They implement
//!   `ResponseError`, so a handler can simply return `Err(..)` and the client
//!   gets a JSON error body with the matching status code.
//! - [`RelayError`]: errors raised inside one relay session. They never leave
//!   the session; their message is recorded as the session's `last_error` and
//!   counted in the shared error window.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **thiserror**: `#[error("...")]` generates the `Display` impl, so each
//!   variant's message lives next to its definition
//! - **From conversions**: `?` calls `From::from` on the error, which is how a
//!   `RelayError` from the registry turns into a 409 `AppError` in a handler
//! - **Clone + PartialEq on RelayError**: errors can be handed out more than
//!   once and compared by value in assertions

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP clients.
///
/// ## Status Code Mapping:
/// - Internal → 500
/// - BadRequest → 400
/// - NotFound → 404
/// - Conflict → 409 (session limit reached, identifier already relaying,
///   deleting a session that is still active)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl AppError {
    fn kind(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
        }
    }
}

/// JSON error body:
///
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "Session '3333' is already relaying",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.kind().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.kind();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Failures inside a single relay session.
///
/// The `Display` text is exactly what ends up in `last_error` on the session
/// and in the health snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    /// The prosody stream could not be opened; the session never goes active.
    #[error("prosody connect failed: {0}")]
    DownstreamConnect(String),

    /// Sending a frame to, or reading a prediction from, the prosody stream failed.
    #[error("prosody stream error: {0}")]
    Downstream(String),

    /// Delivering a result to the upstream client failed.
    #[error("upstream send failed: {0}")]
    Upstream(String),

    #[error("session limit of {0} reached")]
    SessionLimit(usize),

    #[error("session '{0}' is already relaying")]
    DuplicateSession(String),

    /// A message could not be encoded, or a session task died.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::SessionLimit(_) | RelayError::DuplicateSession(_) => {
                AppError::Conflict(err.to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Downstream(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_maps_to_conflict() {
        let err: AppError = RelayError::SessionLimit(4).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: AppError = RelayError::DuplicateSession("3333".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("3333"));
    }

    #[test]
    fn test_downstream_errors_are_internal() {
        let err: AppError = RelayError::DownstreamConnect("refused".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_relay_error_message_is_recorded_text() {
        let err = RelayError::Downstream("connection reset".into());
        assert_eq!(err.to_string(), "prosody stream error: connection reset");
    }
}
