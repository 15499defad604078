//! # Error Handling
//!
//! Error type for the gateway's management API (config and health surface).
//! The streaming path deliberately does not use this type: session-level
//! error kinds (cancellation, transport failures, queue close) live next to
//! the types that produce them and never become HTTP responses, because by
//! the time a session exists the HTTP exchange is already over.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types with `?`
//! - **ResponseError trait**: Converts errors to HTTP responses
//!
//! ## What can actually go wrong here:
//! The management API is small, so the error vocabulary is too: a client can
//! propose a configuration change that fails validation, or the server can
//! fail while assembling a response. Everything else (upgrade rejection,
//! malformed control JSON, engine failures) is handled on its own path.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors surfaced by the management API handlers.
#[derive(Debug)]
pub enum AppError {
    /// A proposed configuration change failed validation and was not applied
    /// (for example a zero engine concurrency cap or an empty model path).
    ConfigRejected(String),

    /// The gateway itself failed while handling the request.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ConfigRejected(msg) => {
                write!(f, "Configuration change rejected: {}", msg)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts handler errors into HTTP responses.
///
/// ## Status mapping:
/// - ConfigRejected → 400: the running configuration is untouched and the
///   client can correct the request
/// - Internal → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "config_rejected",
///     "message": "Max concurrent transcriptions must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::ConfigRejected(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "config_rejected",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from JSON serialization errors.
///
/// ## Why Internal:
/// The management handlers only serialize values the server itself produced
/// (config snapshots, response bodies); a failure there is a server bug, not
/// bad client input. Malformed request bodies never reach the handlers: the
/// `web::Json` extractor rejects them first.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_config_rejected_maps_to_bad_request() {
        let err = AppError::ConfigRejected("port cannot be 0".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("port cannot be 0"));
    }

    #[test]
    fn test_internal_maps_to_server_error() {
        let err = AppError::Internal("lock poisoned".to_string());
        assert_eq!(
            err.error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
