//! HTTP mapping for the crate's errors.
//!
//! Every error type exposes a [`ErrorKind`]; the kind picks the status code
//! and the response body is always:
//!
//! ```json
//! { "error": "not_found", "message": "Slide not found: ...", "status": 404 }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::auth::AuthError;
use crate::error::{ErrorKind, InferenceError, RegistryError, TileError, UploadError};

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "validation_error")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

/// Status code and error type identifier for a kind.
pub fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error"),
        ErrorKind::State => (StatusCode::CONFLICT, "invalid_state"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        ErrorKind::Permanent => (StatusCode::BAD_GATEWAY, "storage_error"),
        ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

/// Build the error response for `kind`, logging it by severity.
///
/// 5xx at ERROR, 404 at DEBUG (common and expected), other 4xx at WARN.
pub fn error_response(kind: ErrorKind, message: String) -> Response {
    let (status, error_type) = status_for(kind);

    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    (status, Json(ErrorResponse::new(error_type, message, status))).into_response()
}

macro_rules! impl_into_response {
    ($($error:ty),+ $(,)?) => {
        $(
            impl IntoResponse for $error {
                fn into_response(self) -> Response {
                    error_response(self.kind(), self.to_string())
                }
            }
        )+
    };
}

impl_into_response!(UploadError, RegistryError, TileError, InferenceError, AuthError);
