//! # Error Handling
//!
//! Central error type for the service and its mapping onto HTTP responses.
//! Every error leaves the server as the same JSON envelope:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "render_exit_failure",
//!     "message": "...diagnostic text...",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## Render failure taxonomy:
//! - **RenderSpawn**: the renderer executable is missing or unstartable.
//! - **RenderExit**: the renderer started but died before producing output;
//!   carries its exit code and captured stderr. Both map to 500 and are only
//!   reachable while no body bytes have been sent — after streaming starts,
//!   HTTP has no way to retroactively signal failure.
//!
//! Probe failures never appear here: the duration resolver recovers them
//! internally with a default. Client disconnects are cleanup signals, not
//! errors.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error variants, each carrying its diagnostic message.
#[derive(Debug)]
pub enum AppError {
    /// Server-side faults (IO failures, lock poisoning, task failures)
    Internal(String),

    /// Client sent a malformed request (broken multipart, bad JSON)
    BadRequest(String),

    /// Requested resource does not exist
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// A supplied value failed validation rules
    ValidationError(String),

    /// The renderer executable could not be started
    RenderSpawn(String),

    /// The renderer exited before producing any output
    RenderExit {
        status: Option<i32>,
        detail: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::RenderSpawn(msg) => write!(f, "Renderer spawn failure: {}", msg),
            AppError::RenderExit { status, detail } => {
                write!(
                    f,
                    "Renderer exited with status {}: {}",
                    status.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                    detail.trim()
                )
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::RenderSpawn(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "render_spawn_failure",
                msg.clone(),
            ),
            AppError::RenderExit { status, detail } => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "render_exit_failure",
                format!(
                    "renderer exited with status {}: {}",
                    status.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                    detail.trim()
                ),
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Upload and subprocess IO failures are server-side faults, not client
/// mistakes.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failures_map_to_500_with_machine_readable_kind() {
        let spawn = AppError::RenderSpawn("no such file".to_string());
        assert_eq!(spawn.error_response().status(), 500);

        let exit = AppError::RenderExit {
            status: Some(1),
            detail: "Invalid filter graph\n".to_string(),
        };
        assert_eq!(exit.error_response().status(), 500);
        assert_eq!(
            exit.to_string(),
            "Renderer exited with status 1: Invalid filter graph"
        );
    }

    #[test]
    fn client_errors_map_to_400() {
        let err = AppError::BadRequest("broken multipart".to_string());
        assert_eq!(err.error_response().status(), 400);
    }

    #[test]
    fn unknown_exit_status_is_spelled_out() {
        let exit = AppError::RenderExit {
            status: None,
            detail: "killed".to_string(),
        };
        assert!(exit.to_string().contains("status unknown"));
    }
}
