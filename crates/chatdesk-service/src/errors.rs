//! Chatdesk service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients for storage and internal failures are generic; the
//! actual error is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::config::ConfigError;
use serde::Serialize;
use thiserror::Error;

/// Chatdesk service error type.
///
/// Maps to HTTP status codes:
/// - Validation: 400 Bad Request
/// - InvalidCredentials, InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - Database, Configuration, Internal: 500 Internal Server Error
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed input, rejected before anything is persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage uniqueness constraint rejected the write, or an existing row
    /// contradicts the requested state and cannot be auto-healed.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::InvalidCredentials | ChatError::InvalidToken(_) => 401,
            ChatError::Forbidden(_) => 403,
            ChatError::NotFound(_) => 404,
            ChatError::Conflict(_) => 409,
            ChatError::Database(_) | ChatError::Configuration(_) | ChatError::Internal(_) => 500,
            ChatError::ServiceUnavailable(_) => 503,
        }
    }

    /// Stable, bounded label for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "VALIDATION_ERROR",
            ChatError::Conflict(_) => "CONFLICT",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::InvalidCredentials => "INVALID_CREDENTIALS",
            ChatError::InvalidToken(_) => "INVALID_TOKEN",
            ChatError::Forbidden(_) => "FORBIDDEN",
            ChatError::Database(_) => "DATABASE_ERROR",
            ChatError::Configuration(_) => "CONFIGURATION_ERROR",
            ChatError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failure to push one message into one live session.
///
/// Recorded per session in a `DeliveryOutcome`; never fails the originating
/// write and never stops delivery to other sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The session's outbound queue is full. The session is evicted and the
    /// client recovers through a backlog pull.
    #[error("session queue is full")]
    SessionBusy,

    /// The session's transport has gone away.
    #[error("session transport closed")]
    SessionClosed,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            ChatError::Database(err) => {
                tracing::error!(target: "chatdesk.database", error = %err, "Database operation failed");
                "An internal database error occurred".to_string()
            }
            ChatError::Configuration(err) => {
                tracing::error!(target: "chatdesk.config", error = %err, "Configuration error");
                "An internal error occurred".to_string()
            }
            ChatError::Internal(err) => {
                tracing::error!(target: "chatdesk.internal", error = %err, "Internal error");
                "An internal error occurred".to_string()
            }
            ChatError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "chatdesk.availability", reason = %reason, "Service unavailable");
                "Service temporarily unavailable".to_string()
            }
            ChatError::InvalidCredentials => "Invalid username or password".to_string(),
            ChatError::Validation(reason)
            | ChatError::Conflict(reason)
            | ChatError::NotFound(reason)
            | ChatError::InvalidToken(reason)
            | ChatError::Forbidden(reason) => reason.clone(),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if matches!(self, ChatError::InvalidToken(_)) {
            if let Ok(header_value) = "Bearer realm=\"chatdesk\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Unique violations become `Conflict` so provisioning paths can treat them
/// as "someone else won the race". Foreign key violations mean the referenced
/// tenant or identity does not exist.
impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return ChatError::Conflict(format!(
                    "unique constraint {} violated",
                    db_err.constraint().unwrap_or("unknown")
                ));
            }
            if db_err.is_foreign_key_violation() {
                return ChatError::NotFound(format!(
                    "referenced row missing ({})",
                    db_err.constraint().unwrap_or("unknown")
                ));
            }
        }
        ChatError::Database(err.to_string())
    }
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        ChatError::Configuration(err.to_string())
    }
}
