//! Application-level error type for HTTP handlers.
//!
//! Wraps domain errors and implements [`IntoResponse`] to produce consistent
//! JSON error responses. Internal messages are sanitized: clients see the
//! last error message, never stack traces or internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use jobswipe_core::CoreError;
use jobswipe_queue::BrokerError;

/// Application-level error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `jobswipe-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A broker error from `jobswipe-queue`.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Broker errors ---
            AppError::Broker(broker) => classify_broker_error(broker),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a broker error onto an HTTP status, error code, and message.
///
/// - Unknown jobs map to 404.
/// - Claim races and stale tokens map to 409 (the caller lost the race).
/// - Validation maps to 400.
fn classify_broker_error(err: &BrokerError) -> (StatusCode, &'static str, String) {
    match err {
        BrokerError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job {id} not found"),
        ),
        BrokerError::ClaimConflict(_) => (
            StatusCode::CONFLICT,
            "CLAIM_CONFLICT",
            "Job already claimed".to_string(),
        ),
        BrokerError::StaleClaim(_) => (
            StatusCode::CONFLICT,
            "STALE_CLAIM",
            "Claim is no longer held".to_string(),
        ),
        BrokerError::InvalidTransition { .. } => (
            StatusCode::CONFLICT,
            "INVALID_TRANSITION",
            "Job is not in a state that allows this operation".to_string(),
        ),
        BrokerError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
    }
}
