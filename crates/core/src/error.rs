//! Error taxonomy shared across the queue, worker, and API crates.
//!
//! [`ExecutionErrorKind`] is the eight-member classification the worker pool
//! applies to automation failures before deciding whether to retry.
//! [`FailureReason`] is the coarser label stored on a dead-letter record.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Domain-level error type used by core validation and lookups.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An entity lookup failed.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Input failed validation at the ingestion boundary.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller is not authenticated or the token is invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// ExecutionErrorKind
// ---------------------------------------------------------------------------

/// Classification of an automation failure.
///
/// The worker pool maps every executor error into one of these kinds before
/// calling `nack`; the kind drives both retry policy and the failure reason
/// recorded if the job is eventually dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    ProxyError,
    CaptchaDetected,
    RateLimited,
    NetworkError,
    AuthError,
    NotFound,
    Unknown,
}

impl ExecutionErrorKind {
    /// String representation used in logs and wire payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::ProxyError => "proxy_error",
            ExecutionErrorKind::CaptchaDetected => "captcha_detected",
            ExecutionErrorKind::RateLimited => "rate_limited",
            ExecutionErrorKind::NetworkError => "network_error",
            ExecutionErrorKind::AuthError => "auth_error",
            ExecutionErrorKind::NotFound => "not_found",
            ExecutionErrorKind::Unknown => "unknown",
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// A missing posting or rejected credentials will not be fixed by
    /// retrying; everything else is considered transient.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ExecutionErrorKind::NotFound | ExecutionErrorKind::AuthError
        )
    }

    /// Best-effort classification from an error message.
    ///
    /// Used when the executor surfaces only a string (e.g. a crashed
    /// subprocess) rather than a structured status.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            ExecutionErrorKind::Timeout
        } else if lower.contains("captcha") {
            ExecutionErrorKind::CaptchaDetected
        } else if lower.contains("proxy") {
            ExecutionErrorKind::ProxyError
        } else if lower.contains("rate limit") || lower.contains("429") {
            ExecutionErrorKind::RateLimited
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
        {
            ExecutionErrorKind::NetworkError
        } else if lower.contains("login")
            || lower.contains("credential")
            || lower.contains("unauthorized")
        {
            ExecutionErrorKind::AuthError
        } else if lower.contains("404") || lower.contains("not found") {
            ExecutionErrorKind::NotFound
        } else {
            ExecutionErrorKind::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionError
// ---------------------------------------------------------------------------

/// An automation failure with its classification attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a bare message, classifying it by content.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = ExecutionErrorKind::classify(&message);
        Self { kind, message }
    }

    /// The enforced-timeout error produced by the adapter wrapper.
    pub fn timed_out(secs: u64) -> Self {
        Self {
            kind: ExecutionErrorKind::Timeout,
            message: format!("Execution exceeded the {secs}s timeout"),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Why a job ended up in the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MaxAttempts,
    Timeout,
    SystemError,
    ValidationError,
}

impl FailureReason {
    /// String representation for records and operational tooling.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::MaxAttempts => "max_attempts",
            FailureReason::Timeout => "timeout",
            FailureReason::SystemError => "system_error",
            FailureReason::ValidationError => "validation_error",
        }
    }

    /// Derive the dead-letter reason from the last observed error kind.
    ///
    /// Repeated timeouts are recorded as `timeout` rather than the generic
    /// `max_attempts`, which is what operators grep for first.
    pub fn from_error_kind(kind: ExecutionErrorKind) -> Self {
        match kind {
            ExecutionErrorKind::Timeout => FailureReason::Timeout,
            ExecutionErrorKind::AuthError | ExecutionErrorKind::NotFound => {
                FailureReason::SystemError
            }
            _ => FailureReason::MaxAttempts,
        }
    }
}
