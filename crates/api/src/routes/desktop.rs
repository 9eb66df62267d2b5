//! Desktop coordinator endpoints: claim, progress, complete.
//!
//! The desktop never mutates broker state directly; these authenticated
//! routes are its only write path. The claim response carries the authority
//! token the desktop must present for its terminal report.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobswipe_core::{
    AutomationResult, ExecutionErrorKind, Job, JobId, JobPayload, UserProfileSnapshot,
};
use crate::auth::AuthDevice;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Request body for POST /desktop/claim.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub application_id: JobId,
}

/// What the desktop needs to execute a granted claim.
#[derive(Debug, Serialize)]
pub struct ClaimedJob {
    pub application_id: JobId,
    pub payload: JobPayload,
    pub profile: UserProfileSnapshot,
    pub timeout_secs: u64,
    pub headless: bool,
}

impl From<Job> for ClaimedJob {
    fn from(job: Job) -> Self {
        Self {
            application_id: job.id,
            timeout_secs: job.options.timeout_secs,
            headless: job.options.headless,
            payload: job.payload,
            profile: job.profile,
        }
    }
}

/// Response for POST /desktop/claim.
///
/// `granted: false` is a normal outcome (another device won the race), not
/// an error.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<ClaimedJob>,
}

/// Request body for POST /desktop/progress.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub application_id: JobId,
    pub progress: u8,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Request body for POST /desktop/complete.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub application_id: JobId,
    /// Authority token issued by the claim.
    pub token: Uuid,
    pub success: bool,
    #[serde(default)]
    pub result: Option<AutomationResult>,
    #[serde(default)]
    pub error: Option<String>,
    /// The execution was cancelled by the user, not failed.
    #[serde(default)]
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/desktop/claim
///
/// Atomic compare-and-swap claim on a desktop-queued job. Exactly one of
/// any number of racing devices is granted the claim; every other caller
/// receives `granted: false` and must drop the job with no side effects.
pub async fn claim(
    auth: AuthDevice,
    State(state): State<AppState>,
    Json(input): Json<ClaimRequest>,
) -> AppResult<impl IntoResponse> {
    let device = format!("{}:{}", auth.user_id, auth.device_type);

    match state.broker.claim_desktop(input.application_id, &device).await {
        Ok(claim) => {
            tracing::info!(
                job_id = %input.application_id,
                device = %device,
                "Desktop claim granted"
            );
            Ok(Json(DataResponse {
                data: ClaimResponse {
                    granted: true,
                    token: Some(claim.token),
                    job: Some(ClaimedJob::from(claim.job)),
                },
            }))
        }
        Err(e) if e.is_conflict() => Ok(Json(DataResponse {
            data: ClaimResponse {
                granted: false,
                token: None,
                job: None,
            },
        })),
        Err(e) => Err(AppError::Broker(e)),
    }
}

/// POST /api/v1/desktop/progress
///
/// Progress report from a running desktop execution; fans out to the
/// owning user's connections via the event bus.
pub async fn progress(
    _auth: AuthDevice,
    State(state): State<AppState>,
    Json(input): Json<ProgressRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .broker
        .progress(input.application_id, input.progress, input.message)
        .await?;

    if let Some(status) = input.status {
        tracing::debug!(
            job_id = %input.application_id,
            status = %status,
            "Desktop execution status"
        );
    }

    Ok(Json(DataResponse { data: "ok" }))
}

/// POST /api/v1/desktop/complete
///
/// Terminal report for a desktop execution. Requires the claim's authority
/// token; a stale token (job reclaimed after a stall) is rejected with 409.
pub async fn complete(
    _auth: AuthDevice,
    State(state): State<AppState>,
    Json(input): Json<CompleteRequest>,
) -> AppResult<impl IntoResponse> {
    let job_id = input.application_id;

    if input.cancelled {
        state.broker.cancel(job_id, Some(input.token)).await?;
        return Ok(Json(DataResponse { data: "cancelled" }));
    }

    if input.success {
        let result = input
            .result
            .unwrap_or_else(|| AutomationResult::succeeded(None));
        state.broker.ack(job_id, input.token, result).await?;
        return Ok(Json(DataResponse { data: "completed" }));
    }

    let message = input
        .error
        .or_else(|| {
            input
                .result
                .as_ref()
                .and_then(|r| r.error_message.clone())
        })
        .unwrap_or_else(|| "Desktop execution failed".to_string());
    let kind = input
        .result
        .as_ref()
        .map(|r| classify_reported_result(r))
        .unwrap_or_else(|| ExecutionErrorKind::classify(&message));

    state.broker.nack(job_id, input.token, &message, kind).await?;
    Ok(Json(DataResponse { data: "failed" }))
}

/// Map a reported desktop result onto the retry taxonomy.
fn classify_reported_result(result: &AutomationResult) -> ExecutionErrorKind {
    use jobswipe_core::ApplicationStatus;
    match result.status {
        ApplicationStatus::Timeout => ExecutionErrorKind::Timeout,
        ApplicationStatus::CaptchaRequired => ExecutionErrorKind::CaptchaDetected,
        ApplicationStatus::LoginRequired => ExecutionErrorKind::AuthError,
        ApplicationStatus::RateLimited => ExecutionErrorKind::RateLimited,
        ApplicationStatus::NetworkError => ExecutionErrorKind::NetworkError,
        _ => result
            .error_message
            .as_deref()
            .map(ExecutionErrorKind::classify)
            .unwrap_or(ExecutionErrorKind::Unknown),
    }
}
