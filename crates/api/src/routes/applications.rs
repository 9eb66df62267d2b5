//! Submission and status endpoints for job applications.
//!
//! The submission body is validated here, once, before the job enters the
//! broker; invalid envelopes never reach a queue.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use jobswipe_core::ats::AtsKind;
use jobswipe_core::{Job, JobId, JobSubmission, Timestamp};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Response for POST /applications.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Client-facing job snapshot. Deliberately omits the profile snapshot and
/// internal bookkeeping.
#[derive(Debug, Serialize)]
pub struct ApplicationView {
    pub id: JobId,
    pub status: &'static str,
    pub priority: &'static str,
    pub execution_mode: &'static str,
    pub attempts: u32,
    pub max_attempts: u32,
    pub title: String,
    pub company: String,
    /// Job board detected from the apply URL (`greenhouse`, `lever`, ...).
    pub job_board: &'static str,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub confirmation_number: Option<String>,
}

impl From<Job> for ApplicationView {
    fn from(job: Job) -> Self {
        let confirmation_number = job
            .result
            .as_ref()
            .and_then(|r| r.confirmation_number.clone());
        let job_board = AtsKind::detect(&job.payload.apply_url).as_str();
        Self {
            id: job.id,
            status: job.status.as_str(),
            priority: job.priority.as_str(),
            execution_mode: job.execution_mode.as_str(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            title: job.payload.title,
            company: job.payload.company,
            job_board,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            next_retry_at: job.next_retry_at,
            last_error: job.last_error,
            confirmation_number,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/applications
///
/// Create a job in the queue from a validated submission envelope.
pub async fn submit_application(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> AppResult<impl IntoResponse> {
    if submission.options.timeout_secs > state.config.max_execution_timeout_secs {
        return Err(AppError::BadRequest(format!(
            "timeout_secs may not exceed {}",
            state.config.max_execution_timeout_secs
        )));
    }

    let job_id = state.broker.submit(submission).await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(DataResponse {
            data: SubmitResponse { job_id },
        }),
    ))
}

/// GET /api/v1/applications/{id}
///
/// Status snapshot — the resynchronization source for clients whose
/// WebSocket connection dropped (events are not replayed).
pub async fn get_application(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .broker
        .get(job_id)
        .await
        .ok_or(AppError::Broker(jobswipe_queue::BrokerError::NotFound(
            job_id,
        )))?;

    Ok(Json(DataResponse {
        data: ApplicationView::from(job),
    }))
}
