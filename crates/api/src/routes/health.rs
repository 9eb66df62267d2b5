use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use jobswipe_queue::QueueCounts;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Queue statistics.
    pub counts: QueueCounts,
    /// Whether the worker pool claim loop is running.
    pub worker_running: bool,
    /// Worker pool concurrency cap.
    pub concurrency: usize,
}

/// GET /health -- returns service, queue, and worker health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.broker.counts().await;
    let worker_running = state.worker.is_running();

    let status = if worker_running { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        counts,
        worker_running,
        concurrency: state.worker.concurrency(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
