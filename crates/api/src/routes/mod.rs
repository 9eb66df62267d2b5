//! Route registration.

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::ws;

pub mod applications;
pub mod desktop;
pub mod health;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Submission + status.
        .route("/applications", post(applications::submit_application))
        .route("/applications/{id}", get(applications::get_application))
        // Desktop coordinator endpoints.
        .route("/desktop/claim", post(desktop::claim))
        .route("/desktop/progress", post(desktop::progress))
        .route("/desktop/complete", post(desktop::complete))
        // Realtime.
        .route("/ws", get(ws::ws_handler))
}
