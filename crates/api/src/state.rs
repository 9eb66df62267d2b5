use std::sync::Arc;

use crate::config::ServerConfig;
use crate::ws::RealtimeHub;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Constructed once in `main` and injected everywhere — no module-level
/// singletons. Cheaply cloneable (all fields are behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Authoritative job store and claim protocol.
    pub broker: Arc<jobswipe_queue::QueueBroker>,
    /// Permanent home for exhausted jobs.
    pub dead_letters: Arc<jobswipe_queue::DeadLetterStore>,
    /// WebSocket connection registry and fan-out.
    pub hub: Arc<RealtimeHub>,
    /// Internal lifecycle event bus.
    pub event_bus: Arc<jobswipe_events::EventBus>,
    /// Server-resident worker pool (for health reporting).
    pub worker: Arc<jobswipe_worker::JobWorkerPool>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
