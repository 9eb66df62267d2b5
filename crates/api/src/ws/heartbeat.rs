//! Heartbeat and liveness enforcement for the realtime hub.

use std::sync::Arc;

use crate::ws::hub::RealtimeHub;

/// Spawn a background task that pings all clients and prunes stale
/// connections on every interval.
///
/// A connection is pruned when it is unauthenticated past the auth timeout
/// or silent beyond twice the ping interval. The returned `JoinHandle` is
/// aborted during shutdown.
pub fn start_heartbeat(hub: Arc<RealtimeHub>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(hub.config().ping_interval);

        loop {
            interval.tick().await;
            let count = hub.connection_count().await;
            tracing::debug!(count, "WebSocket heartbeat ping");
            hub.ping_all().await;

            let pruned = hub.prune_stale(chrono::Utc::now()).await;
            if !pruned.is_empty() {
                tracing::info!(count = pruned.len(), "Pruned stale connections");
            }
        }
    })
}
