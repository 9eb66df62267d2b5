//! Periodic broker maintenance.
//!
//! Spawns-friendly loop that promotes due retries, reclaims stalled claims,
//! and prunes old completed jobs. Runs on a fixed interval until the
//! cancellation token is triggered.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::QueueBroker;

/// Default cadence for the maintenance sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Run the broker maintenance loop.
///
/// Intended to be spawned once at startup:
///
/// ```ignore
/// tokio::spawn(run_maintenance(Arc::clone(&broker), None, cancel.clone()));
/// ```
pub async fn run_maintenance(
    broker: Arc<QueueBroker>,
    interval: Option<Duration>,
    cancel: CancellationToken,
) {
    let interval = interval.unwrap_or(DEFAULT_SWEEP_INTERVAL);
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "Queue maintenance started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Queue maintenance stopping");
                break;
            }
            _ = ticker.tick() => {
                broker.run_sweeps().await;
            }
        }
    }
}
