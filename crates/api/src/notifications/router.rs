//! Event-to-WebSocket routing engine.
//!
//! [`StatusEventRouter`] subscribes to the status event bus and pushes each
//! event to the right WebSocket audience: job lifecycle updates go to the
//! owning user's connections, desktop availability announcements go to the
//! desktop device channel.

use std::sync::Arc;

use tokio::sync::broadcast;

use jobswipe_core::wire;
use jobswipe_events::{StatusEvent, StatusEventKind};

use crate::ws::{RealtimeHub, ServerMessage};

/// Routes status events to connected WebSocket clients.
pub struct StatusEventRouter {
    hub: Arc<RealtimeHub>,
}

impl StatusEventRouter {
    pub fn new(hub: Arc<RealtimeHub>) -> Self {
        Self { hub }
    }

    /// Run the main routing loop.
    ///
    /// Consumes events from the bus via `receiver`; exits when the channel
    /// closes (i.e. the [`EventBus`](jobswipe_events::EventBus) is dropped
    /// at shutdown). Lagging is logged and tolerated — delivery is
    /// best-effort and clients resynchronize over REST.
    pub async fn run(self, mut receiver: broadcast::Receiver<StatusEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.route_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Status event router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, status event router shutting down");
                    break;
                }
            }
        }
    }

    /// Deliver a single event to its audience.
    async fn route_event(&self, event: &StatusEvent) {
        match event.kind {
            // Availability announcements address the desktop fleet, not the
            // owning user: whichever desktop claims first wins.
            StatusEventKind::DesktopAvailable => {
                let msg = ServerMessage::notification(
                    "job-available",
                    serde_json::json!({
                        "application_id": event.job_id,
                        "payload": event.payload,
                    }),
                );
                let sent = self
                    .hub
                    .send_to_channel(wire::device_channel("desktop").as_str(), msg.to_message())
                    .await;
                tracing::debug!(job_id = %event.job_id, sent, "Desktop availability fan-out");
            }

            // Progress streams to the owning user's connections.
            StatusEventKind::Progress => {
                let msg = ServerMessage::update(
                    wire::UPDATE_AUTOMATION_PROGRESS,
                    Some(event.user_id.clone()),
                    serde_json::json!({
                        "application_id": event.job_id,
                        "progress": event.payload.get("progress"),
                        "message": event.payload.get("message"),
                    }),
                );
                self.hub
                    .send_to_user(&event.user_id, msg.to_message())
                    .await;
            }

            // Everything else is an application-status update for the user.
            kind => {
                let msg = ServerMessage::update(
                    wire::UPDATE_APPLICATION_STATUS,
                    Some(event.user_id.clone()),
                    serde_json::json!({
                        "application_id": event.job_id,
                        "status": kind.as_str(),
                        "payload": event.payload,
                    }),
                );
                self.hub
                    .send_to_user(&event.user_id, msg.to_message())
                    .await;
            }
        }
    }
}
