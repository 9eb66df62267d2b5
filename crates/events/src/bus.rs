//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`StatusEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.
//! Delivery is best-effort: with no subscribers an event is dropped, and a
//! lagging subscriber observes `RecvError::Lagged` rather than blocking
//! publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use jobswipe_core::{JobId, UserId};

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventKind {
    Queued,
    QueuedForDesktop,
    /// A desktop-mode job is available for claiming (pushed to the
    /// desktop device channel, not to the owning user).
    DesktopAvailable,
    Claimed,
    Started,
    Progress,
    Completed,
    Retrying,
    DeadLettered,
    Cancelled,
}

impl StatusEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusEventKind::Queued => "queued",
            StatusEventKind::QueuedForDesktop => "queued_for_desktop",
            StatusEventKind::DesktopAvailable => "desktop_available",
            StatusEventKind::Claimed => "claimed",
            StatusEventKind::Started => "started",
            StatusEventKind::Progress => "progress",
            StatusEventKind::Completed => "completed",
            StatusEventKind::Retrying => "retrying",
            StatusEventKind::DeadLettered => "dead_lettered",
            StatusEventKind::Cancelled => "cancelled",
        }
    }
}

/// A job lifecycle event.
///
/// Constructed via [`StatusEvent::new`] and enriched with
/// [`with_payload`](StatusEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub kind: StatusEventKind,

    /// The job the event concerns.
    pub job_id: JobId,

    /// The user owning the application.
    pub user_id: UserId,

    /// Free-form JSON payload carrying event-specific data
    /// (progress percent, error message, confirmation number, ...).
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Create a new event with an empty payload.
    pub fn new(kind: StatusEventKind, job_id: JobId, user_id: impl Into<UserId>) -> Self {
        Self {
            kind,
            job_id,
            user_id: user_id.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`StatusEvent`].
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// realtime delivery is best-effort and clients resynchronize over REST.
    pub fn publish(&self, event: StatusEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let job_id = uuid::Uuid::new_v4();
        let event = StatusEvent::new(StatusEventKind::Completed, job_id, "user-7")
            .with_payload(serde_json::json!({"confirmation_number": "CONF123456"}));

        bus.publish(event);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.kind, StatusEventKind::Completed);
        assert_eq!(received.job_id, job_id);
        assert_eq!(received.user_id, "user-7");
        assert_eq!(received.payload["confirmation_number"], "CONF123456");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let job_id = uuid::Uuid::new_v4();
        bus.publish(StatusEvent::new(StatusEventKind::Queued, job_id, "u1"));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.kind, StatusEventKind::Queued);
        assert_eq!(e2.kind, StatusEventKind::Queued);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        // No subscribers — this must not panic.
        bus.publish(StatusEvent::new(
            StatusEventKind::Cancelled,
            uuid::Uuid::new_v4(),
            "orphan",
        ));
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job_id = uuid::Uuid::new_v4();

        for percent in [25, 50, 75, 100] {
            bus.publish(
                StatusEvent::new(StatusEventKind::Progress, job_id, "u1")
                    .with_payload(serde_json::json!({"progress": percent})),
            );
        }
        bus.publish(StatusEvent::new(StatusEventKind::Completed, job_id, "u1"));

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv().await.expect("event"));
        }

        assert_eq!(seen[0].payload["progress"], 25);
        assert_eq!(seen[1].payload["progress"], 50);
        assert_eq!(seen[2].payload["progress"], 75);
        assert_eq!(seen[3].payload["progress"], 100);
        assert_eq!(seen[4].kind, StatusEventKind::Completed);
    }
}
