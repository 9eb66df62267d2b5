//! End-to-end fan-out tests: events published on the bus reach exactly the
//! right WebSocket connections, in order.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;

use jobswipe_api::notifications::StatusEventRouter;
use jobswipe_api::ws::{HubConfig, RealtimeHub};
use jobswipe_events::{EventBus, StatusEvent, StatusEventKind};

fn json_of(msg: Message) -> serde_json::Value {
    match msg {
        Message::Text(t) => serde_json::from_str(t.as_str()).expect("valid JSON frame"),
        other => panic!("expected Text, got: {other:?}"),
    }
}

async fn recv_json(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel open");
    json_of(msg)
}

fn setup() -> (Arc<RealtimeHub>, Arc<EventBus>) {
    let hub = Arc::new(RealtimeHub::new(HubConfig::default()));
    let bus = Arc::new(EventBus::default());

    let router = StatusEventRouter::new(Arc::clone(&hub));
    tokio::spawn(router.run(bus.subscribe()));

    (hub, bus)
}

// ---------------------------------------------------------------------------
// Test: progress stream arrives complete and in order (subscribed client)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_stream_arrives_in_emission_order() {
    let (hub, bus) = setup();

    let mut rx = hub.add("conn-a".to_string()).await;
    hub.authenticate("conn-a", "user-123", "web").await;

    let job_id = uuid::Uuid::new_v4();
    for percent in [25, 50, 75, 100] {
        bus.publish(
            StatusEvent::new(StatusEventKind::Progress, job_id, "user-123")
                .with_payload(serde_json::json!({"progress": percent})),
        );
    }
    bus.publish(StatusEvent::new(
        StatusEventKind::Completed,
        job_id,
        "user-123",
    ));

    for expected in [25, 50, 75, 100] {
        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "update");
        assert_eq!(frame["event"], "automation-progress");
        assert_eq!(frame["data"]["progress"], expected);
    }

    let done = recv_json(&mut rx).await;
    assert_eq!(done["type"], "update");
    assert_eq!(done["event"], "application-status");
    assert_eq!(done["data"]["status"], "completed");
}

// ---------------------------------------------------------------------------
// Test: cross-tenant isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_reach_only_the_owning_user() {
    let (hub, bus) = setup();

    let mut rx_a = hub.add("conn-a".to_string()).await;
    let mut rx_b = hub.add("conn-b".to_string()).await;
    hub.authenticate("conn-a", "user-123", "web").await;
    hub.authenticate("conn-b", "user-456", "web").await;

    bus.publish(StatusEvent::new(
        StatusEventKind::Completed,
        uuid::Uuid::new_v4(),
        "user-123",
    ));

    let frame = recv_json(&mut rx_a).await;
    assert_eq!(frame["user_id"], "user-123");
    assert_eq!(frame["data"]["status"], "completed");

    // Give the router time to (incorrectly) deliver before asserting silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        rx_b.try_recv().is_err(),
        "user-456 must not see user-123's events"
    );
}

// ---------------------------------------------------------------------------
// Test: desktop availability goes to the desktop channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn desktop_availability_reaches_desktop_devices() {
    let (hub, bus) = setup();

    let mut rx_desktop = hub.add("conn-d".to_string()).await;
    let mut rx_web = hub.add("conn-w".to_string()).await;
    // The desktop device belongs to a different user entirely; availability
    // is fleet-wide, not per-owner.
    hub.authenticate("conn-d", "user-999", "desktop").await;
    hub.authenticate("conn-w", "user-123", "web").await;

    let job_id = uuid::Uuid::new_v4();
    bus.publish(
        StatusEvent::new(StatusEventKind::DesktopAvailable, job_id, "user-123")
            .with_payload(serde_json::json!({"title": "Engineer"})),
    );

    let frame = recv_json(&mut rx_desktop).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["event"], "job-available");
    assert_eq!(frame["data"]["application_id"], job_id.to_string());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        rx_web.try_recv().is_err(),
        "web clients do not receive availability pushes"
    );
}
