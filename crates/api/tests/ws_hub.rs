//! Unit tests for `RealtimeHub`.
//!
//! These exercise the connection registry directly, without performing any
//! HTTP upgrades. They verify add/remove idempotence, the authentication
//! state machine, the subscription allow-list, multi-device fan-out, and
//! liveness pruning.

use std::time::Duration;

use axum::extract::ws::Message;

use jobswipe_api::ws::{HubConfig, RealtimeHub};

fn hub() -> RealtimeHub {
    RealtimeHub::new(HubConfig {
        ping_interval: Duration::from_secs(30),
        auth_timeout: Duration::from_secs(60),
    })
}

fn text_of(msg: &Message) -> &str {
    match msg {
        Message::Text(t) => t.as_str(),
        other => panic!("expected Text, got: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: connection lifecycle and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_hub_has_zero_connections() {
    assert_eq!(hub().connection_count().await, 0);
}

#[tokio::test]
async fn add_and_remove_track_count() {
    let hub = hub();

    let _rx = hub.add("conn-1".to_string()).await;
    assert_eq!(hub.connection_count().await, 1);

    hub.remove("conn-1").await;
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let hub = hub();

    let _rx = hub.add("conn-1".to_string()).await;
    // Both `error` and `close` can fire for the same socket: removing twice
    // (and removing an unknown id) must be harmless.
    hub.remove("conn-1").await;
    hub.remove("conn-1").await;
    hub.remove("never-existed").await;

    assert_eq!(hub.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: authentication auto-subscribes own channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authenticate_subscribes_user_and_device_channels() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;

    assert!(hub.authenticate("conn-1", "user-123", "web").await);

    let subs = hub.subscriptions("conn-1").await;
    assert!(subs.contains(&"user:user-123".to_string()));
    assert!(subs.contains(&"device:web".to_string()));

    assert_eq!(hub.user_connection_ids("user-123").await, vec!["conn-1"]);
}

#[tokio::test]
async fn authenticate_unknown_connection_fails() {
    assert!(!hub().authenticate("ghost", "user-1", "web").await);
}

// ---------------------------------------------------------------------------
// Test: subscription allow-list
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_channels_are_silently_rejected() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;
    hub.authenticate("conn-1", "user-123", "web").await;

    let accepted = hub
        .subscribe(
            "conn-1",
            &[
                "user:user-456".to_string(),   // foreign user
                "device:desktop".to_string(),  // foreign device type
                "system".to_string(),          // allowed
            ],
        )
        .await;

    assert_eq!(accepted, vec!["system".to_string()]);

    let subs = hub.subscriptions("conn-1").await;
    assert!(!subs.contains(&"user:user-456".to_string()));
    assert!(!subs.contains(&"device:desktop".to_string()));
    assert!(subs.contains(&"system".to_string()));
}

#[tokio::test]
async fn unauthenticated_subscribe_is_refused() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;

    let accepted = hub.subscribe("conn-1", &["system".to_string()]).await;
    assert!(accepted.is_empty());
}

#[tokio::test]
async fn unsubscribe_drops_channels() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;
    hub.authenticate("conn-1", "user-123", "web").await;

    hub.unsubscribe("conn-1", &["user:user-123".to_string()]).await;
    let subs = hub.subscriptions("conn-1").await;
    assert!(!subs.contains(&"user:user-123".to_string()));
}

// ---------------------------------------------------------------------------
// Test: user fan-out and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_user_reaches_all_devices_of_that_user_only() {
    let hub = hub();

    let mut rx_a1 = hub.add("a1".to_string()).await;
    let mut rx_a2 = hub.add("a2".to_string()).await;
    let mut rx_b = hub.add("b".to_string()).await;

    hub.authenticate("a1", "user-123", "web").await;
    hub.authenticate("a2", "user-123", "mobile").await;
    hub.authenticate("b", "user-456", "web").await;

    let sent = hub
        .send_to_user("user-123", Message::Text("status update".into()))
        .await;
    assert_eq!(sent, 2, "both of user-123's devices must receive it");

    assert_eq!(text_of(&rx_a1.recv().await.expect("a1 message")), "status update");
    assert_eq!(text_of(&rx_a2.recv().await.expect("a2 message")), "status update");

    // user-456 must receive nothing.
    assert!(
        rx_b.try_recv().is_err(),
        "cross-tenant delivery is forbidden"
    );
}

#[tokio::test]
async fn send_to_user_with_no_connections_is_noop() {
    let hub = hub();
    let sent = hub
        .send_to_user("nobody", Message::Text("hello".into()))
        .await;
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn unauthenticated_connections_get_no_fanout() {
    let hub = hub();
    let mut rx = hub.add("conn-1".to_string()).await;

    hub.broadcast(Message::Text("for members only".into())).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn send_to_channel_reaches_subscribers() {
    let hub = hub();

    let mut rx_desktop = hub.add("d1".to_string()).await;
    let mut rx_web = hub.add("w1".to_string()).await;
    hub.authenticate("d1", "user-1", "desktop").await;
    hub.authenticate("w1", "user-2", "web").await;

    let sent = hub
        .send_to_channel("device:desktop", Message::Text("job available".into()))
        .await;

    assert_eq!(sent, 1);
    assert_eq!(
        text_of(&rx_desktop.recv().await.expect("desktop message")),
        "job available"
    );
    assert!(rx_web.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_skips_closed_channels() {
    let hub = hub();

    let rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;
    hub.authenticate("conn-1", "u1", "web").await;
    hub.authenticate("conn-2", "u2", "web").await;

    // Drop rx1 to close its channel; delivery to conn-2 must be unaffected.
    drop(rx1);
    hub.broadcast(Message::Text("still alive".into())).await;

    assert_eq!(
        text_of(&rx2.recv().await.expect("conn-2 message")),
        "still alive"
    );
}

// ---------------------------------------------------------------------------
// Test: disconnect cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_cleans_user_index() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;
    hub.authenticate("conn-1", "user-123", "web").await;

    hub.remove("conn-1").await;

    assert!(hub.user_connection_ids("user-123").await.is_empty());
    // A send after cleanup is a safe no-op.
    assert_eq!(
        hub.send_to_user("user-123", Message::Text("late".into()))
            .await,
        0
    );
}

// ---------------------------------------------------------------------------
// Test: liveness pruning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthenticated_connection_is_pruned_after_auth_timeout() {
    let hub = hub();
    let mut rx = hub.add("conn-1".to_string()).await;

    // Before the timeout: untouched.
    let pruned = hub.prune_stale(chrono::Utc::now()).await;
    assert!(pruned.is_empty());

    // Past the 60s auth timeout: force-closed.
    let later = chrono::Utc::now() + chrono::Duration::seconds(61);
    let pruned = hub.prune_stale(later).await;
    assert_eq!(pruned, vec!["conn-1".to_string()]);
    assert_eq!(hub.connection_count().await, 0);

    // The client saw a Close frame.
    let msg = rx.recv().await.expect("close frame");
    assert!(matches!(msg, Message::Close(None)));
}

#[tokio::test]
async fn silent_authenticated_connection_is_pruned() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;
    hub.authenticate("conn-1", "user-1", "web").await;

    // Authenticated but silent past 2 x ping interval (60s).
    let later = chrono::Utc::now() + chrono::Duration::seconds(61);
    let pruned = hub.prune_stale(later).await;

    assert_eq!(pruned, vec!["conn-1".to_string()]);
    assert!(hub.user_connection_ids("user-1").await.is_empty());
}

#[tokio::test]
async fn active_authenticated_connection_survives_pruning() {
    let hub = hub();
    let _rx = hub.add("conn-1".to_string()).await;
    hub.authenticate("conn-1", "user-1", "web").await;

    // Recent activity within the window.
    let soon = chrono::Utc::now() + chrono::Duration::seconds(30);
    let pruned = hub.prune_stale(soon).await;

    assert!(pruned.is_empty());
    assert_eq!(hub.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let hub = hub();

    let mut rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;
    hub.authenticate("conn-1", "u1", "web").await;

    hub.shutdown_all().await;

    assert_eq!(hub.connection_count().await, 0);
    assert!(hub.user_connection_ids("u1").await.is_empty());

    assert!(matches!(
        rx1.recv().await.expect("close 1"),
        Message::Close(None)
    ));
    assert!(matches!(
        rx2.recv().await.expect("close 2"),
        Message::Close(None)
    ));

    // After Close, the channels are done.
    assert!(rx1.recv().await.is_none());
}
