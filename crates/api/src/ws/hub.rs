//! Realtime connection registry and fan-out.
//!
//! [`RealtimeHub`] tracks every WebSocket connection, its authentication
//! state, and its channel subscriptions. Delivery is best-effort: a send to
//! a dead connection is skipped and affects that connection only. All map
//! mutations are idempotent because `error` and `close` can both fire for
//! the same socket.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

use jobswipe_core::{wire, Timestamp};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Liveness and auth tunables for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Heartbeat ping cadence. A connection silent for more than twice
    /// this interval is considered dead.
    pub ping_interval: Duration,
    /// How long an unauthenticated connection may stay open.
    pub auth_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(60),
        }
    }
}

/// Metadata for a single WebSocket connection.
struct Connection {
    /// Authenticated user id, set by a valid `auth` message.
    user_id: Option<String>,
    /// Device type declared at authentication (`web`, `desktop`, `mobile`).
    device_type: Option<String>,
    sender: WsSender,
    subscriptions: HashSet<String>,
    authenticated: bool,
    connected_at: Timestamp,
    /// Last inbound activity (message, ping, or pong).
    last_seen_at: Timestamp,
}

struct HubState {
    connections: HashMap<String, Connection>,
    /// Index: user id -> connection ids (a user may own many connections).
    by_user: HashMap<String, HashSet<String>>,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct RealtimeHub {
    config: HubConfig,
    state: RwLock<HubState>,
}

impl RealtimeHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HubState {
                connections: HashMap::new(),
                by_user: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Register a new (unauthenticated) connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = chrono::Utc::now();
        let conn = Connection {
            user_id: None,
            device_type: None,
            sender: tx,
            subscriptions: HashSet::new(),
            authenticated: false,
            connected_at: now,
            last_seen_at: now,
        };
        self.state.write().await.connections.insert(conn_id, conn);
        rx
    }

    /// Promote a connection to authenticated and auto-subscribe it to its
    /// own user and device channels. Idempotent.
    ///
    /// Returns `false` if the connection is unknown (already cleaned up).
    pub async fn authenticate(&self, conn_id: &str, user_id: &str, device_type: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.get_mut(conn_id) else {
            return false;
        };

        conn.authenticated = true;
        conn.user_id = Some(user_id.to_string());
        conn.device_type = Some(device_type.to_string());
        conn.subscriptions.insert(wire::user_channel(user_id));
        conn.subscriptions.insert(wire::device_channel(device_type));
        conn.last_seen_at = chrono::Utc::now();

        state
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id.to_string());

        tracing::info!(conn_id, user_id, device_type, "Connection authenticated");
        true
    }

    /// Remove a connection and purge it from all indexes. Idempotent.
    pub async fn remove(&self, conn_id: &str) {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.remove(conn_id) else {
            return;
        };
        if let Some(user_id) = conn.user_id {
            if let Some(ids) = state.by_user.get_mut(&user_id) {
                ids.remove(conn_id);
                if ids.is_empty() {
                    state.by_user.remove(&user_id);
                }
            }
        }
    }

    /// Record inbound activity for liveness tracking.
    pub async fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.state.write().await.connections.get_mut(conn_id) {
            conn.last_seen_at = chrono::Utc::now();
        }
    }

    // -- Subscriptions ------------------------------------------------------

    /// Subscribe an authenticated connection to the requested channels.
    ///
    /// Channels failing the allow-list (foreign users, foreign devices) are
    /// dropped silently — logged server-side, no error to the client — to
    /// avoid leaking which channels exist.
    pub async fn subscribe(&self, conn_id: &str, channels: &[String]) -> Vec<String> {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.get_mut(conn_id) else {
            return Vec::new();
        };
        if !conn.authenticated {
            return Vec::new();
        }
        let (Some(user_id), Some(device_type)) = (conn.user_id.clone(), conn.device_type.clone())
        else {
            return Vec::new();
        };

        let mut accepted = Vec::new();
        for channel in channels {
            if wire::channel_allowed(channel, &user_id, &device_type) {
                conn.subscriptions.insert(channel.clone());
                accepted.push(channel.clone());
            } else {
                tracing::warn!(
                    conn_id,
                    user_id = %user_id,
                    channel = %channel,
                    "Rejected subscription to foreign channel"
                );
            }
        }
        accepted
    }

    /// Drop channel subscriptions (own-channel auto-subscriptions included).
    pub async fn unsubscribe(&self, conn_id: &str, channels: &[String]) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.get_mut(conn_id) {
            for channel in channels {
                conn.subscriptions.remove(channel);
            }
        }
    }

    /// Current subscriptions of a connection (diagnostics and tests).
    pub async fn subscriptions(&self, conn_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .connections
            .get(conn_id)
            .map(|c| c.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    // -- Delivery -----------------------------------------------------------

    /// Send to one specific connection (authenticated or not).
    ///
    /// Used for protocol replies (auth acks, pongs, errors). Returns `false`
    /// if the connection is unknown or its channel is closed.
    pub async fn send_to_connection(&self, conn_id: &str, message: Message) -> bool {
        let state = self.state.read().await;
        match state.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send to every open, authenticated connection owned by `user_id`.
    ///
    /// Returns the number of connections the message was sent to. A user
    /// with zero connections is a safe no-op.
    pub async fn send_to_user(&self, user_id: &str, message: Message) -> usize {
        let state = self.state.read().await;
        let Some(ids) = state.by_user.get(user_id) else {
            return 0;
        };
        let mut count = 0;
        for conn_id in ids {
            if let Some(conn) = state.connections.get(conn_id) {
                if conn.authenticated && conn.sender.send(message.clone()).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Send to every connection subscribed to `channel`.
    pub async fn send_to_channel(&self, channel: &str, message: Message) -> usize {
        let state = self.state.read().await;
        let mut count = 0;
        for conn in state.connections.values() {
            if conn.authenticated
                && conn.subscriptions.contains(channel)
                && conn.sender.send(message.clone()).is_ok()
            {
                count += 1;
            }
        }
        count
    }

    /// Broadcast to all authenticated connections.
    ///
    /// Connections whose send channels are closed are silently skipped
    /// (they will be cleaned up on their next receive loop iteration).
    pub async fn broadcast(&self, message: Message) {
        let state = self.state.read().await;
        for conn in state.connections.values() {
            if conn.authenticated {
                let _ = conn.sender.send(message.clone());
            }
        }
    }

    // -- Liveness -----------------------------------------------------------

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Connection ids currently owned by a user (tests and diagnostics).
    pub async fn user_connection_ids(&self, user_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let state = self.state.read().await;
        for conn in state.connections.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Disconnect connections that overstayed: unauthenticated ones past the
    /// auth timeout, and any connection silent beyond `2 x ping_interval`.
    ///
    /// Returns the ids that were closed.
    pub async fn prune_stale(&self, now: Timestamp) -> Vec<String> {
        let auth_deadline = chrono::Duration::from_std(self.config.auth_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let silence_deadline = chrono::Duration::from_std(self.config.ping_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let stale: Vec<String> = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .filter(|(_, conn)| {
                    let auth_expired =
                        !conn.authenticated && now - conn.connected_at > auth_deadline;
                    let silent = now - conn.last_seen_at > silence_deadline;
                    auth_expired || silent
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for conn_id in &stale {
            tracing::info!(conn_id = %conn_id, "Closing stale connection");
            if let Some(conn) = self.state.read().await.connections.get(conn_id) {
                let _ = conn.sender.send(Message::Close(None));
            }
            self.remove(conn_id).await;
        }

        stale
    }

    /// Send a Close frame to every connection, then clear all maps.
    ///
    /// Used during graceful shutdown to notify clients before the server
    /// stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut state = self.state.write().await;
        let count = state.connections.len();
        for conn in state.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        state.connections.clear();
        state.by_user.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
