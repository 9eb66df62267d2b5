//! WebSocket upgrade handler and per-connection message loop.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::auth;
use crate::state::AppState;
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the hub and managed
/// by two tasks (sender + receiver). Authentication happens in-band via an
/// `auth` message; unauthenticated connections are pruned by the heartbeat.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the hub.
///   2. Spawns a sender task forwarding hub messages to the sink.
///   3. Dispatches inbound protocol messages on the current task.
///   4. Cleans up on disconnect (idempotent with the heartbeat's pruning).
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = state.hub.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Greet the client so it knows the protocol is live.
    send_to(
        &state,
        &conn_id,
        ServerMessage::system(serde_json::json!({ "message": "connected" })),
    )
    .await;

    // Receiver loop: dispatch inbound protocol messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                state.hub.touch(&conn_id).await;
            }
            Ok(Message::Text(text)) => {
                state.hub.touch(&conn_id).await;
                dispatch(&state, &conn_id, text.as_str()).await;
            }
            Ok(_) => {
                // Binary frames are not part of the protocol; ignore.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: remove connection and abort sender task.
    state.hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Parse and handle one inbound text frame.
async fn dispatch(state: &AppState, conn_id: &str, raw: &str) {
    let parsed: ClientMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(conn_id, error = %e, "Unparseable client message");
            send_to(state, conn_id, ServerMessage::error("Malformed message")).await;
            return;
        }
    };

    match parsed {
        ClientMessage::Auth {
            token,
            device_type,
            device_id,
        } => handle_auth(state, conn_id, &token, &device_type, device_id).await,

        ClientMessage::Subscribe { channels } => {
            let accepted = state.hub.subscribe(conn_id, &channels).await;
            send_to(
                state,
                conn_id,
                ServerMessage::response("subscribe", serde_json::json!({ "channels": accepted })),
            )
            .await;
        }

        ClientMessage::Unsubscribe { channels } => {
            state.hub.unsubscribe(conn_id, &channels).await;
            send_to(
                state,
                conn_id,
                ServerMessage::response("unsubscribe", serde_json::json!({ "channels": channels })),
            )
            .await;
        }

        ClientMessage::Ping => {
            send_to(state, conn_id, ServerMessage::pong()).await;
        }

        ClientMessage::Request { event, data } => handle_request(state, conn_id, &event, data).await,
    }
}

/// Validate the token and promote the connection.
async fn handle_auth(
    state: &AppState,
    conn_id: &str,
    token: &str,
    device_type: &str,
    device_id: Option<String>,
) {
    match auth::validate_token(token, &state.config.jwt) {
        Ok(claims) => {
            state
                .hub
                .authenticate(conn_id, &claims.sub, device_type)
                .await;
            tracing::info!(
                conn_id,
                user_id = %claims.sub,
                device_type,
                device_id = device_id.as_deref().unwrap_or("-"),
                "WebSocket authenticated"
            );
            send_to(
                state,
                conn_id,
                ServerMessage::auth(serde_json::json!({
                    "success": true,
                    "user_id": claims.sub,
                })),
            )
            .await;
        }
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "WebSocket auth rejected");
            send_to(
                state,
                conn_id,
                ServerMessage::auth(serde_json::json!({
                    "success": false,
                    "message": "Invalid or expired token",
                })),
            )
            .await;
        }
    }
}

/// Handle a request/response round-trip.
async fn handle_request(state: &AppState, conn_id: &str, event: &str, data: serde_json::Value) {
    match event {
        // Status snapshot used by reconnecting clients to resynchronize.
        "application-status" => {
            let Some(job_id) = data
                .get("application_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<uuid::Uuid>().ok())
            else {
                send_to(state, conn_id, ServerMessage::error("Missing application_id")).await;
                return;
            };

            match state.broker.get(job_id).await {
                Some(job) => {
                    send_to(
                        state,
                        conn_id,
                        ServerMessage::response(
                            "application-status",
                            serde_json::json!({
                                "application_id": job.id,
                                "status": job.status.as_str(),
                                "attempts": job.attempts,
                                "last_error": job.last_error,
                            }),
                        ),
                    )
                    .await;
                }
                None => {
                    send_to(state, conn_id, ServerMessage::error("Unknown application")).await;
                }
            }
        }
        other => {
            tracing::debug!(conn_id, event = other, "Unknown request event");
            send_to(state, conn_id, ServerMessage::error("Unknown request event")).await;
        }
    }
}

/// Push one protocol message to a single connection via the hub channel.
async fn send_to(state: &AppState, conn_id: &str, message: ServerMessage) {
    // Reuse the per-connection sender through a targeted channel send; a
    // closed channel means the connection is already being torn down.
    let _ = state
        .hub
        .send_to_connection(conn_id, message.to_message())
        .await;
}
