//! WebSocket listener for desktop availability pushes.
//!
//! Maintains a persistent connection to the server hub: authenticate,
//! receive `job-available` notifications on the desktop device channel, and
//! forward the application ids to the coordinator. When the connection
//! drops, reconnects with exponential backoff until cancelled.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use jobswipe_core::JobId;

/// Connection parameters for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub ws_url: String,
    pub token: String,
    pub device_id: String,
}

/// Tunable parameters for the exponential-backoff reconnect strategy.
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run the listener until cancelled.
///
/// Forwards every announced application id into `notify`; a full channel
/// applies backpressure (the coordinator drains it as it claims).
pub async fn run_listener(
    config: ListenerConfig,
    notify: mpsc::Sender<JobId>,
    cancel: CancellationToken,
) {
    let reconnect = ReconnectConfig::default();
    let mut delay = reconnect.initial_delay;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        tracing::info!(url = %config.ws_url, "Connecting to server WebSocket");
        match connect_async(config.ws_url.as_str()).await {
            Ok((ws_stream, _response)) => {
                tracing::info!("WebSocket connected");
                delay = reconnect.initial_delay;
                run_session(ws_stream, &config, &notify, &cancel).await;
                if cancel.is_cancelled() {
                    return;
                }
                tracing::warn!("WebSocket session ended, reconnecting");
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket connection failed");
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &reconnect);
    }
}

/// Drive a single WebSocket session: authenticate, then forward
/// availability notifications until the connection drops.
async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    config: &ListenerConfig,
    notify: &mpsc::Sender<JobId>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws_stream.split();

    // Authenticate; the hub auto-subscribes us to `device:desktop`.
    let auth = serde_json::json!({
        "type": "auth",
        "token": config.token,
        "device_type": "desktop",
        "device_id": config.device_id,
    });
    if let Err(e) = sink.send(Message::Text(auth.to_string())).await {
        tracing::error!(error = %e, "Failed to send auth message");
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(job_id) = parse_job_available(&text) {
                            tracing::info!(job_id = %job_id, "Job available for desktop");
                            if notify.send(job_id).await.is_err() {
                                // Coordinator gone; nothing left to do.
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Server closed WebSocket");
                        return;
                    }
                    Some(Ok(_)) => {
                        // Pong / binary — ignore.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket receive error");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Extract the application id from a `job-available` notification frame.
///
/// Any other message type (auth acks, status updates, pongs) yields `None`.
pub fn parse_job_available(text: &str) -> Option<JobId> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "notification" {
        return None;
    }
    if value.get("event")?.as_str()? != "job-available" {
        return None;
    }
    value
        .get("data")?
        .get("application_id")?
        .as_str()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_available_notification() {
        let id = uuid::Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"notification","event":"job-available","data":{{"application_id":"{id}","payload":{{}}}},"message_id":"m","timestamp":"2026-01-01T00:00:00Z"}}"#
        );
        assert_eq!(parse_job_available(&raw), Some(id));
    }

    #[test]
    fn ignores_other_messages() {
        assert_eq!(
            parse_job_available(r#"{"type":"auth","data":{"success":true}}"#),
            None
        );
        assert_eq!(
            parse_job_available(r#"{"type":"update","event":"application-status","data":{}}"#),
            None
        );
        assert_eq!(parse_job_available("not json"), None);
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }
}
