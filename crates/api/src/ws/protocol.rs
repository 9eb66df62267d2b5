//! WebSocket wire protocol envelopes.
//!
//! Inbound frames deserialize into [`ClientMessage`] (tagged by `type`);
//! outbound frames serialize from [`ServerMessage`]. Parsing happens once
//! at this boundary — the rest of the hub works with typed values.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use jobswipe_core::{wire, Timestamp};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Authenticate the connection with a bearer token.
    Auth {
        token: String,
        device_type: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    /// Subscribe to additional channels (validated against the allow-list).
    Subscribe { channels: Vec<String> },
    /// Drop channel subscriptions.
    Unsubscribe { channels: Vec<String> },
    /// Application-level liveness probe.
    Ping,
    /// Request/response round-trip (e.g. a status snapshot).
    Request {
        event: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Outbound message envelope: `{type, event?, data, message_id, timestamp,
/// user_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    pub data: serde_json::Value,

    pub message_id: String,

    pub timestamp: Timestamp,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ServerMessage {
    fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            event: None,
            data,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            user_id: None,
        }
    }

    /// Connection-level system notice.
    pub fn system(data: serde_json::Value) -> Self {
        Self::new(wire::MSG_TYPE_SYSTEM, data)
    }

    /// Authentication acknowledgement or rejection.
    pub fn auth(data: serde_json::Value) -> Self {
        Self::new(wire::MSG_TYPE_AUTH, data)
    }

    /// Job lifecycle update for a specific user.
    pub fn update(event: &str, user_id: Option<String>, data: serde_json::Value) -> Self {
        let mut msg = Self::new(wire::MSG_TYPE_UPDATE, data);
        msg.event = Some(event.to_string());
        msg.user_id = user_id;
        msg
    }

    /// Out-of-band notification.
    pub fn notification(event: &str, data: serde_json::Value) -> Self {
        let mut msg = Self::new(wire::MSG_TYPE_NOTIFICATION, data);
        msg.event = Some(event.to_string());
        msg
    }

    /// Protocol-level error with a client-safe message.
    pub fn error(message: &str) -> Self {
        Self::new(
            wire::MSG_TYPE_ERROR,
            serde_json::json!({ "message": message }),
        )
    }

    /// Reply to a client `request`.
    pub fn response(event: &str, data: serde_json::Value) -> Self {
        let mut msg = Self::new(wire::MSG_TYPE_RESPONSE, data);
        msg.event = Some(event.to_string());
        msg
    }

    /// Reply to a client `ping`.
    pub fn pong() -> Self {
        Self::new(wire::MSG_TYPE_PONG, serde_json::Value::Object(Default::default()))
    }

    /// Serialize into a WebSocket text frame.
    pub fn to_message(&self) -> Message {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize server message");
            format!(r#"{{"type":"{}","data":{{}}}}"#, wire::MSG_TYPE_ERROR)
        });
        Message::Text(json.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_auth_message_parses() {
        let raw = r#"{"type":"auth","token":"abc","device_type":"desktop","device_id":"d-1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).expect("parse");
        match msg {
            ClientMessage::Auth {
                token,
                device_type,
                device_id,
            } => {
                assert_eq!(token, "abc");
                assert_eq!(device_type, "desktop");
                assert_eq!(device_id.as_deref(), Some("d-1"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn client_subscribe_message_parses() {
        let raw = r#"{"type":"subscribe","channels":["user:1","system"]}"#;
        let msg: ClientMessage = serde_json::from_str(raw).expect("parse");
        match msg {
            ClientMessage::Subscribe { channels } => {
                assert_eq!(channels, vec!["user:1".to_string(), "system".to_string()]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"teleport"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn server_message_envelope_shape() {
        let msg = ServerMessage::update(
            "application-status",
            Some("user-1".into()),
            serde_json::json!({"status": "completed"}),
        );
        let value = serde_json::to_value(&msg).expect("serialize");

        assert_eq!(value["type"], "update");
        assert_eq!(value["event"], "application-status");
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["data"]["status"], "completed");
        assert!(value["message_id"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let msg = ServerMessage::pong();
        let value = serde_json::to_value(&msg).expect("serialize");
        assert!(value.get("event").is_none());
        assert!(value.get("user_id").is_none());
    }
}
