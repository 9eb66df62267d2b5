//! WebSocket wire constants and channel naming.
//!
//! Message-type strings used by the realtime hub when pushing job lifecycle
//! updates, and the channel-name scheme subscriptions are validated against.

// ---------------------------------------------------------------------------
// Server -> client message types
// ---------------------------------------------------------------------------

/// Connection-level system notices (welcome, shutdown).
pub const MSG_TYPE_SYSTEM: &str = "system";

/// Authentication acknowledgement / rejection.
pub const MSG_TYPE_AUTH: &str = "auth";

/// Job lifecycle update (see the `UPDATE_*` event names).
pub const MSG_TYPE_UPDATE: &str = "update";

/// Out-of-band user notification.
pub const MSG_TYPE_NOTIFICATION: &str = "notification";

/// Protocol-level error.
pub const MSG_TYPE_ERROR: &str = "error";

/// Reply to a client `request` message.
pub const MSG_TYPE_RESPONSE: &str = "response";

/// Reply to a client `ping`.
pub const MSG_TYPE_PONG: &str = "pong";

// ---------------------------------------------------------------------------
// Update event names
// ---------------------------------------------------------------------------

/// The application's status changed (queued, processing, completed, ...).
pub const UPDATE_APPLICATION_STATUS: &str = "application-status";

/// Progress percentage from a running automation.
pub const UPDATE_AUTOMATION_PROGRESS: &str = "automation-progress";

/// Position in the waiting queue changed.
pub const UPDATE_QUEUE_POSITION: &str = "queue-position";

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// General channels any authenticated connection may join.
pub const CHANNEL_SYSTEM: &str = "system";
pub const CHANNEL_ANNOUNCEMENTS: &str = "announcements";

/// Per-user channel name (`user:{user_id}`).
pub fn user_channel(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Per-device-type channel name (`device:{device_type}`).
pub fn device_channel(device_type: &str) -> String {
    format!("device:{device_type}")
}

/// Allow-list check for a subscription request.
///
/// A connection may subscribe to its own user channel, its own device-type
/// channel, and the general channels. Anything else — in particular another
/// user's channel — is rejected.
pub fn channel_allowed(channel: &str, user_id: &str, device_type: &str) -> bool {
    channel == CHANNEL_SYSTEM
        || channel == CHANNEL_ANNOUNCEMENTS
        || channel == user_channel(user_id)
        || channel == device_channel(device_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_channels_allowed() {
        assert!(channel_allowed("user:123", "123", "web"));
        assert!(channel_allowed("device:web", "123", "web"));
        assert!(channel_allowed("system", "123", "web"));
        assert!(channel_allowed("announcements", "123", "web"));
    }

    #[test]
    fn foreign_channels_rejected() {
        assert!(!channel_allowed("user:456", "123", "web"));
        assert!(!channel_allowed("device:desktop", "123", "web"));
        assert!(!channel_allowed("admin", "123", "web"));
    }
}
