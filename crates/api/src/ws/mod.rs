//! WebSocket infrastructure for real-time communication.
//!
//! Provides the connection registry ([`RealtimeHub`]), the wire protocol
//! envelopes, heartbeat/liveness enforcement, and the HTTP upgrade handler
//! used by Axum routes.

mod handler;
mod heartbeat;
pub mod hub;
pub mod protocol;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use hub::{HubConfig, RealtimeHub};
pub use protocol::{ClientMessage, ServerMessage};
