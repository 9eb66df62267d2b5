//! Fan-out from the internal event bus to WebSocket clients.

mod router;

pub use router::StatusEventRouter;
