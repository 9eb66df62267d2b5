//! JobSwipe internal event infrastructure.
//!
//! Provides the typed publish/subscribe channel every job lifecycle
//! transition flows through:
//!
//! - [`EventBus`] — in-process fan-out hub backed by
//!   `tokio::sync::broadcast`.
//! - [`StatusEvent`] / [`StatusEventKind`] — the canonical lifecycle event
//!   envelope consumed by the realtime fan-out router.

pub mod bus;

pub use bus::{EventBus, StatusEvent, StatusEventKind};
