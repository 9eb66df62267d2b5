//! JobSwipe desktop claim coordinator.
//!
//! The desktop client is the second, physically remote worker pool. It
//! listens for availability pushes over WebSocket, races other devices for
//! the claim over HTTP, executes the automation locally, and reports
//! progress and results back to the server — it never mutates broker state
//! directly.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod listener;

pub use client::{ApiClient, ClientError, CompletionReport, GrantedClaim, JobServer};
pub use config::DesktopConfig;
pub use coordinator::{CoordinatorConfig, DesktopClaimCoordinator};
pub use listener::{run_listener, ListenerConfig};
