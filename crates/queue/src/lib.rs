//! Durable job queue core: broker, dead-letter store, and maintenance.
//!
//! [`QueueBroker`] is the single source of truth for job status. All
//! writers — the server worker pool and the desktop claim path — go through
//! its claim protocol: a claim issues an authority token, and only the
//! current token holder may drive the job to a terminal state.

pub mod broker;
pub mod dead_letter;
pub mod maintenance;

pub use broker::{BrokerConfig, BrokerError, Claim, QueueBroker, QueueCounts};
pub use dead_letter::{DeadLetterStore, FailureRecord};
pub use maintenance::run_maintenance;
