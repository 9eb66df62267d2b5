//! Server-resident job worker pool.
//!
//! [`JobWorkerPool`] claims jobs from the broker under a concurrency cap and
//! a token-bucket rate limit, drives the claim protocol (start, renew, ack,
//! nack), and performs the desktop handoff for jobs it must not execute.

pub mod pool;
pub mod rate_limit;

pub use pool::{JobWorkerPool, WorkerConfig};
pub use rate_limit::TokenBucket;
