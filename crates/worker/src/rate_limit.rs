//! Token-bucket rate limiter protecting the automation targets.
//!
//! The bucket refills continuously at `refill_per_sec`, up to `capacity`
//! tokens. Each job execution takes one token, so short bursts up to the
//! capacity are allowed while the sustained rate stays bounded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// A simple token-bucket instance.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<TokenBucketInner>>,
}

struct TokenBucketInner {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_check: Instant,
}

impl TokenBucket {
    pub fn new(capacity: usize, refill_per_sec: f64) -> Self {
        let inner = TokenBucketInner {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_check: Instant::now(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Take one token if available. Non-blocking.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.refill(Instant::now());
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take one token, waiting for the refill if none is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                inner.refill(Instant::now());
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    return;
                }
                // Sleep roughly until one token will have refilled.
                let deficit = 1.0 - inner.tokens;
                Duration::from_secs_f64((deficit / inner.refill_per_sec).max(0.005))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl TokenBucketInner {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_check).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_check = now;
        }
    }
}
