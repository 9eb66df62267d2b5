//! The server-side worker pool.
//!
//! A single long-lived task claims jobs from the broker and spawns one
//! execution task per claim, bounded by a semaphore (concurrency) and a
//! token bucket (rate). Desktop-mode jobs are not executed here: the pool
//! releases its claim back to the broker as a desktop handoff and moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use jobswipe_core::adapter::{execute_with_timeout, ExecutionAdapter, ExecutionOptions};
use jobswipe_core::{ApplicationStatus, AutomationResult, ExecutionErrorKind, ExecutionMode};
use jobswipe_queue::{Claim, QueueBroker};

/// Tunables for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier recorded on claims taken by this pool.
    pub worker_id: String,
    /// Maximum concurrent executions.
    pub concurrency: usize,
    /// Token-bucket burst size.
    pub burst: usize,
    /// Token-bucket sustained rate (executions per second).
    pub rate_per_sec: f64,
    /// Sleep between claim attempts when the queue is empty.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("server-{}", uuid::Uuid::new_v4()),
            concurrency: 4,
            burst: 2,
            rate_per_sec: 1.0,
            idle_poll: Duration::from_millis(500),
        }
    }
}

/// Concurrency- and rate-limited consumer of the job queue.
pub struct JobWorkerPool {
    broker: Arc<QueueBroker>,
    adapter: Arc<dyn ExecutionAdapter>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    limiter: crate::rate_limit::TokenBucket,
    running: AtomicBool,
}

impl JobWorkerPool {
    pub fn new(
        broker: Arc<QueueBroker>,
        adapter: Arc<dyn ExecutionAdapter>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let limiter = crate::rate_limit::TokenBucket::new(config.burst, config.rate_per_sec);
        Arc::new(Self {
            broker,
            adapter,
            config,
            semaphore,
            limiter,
            running: AtomicBool::new(false),
        })
    }

    /// Whether the claim loop is currently running (health reporting).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Run the claim loop until the cancellation token is triggered.
    ///
    /// In-flight executions are left to finish on their own tasks; the
    /// broker's stall detection covers any that outlive the process.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.running.store(true, Ordering::Relaxed);
        tracing::info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            rate_per_sec = self.config.rate_per_sec,
            "Worker pool started"
        );

        loop {
            // One permit per in-flight execution.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Rate limit claim attempts so downstream targets see a bounded
            // request rate even under a full queue.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.limiter.acquire() => {}
            }

            match self.broker.claim(&self.config.worker_id).await {
                Some(claim) => {
                    let pool = Arc::clone(&self);
                    tokio::spawn(async move {
                        pool.process(claim).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_poll) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        tracing::info!(worker_id = %self.config.worker_id, "Worker pool stopped");
    }

    /// Drive one claimed job to a broker transition.
    async fn process(&self, claim: Claim) {
        let job = claim.job;
        let token = claim.token;

        // Desktop jobs are handed off, never executed here. Completion
        // authority moves to whichever desktop client claims next.
        if job.execution_mode == ExecutionMode::Desktop {
            if let Err(e) = self.broker.handoff_to_desktop(job.id, token).await {
                tracing::error!(job_id = %job.id, error = %e, "Desktop handoff failed");
            }
            return;
        }

        if let Err(e) = self.broker.start(job.id, token).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to start claimed job");
            return;
        }

        // Renew the claim lock at half its duration while the (potentially
        // minutes-long) execution is in flight.
        let renewal = {
            let broker = Arc::clone(&self.broker);
            let job_id = job.id;
            let interval = self.broker.config().renew_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    match broker.renew_lock(job_id, token).await {
                        Ok(_) => tracing::debug!(job_id = %job_id, "Claim lock renewed"),
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Lock renewal rejected");
                            break;
                        }
                    }
                }
            })
        };

        let options = ExecutionOptions {
            headless: job.options.headless,
            timeout_secs: job.options.timeout_secs,
        };
        let outcome =
            execute_with_timeout(self.adapter.as_ref(), &job.payload, &job.profile, &options).await;
        renewal.abort();

        match outcome {
            Ok(result) if result.success => {
                if let Err(e) = self.broker.ack(job.id, token, result).await {
                    tracing::error!(job_id = %job.id, error = %e, "Ack rejected");
                }
            }
            Ok(result) => {
                let kind = classify_result(&result);
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Automation reported {}", result.status.as_str()));
                if let Err(e) = self.broker.nack(job.id, token, &message, kind).await {
                    tracing::error!(job_id = %job.id, error = %e, "Nack rejected");
                }
            }
            Err(err) => {
                if let Err(e) = self.broker.nack(job.id, token, &err.message, err.kind).await {
                    tracing::error!(job_id = %job.id, error = %e, "Nack rejected");
                }
            }
        }
    }
}

/// Map an unsuccessful automation result onto the retry taxonomy.
fn classify_result(result: &AutomationResult) -> ExecutionErrorKind {
    match result.status {
        ApplicationStatus::Timeout => ExecutionErrorKind::Timeout,
        ApplicationStatus::CaptchaRequired => ExecutionErrorKind::CaptchaDetected,
        ApplicationStatus::LoginRequired => ExecutionErrorKind::AuthError,
        ApplicationStatus::RateLimited => ExecutionErrorKind::RateLimited,
        ApplicationStatus::NetworkError => ExecutionErrorKind::NetworkError,
        ApplicationStatus::Success
        | ApplicationStatus::Failed
        | ApplicationStatus::FormError
        | ApplicationStatus::UnknownError => result
            .error_message
            .as_deref()
            .map(ExecutionErrorKind::classify)
            .unwrap_or(ExecutionErrorKind::Unknown),
    }
}
