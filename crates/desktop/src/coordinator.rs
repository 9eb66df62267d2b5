//! The desktop claim coordinator.
//!
//! Consumes availability notifications, races other devices for claims,
//! and manages local executions: a bounded buffer of claimed-not-started
//! jobs, an active-execution map capped at `max_concurrent_executions`, a
//! fixed-delay local retry queue (deliberately simpler than the broker's
//! exponential policy — desktop retries are user-interruptible), and
//! graceful-then-forced cancellation.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobswipe_core::adapter::{execute_with_timeout, ExecutionAdapter, ExecutionOptions};
use jobswipe_core::{JobId, Timestamp};

use crate::client::{CompletionReport, GrantedClaim, JobServer};

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Parallel local executions.
    pub max_concurrent_executions: usize,
    /// Fixed delay between local retries of the same claim.
    pub retry_delay: Duration,
    /// Local attempts per claim before the failure is reported.
    pub max_local_retries: u32,
    /// Grace window between graceful cancellation and a forced kill.
    pub cancel_grace: Duration,
    /// Claimed-not-started buffer size; beyond it, announcements are left
    /// for other devices.
    pub buffer_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 1,
            retry_delay: Duration::from_secs(30),
            max_local_retries: 2,
            cancel_grace: Duration::from_secs(5),
            buffer_size: 8,
        }
    }
}

/// A claim waiting for an execution slot.
struct PendingJob {
    claim: GrantedClaim,
    /// 1-based local attempt counter.
    attempt: u32,
}

/// Bookkeeping for one running execution.
struct ActiveExecution {
    application_id: JobId,
    claim_token: Uuid,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    started_at: Timestamp,
}

struct CoordState {
    pending: VecDeque<PendingJob>,
    active: HashMap<Uuid, ActiveExecution>,
}

struct Inner {
    server: Arc<dyn JobServer>,
    adapter: Arc<dyn ExecutionAdapter>,
    config: CoordinatorConfig,
    state: Mutex<CoordState>,
}

/// Claims desktop jobs and drives their local execution lifecycle.
///
/// Cheaply cloneable handle; clones share the same state. Spawned tasks
/// capture their own clone.
#[derive(Clone)]
pub struct DesktopClaimCoordinator {
    inner: Arc<Inner>,
}

impl DesktopClaimCoordinator {
    pub fn new(
        server: Arc<dyn JobServer>,
        adapter: Arc<dyn ExecutionAdapter>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                server,
                adapter,
                config,
                state: Mutex::new(CoordState {
                    pending: VecDeque::new(),
                    active: HashMap::new(),
                }),
            }),
        }
    }

    /// Consume availability notifications until cancelled, then drain.
    pub async fn run(self, mut notifications: mpsc::Receiver<JobId>, cancel: CancellationToken) {
        tracing::info!(
            max_concurrent = self.inner.config.max_concurrent_executions,
            buffer = self.inner.config.buffer_size,
            "Desktop coordinator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = notifications.recv() => match maybe {
                    Some(job_id) => self.handle_available(job_id).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
        tracing::info!("Desktop coordinator stopped");
    }

    /// React to one availability announcement: claim it if we have room.
    pub async fn handle_available(&self, job_id: JobId) {
        {
            let state = self.inner.state.lock().await;
            if state.pending.len() >= self.inner.config.buffer_size {
                tracing::debug!(
                    job_id = %job_id,
                    "Claim buffer full, leaving job for other devices"
                );
                return;
            }
        }

        match self.inner.server.claim(job_id).await {
            Ok(Some(claim)) => {
                tracing::info!(job_id = %job_id, "Claim granted");
                self.inner
                    .state
                    .lock()
                    .await
                    .pending
                    .push_back(PendingJob { claim, attempt: 1 });
                self.pump().await;
            }
            Ok(None) => {
                // Another device won the race. Not a failure; drop silently.
                tracing::debug!(job_id = %job_id, "Claim lost, dropping job");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Claim request failed");
            }
        }
    }

    /// Move pending jobs into execution while slots are free.
    async fn pump(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.lock().await;
                if state.active.len() >= self.inner.config.max_concurrent_executions {
                    return;
                }
                state.pending.pop_front()
            };
            match next {
                Some(job) => self.spawn_execution(job).await,
                None => return,
            }
        }
    }

    /// Launch one attempt on its own task with a fresh execution id.
    ///
    /// Boxed (rather than `async fn`) so the compiler has a concrete,
    /// nominally-`Send` type for this call: `spawn_execution` participates
    /// in a call cycle (`pump` -> `spawn_execution` -> spawned task ->
    /// `run_attempt` -> `finish` -> `pump`), and leaving it as an opaque
    /// `impl Future` makes the auto-trait solver try to prove `Send` by
    /// expanding that cycle indefinitely.
    fn spawn_execution(&self, job: PendingJob) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        // Fresh per-attempt id so repeated attempts stay distinguishable in
        // logs and progress streams.
        let execution_id = Uuid::new_v4();
        let exec_cancel = CancellationToken::new();
        let application_id = job.claim.job.application_id;
        let claim_token = job.claim.token;

        tracing::info!(
            job_id = %application_id,
            execution_id = %execution_id,
            attempt = job.attempt,
            "Starting execution"
        );

        // Hold the attempt until its bookkeeping entry is in place, so a
        // fast completion cannot race the insert.
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let this = self.clone();
        let task_cancel = exec_cancel.clone();
        let handle = tokio::spawn(async move {
            let _ = go_rx.await;
            this.run_attempt(job, execution_id, task_cancel).await;
        });

        self.inner.state.lock().await.active.insert(
            execution_id,
            ActiveExecution {
                application_id,
                claim_token,
                cancel: exec_cancel,
                handle,
                started_at: chrono::Utc::now(),
            },
        );
        let _ = go_tx.send(());
        })
    }

    /// Execute one attempt and report its outcome.
    async fn run_attempt(&self, job: PendingJob, execution_id: Uuid, cancel: CancellationToken) {
        let claim = &job.claim;
        let application_id = claim.job.application_id;

        let _ = self
            .inner
            .server
            .progress(
                application_id,
                0,
                Some(format!("attempt {} ({execution_id})", job.attempt)),
            )
            .await;

        let options = ExecutionOptions {
            headless: claim.job.headless,
            timeout_secs: claim.job.timeout_secs,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = execute_with_timeout(
                self.inner.adapter.as_ref(),
                &claim.job.payload,
                &claim.job.profile,
                &options,
            ) => Some(result),
        };

        match outcome {
            // Graceful cancellation confirmed: the executor future was
            // dropped before a terminal report.
            None => {
                tracing::info!(
                    job_id = %application_id,
                    execution_id = %execution_id,
                    "Execution cancelled"
                );
                self.report(CompletionReport {
                    application_id,
                    token: claim.token,
                    success: false,
                    result: None,
                    error: None,
                    cancelled: true,
                })
                .await;
            }

            Some(Ok(result)) if result.success => {
                let _ = self.inner.server.progress(application_id, 100, None).await;
                self.report(CompletionReport {
                    application_id,
                    token: claim.token,
                    success: true,
                    result: Some(result),
                    error: None,
                    cancelled: false,
                })
                .await;
            }

            Some(outcome) => {
                let (error, result) = match outcome {
                    Ok(result) => (
                        result
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "Automation failed".to_string()),
                        Some(result),
                    ),
                    Err(e) => (e.message.clone(), None),
                };

                if job.attempt < self.inner.config.max_local_retries {
                    tracing::warn!(
                        job_id = %application_id,
                        execution_id = %execution_id,
                        attempt = job.attempt,
                        error = %error,
                        "Attempt failed, retrying after fixed delay"
                    );
                    self.schedule_retry(PendingJob {
                        claim: job.claim,
                        attempt: job.attempt + 1,
                    });
                } else {
                    tracing::warn!(
                        job_id = %application_id,
                        execution_id = %execution_id,
                        error = %error,
                        "Local retries exhausted, reporting failure"
                    );
                    self.report(CompletionReport {
                        application_id,
                        token: claim.token,
                        success: false,
                        result,
                        error: Some(error),
                        cancelled: false,
                    })
                    .await;
                }
            }
        }

        self.finish(execution_id).await;
    }

    /// Re-enqueue a claim after the fixed retry delay.
    fn schedule_retry(&self, job: PendingJob) {
        let this = self.clone();
        let delay = self.inner.config.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.inner.state.lock().await.pending.push_back(job);
            this.pump().await;
        });
    }

    /// Send a terminal report; failures are logged, never fatal.
    async fn report(&self, report: CompletionReport) {
        let job_id = report.application_id;
        if let Err(e) = self.inner.server.complete(report).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to report completion");
        }
    }

    /// Drop the bookkeeping entry and start the next pending job.
    async fn finish(&self, execution_id: Uuid) {
        self.inner.state.lock().await.active.remove(&execution_id);
        self.pump().await;
    }

    /// Cancel a running execution: graceful signal now, forced kill after
    /// the grace window. Returns `false` for an unknown execution id.
    ///
    /// The attempt task reports `cancelled` itself on the graceful path;
    /// the forced path reports from the watchdog. The server treats a
    /// duplicate terminal report as a no-op.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> bool {
        let cancel = {
            let state = self.inner.state.lock().await;
            match state.active.get(&execution_id) {
                Some(active) => active.cancel.clone(),
                None => return false,
            }
        };

        tracing::info!(execution_id = %execution_id, "Cancelling execution");
        cancel.cancel();

        let this = self.clone();
        let grace = self.inner.config.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let forced = {
                let mut state = this.inner.state.lock().await;
                state.active.remove(&execution_id)
            };
            if let Some(active) = forced {
                tracing::warn!(
                    execution_id = %execution_id,
                    "Graceful cancellation timed out, force-killing"
                );
                active.handle.abort();
                this.report(CompletionReport {
                    application_id: active.application_id,
                    token: active.claim_token,
                    success: false,
                    result: None,
                    error: None,
                    cancelled: true,
                })
                .await;
                this.pump().await;
            }
        });

        true
    }

    /// Ids of currently running executions (diagnostics and tests).
    pub async fn active_executions(&self) -> Vec<Uuid> {
        self.inner.state.lock().await.active.keys().copied().collect()
    }

    /// Number of claimed-not-started jobs.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Abort all in-flight work without reporting.
    ///
    /// A shutdown is not a user cancellation: the claims go silent and the
    /// broker's stall detection makes the jobs reclaimable.
    pub async fn shutdown(&self) {
        let drained: Vec<ActiveExecution> = {
            let mut state = self.inner.state.lock().await;
            state.pending.clear();
            state.active.drain().map(|(_, active)| active).collect()
        };

        let count = drained.len();
        for active in drained {
            active.handle.abort();
        }
        if count > 0 {
            tracing::info!(count, "Aborted in-flight executions");
        }
    }
}
