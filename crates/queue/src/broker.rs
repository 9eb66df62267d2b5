//! The authoritative job store and claim/retry state machine.
//!
//! All job mutations flow through [`QueueBroker`]. A successful claim issues
//! an **authority token**; `ack`/`nack`/`cancel` require the current token,
//! so a worker whose lock expired (and whose job was reclaimed) can no
//! longer write a terminal state. Every transition is checked against
//! [`JobStatus::can_transition`] and published to the event bus.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use jobswipe_core::{
    ExecutionErrorKind, ExecutionMode, FailureReason, Job, JobId, JobStatus, JobSubmission,
    Priority, Timestamp,
};
use jobswipe_events::{EventBus, StatusEvent, StatusEventKind};

use crate::dead_letter::{DeadLetterStore, FailureRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the broker's claim, retry, and retention behaviour.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a claim lock lasts without renewal. Must exceed the
    /// worst-case execution time or stall detection will reclaim live jobs.
    pub lock_duration: Duration,

    /// How many times a job may stall (lock expired without completion)
    /// before it is force-failed instead of reclaimed.
    pub max_stalled_count: u32,

    /// Base delay for the exponential retry backoff.
    pub backoff_base: Duration,

    /// Ceiling on the retry backoff delay.
    pub backoff_cap: Duration,

    /// How long completed jobs are kept beyond the most recent
    /// `completed_keep_count`.
    pub completed_retention: Duration,

    /// Completed jobs always retained regardless of age.
    pub completed_keep_count: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(600),
            max_stalled_count: 2,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(900),
            completed_retention: Duration::from_secs(24 * 3600),
            completed_keep_count: 200,
        }
    }
}

impl BrokerConfig {
    /// Cadence at which workers should renew their claim locks.
    ///
    /// Half the lock duration: a renewal can fail once and the lock still
    /// holds until the next cycle.
    pub fn renew_interval(&self) -> Duration {
        self.lock_duration / 2
    }

    /// Retry delay after `attempts` failed attempts: `base * 2^attempts`,
    /// capped at `backoff_cap`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.min(20); // avoid shift overflow on absurd budgets
        let raw = self.backoff_base.saturating_mul(1u32 << exp);
        raw.min(self.backoff_cap)
    }
}

/// Add up to 10% random jitter so synchronized failures do not retry in
/// lockstep against the same target site.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() / 10) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::random_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No job with the given id exists.
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job was already claimed by someone else. Not a failure: the
    /// losing claimant simply drops the job.
    #[error("Job {0} already claimed")]
    ClaimConflict(JobId),

    /// The presented authority token no longer matches the live claim
    /// (lock expired, job reclaimed, or authority handed off).
    #[error("Stale claim token for job {0}")]
    StaleClaim(JobId),

    /// The requested status transition is illegal.
    #[error("Illegal transition {from:?} -> {to:?} for job {job_id}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The submission failed boundary validation.
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl BrokerError {
    /// Whether this error is a benign lost claim race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BrokerError::ClaimConflict(_))
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// An exclusive, time-bounded right to process a job.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Snapshot of the job at claim time.
    pub job: Job,
    /// Authority token. Required for every subsequent mutation.
    pub token: Uuid,
    /// When the lock expires unless renewed.
    pub deadline: Timestamp,
}

/// Live lock bookkeeping for a claimed job.
struct ClaimLock {
    token: Uuid,
    deadline: Timestamp,
    worker: String,
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Aggregate queue statistics for the health endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

// ---------------------------------------------------------------------------
// QueueBroker
// ---------------------------------------------------------------------------

struct BrokerState {
    jobs: HashMap<JobId, Job>,
    /// Server-claimable jobs ordered by (priority, enqueue sequence).
    ready: BTreeSet<(Priority, u64, JobId)>,
    /// Original enqueue sequence per job; a retried job keeps its slot.
    seq_of: HashMap<JobId, u64>,
    /// Jobs waiting out a retry delay, ordered by due time.
    delayed: BTreeSet<(Timestamp, JobId)>,
    locks: HashMap<JobId, ClaimLock>,
    stall_counts: HashMap<JobId, u32>,
    next_seq: u64,
}

/// Priority-ordered, at-least-once job store with claim/lock semantics.
///
/// Shared as `Arc<QueueBroker>`; all interior state lives behind one async
/// mutex so claim operations are atomic compare-and-swaps.
pub struct QueueBroker {
    config: BrokerConfig,
    bus: Arc<EventBus>,
    dead_letters: Arc<DeadLetterStore>,
    state: Mutex<BrokerState>,
}

impl QueueBroker {
    pub fn new(config: BrokerConfig, bus: Arc<EventBus>, dead_letters: Arc<DeadLetterStore>) -> Self {
        Self {
            config,
            bus,
            dead_letters,
            state: Mutex::new(BrokerState {
                jobs: HashMap::new(),
                ready: BTreeSet::new(),
                seq_of: HashMap::new(),
                delayed: BTreeSet::new(),
                locks: HashMap::new(),
                stall_counts: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // -- Submission ---------------------------------------------------------

    /// Validate a submission and enqueue the job.
    ///
    /// The envelope is validated exactly once here; everything downstream
    /// trusts it. Jobs of both execution modes enter the common ready queue;
    /// the worker pool performs the desktop handoff on claim.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobId, BrokerError> {
        submission
            .validate()
            .map_err(|e| BrokerError::Validation(e.to_string()))?;

        let mut job = Job::from_submission(submission);
        job.status = JobStatus::Queued;
        let job_id = job.id;
        let user_id = job.user_id.clone();
        let priority = job.priority;

        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq_of.insert(job_id, seq);
        state.ready.insert((priority, seq, job_id));
        state.jobs.insert(job_id, job);
        drop(state);

        tracing::info!(
            job_id = %job_id,
            priority = priority.as_str(),
            "Job enqueued"
        );
        self.bus
            .publish(StatusEvent::new(StatusEventKind::Queued, job_id, user_id));

        Ok(job_id)
    }

    // -- Claiming -----------------------------------------------------------

    /// Claim the highest-priority ready job, FIFO within a priority.
    ///
    /// Returns `None` when nothing is claimable. Due retries are promoted
    /// before selection so a drained maintenance loop cannot starve them.
    pub async fn claim(&self, worker: &str) -> Option<Claim> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;
        promote_due_locked(&mut state, now, &self.bus);

        while let Some(entry) = state.ready.iter().next().copied() {
            state.ready.remove(&entry);
            let (_, _, job_id) = entry;

            if let Some(claim) = self.lock_job_locked(&mut state, job_id, worker, now) {
                drop(state);
                self.publish_for(&claim.job, StatusEventKind::Claimed, None);
                return Some(claim);
            }
            // Entry was stale (job no longer claimable); try the next one.
        }
        None
    }

    /// Atomically claim a specific desktop-queued job.
    ///
    /// This is the desktop coordinator's compare-and-swap: exactly one of
    /// any number of racing callers wins; the rest get
    /// [`BrokerError::ClaimConflict`] and must drop the job silently.
    pub async fn claim_desktop(&self, job_id: JobId, device: &str) -> Result<Claim, BrokerError> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;

        let status = state
            .jobs
            .get(&job_id)
            .map(|j| j.status)
            .ok_or(BrokerError::NotFound(job_id))?;

        if status != JobStatus::QueuedForDesktop {
            return Err(BrokerError::ClaimConflict(job_id));
        }

        let claim = self
            .lock_job_locked(&mut state, job_id, device, now)
            .ok_or(BrokerError::ClaimConflict(job_id))?;
        drop(state);

        self.publish_for(&claim.job, StatusEventKind::Claimed, None);
        Ok(claim)
    }

    /// Transition a claimed job to `Claimed` and issue its lock.
    ///
    /// Caller must already hold the state mutex and have removed the job
    /// from whatever queue it was waiting in.
    fn lock_job_locked(
        &self,
        state: &mut BrokerState,
        job_id: JobId,
        worker: &str,
        now: Timestamp,
    ) -> Option<Claim> {
        let job = state.jobs.get_mut(&job_id)?;
        if !job.status.can_transition(JobStatus::Claimed) {
            tracing::warn!(job_id = %job_id, status = job.status.as_str(), "Unclaimable job in queue");
            return None;
        }
        job.status = JobStatus::Claimed;

        let token = Uuid::new_v4();
        let deadline = now + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_else(|_| chrono::Duration::zero());
        let snapshot = job.clone();
        state.locks.insert(
            job_id,
            ClaimLock {
                token,
                deadline,
                worker: worker.to_string(),
            },
        );

        tracing::debug!(job_id = %job_id, worker, "Job claimed");
        Some(Claim {
            job: snapshot,
            token,
            deadline,
        })
    }

    /// Extend a live lock. Rejected if the token is stale.
    pub async fn renew_lock(&self, job_id: JobId, token: Uuid) -> Result<Timestamp, BrokerError> {
        let mut state = self.state.lock().await;
        let lock = state
            .locks
            .get_mut(&job_id)
            .ok_or(BrokerError::StaleClaim(job_id))?;
        if lock.token != token {
            return Err(BrokerError::StaleClaim(job_id));
        }

        let deadline = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_else(|_| chrono::Duration::zero());
        lock.deadline = deadline;
        Ok(deadline)
    }

    // -- Execution lifecycle ------------------------------------------------

    /// Mark a claimed job as executing (`Claimed -> Processing`).
    pub async fn start(&self, job_id: JobId, token: Uuid) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        verify_token(&state, job_id, token)?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(BrokerError::NotFound(job_id))?;

        transition(job, JobStatus::Processing)?;
        job.started_at = Some(chrono::Utc::now());
        let snapshot = job.clone();
        drop(state);

        self.publish_for(&snapshot, StatusEventKind::Started, None);
        Ok(())
    }

    /// Record execution progress. No status change beyond the implicit
    /// `Claimed -> Processing` promotion on the first report.
    ///
    /// A progress report also renews the live lock: the desktop path has no
    /// renew endpoint, so its periodic progress stream doubles as the
    /// liveness signal that keeps stall detection at bay.
    pub async fn progress(
        &self,
        job_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(BrokerError::NotFound(job_id))?;

        let mut started = false;
        if job.status == JobStatus::Claimed {
            transition(job, JobStatus::Processing)?;
            job.started_at = Some(chrono::Utc::now());
            started = true;
        } else if job.status != JobStatus::Processing {
            return Err(BrokerError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        let snapshot = job.clone();

        if let Some(lock) = state.locks.get_mut(&job_id) {
            lock.deadline = chrono::Utc::now()
                + chrono::Duration::from_std(self.config.lock_duration)
                    .unwrap_or_else(|_| chrono::Duration::zero());
        }
        drop(state);

        if started {
            self.publish_for(&snapshot, StatusEventKind::Started, None);
        }
        self.publish_for(
            &snapshot,
            StatusEventKind::Progress,
            Some(serde_json::json!({
                "progress": progress.min(100),
                "message": message,
            })),
        );
        Ok(())
    }

    /// Complete a job successfully. Idempotent on terminal jobs.
    pub async fn ack(
        &self,
        job_id: JobId,
        token: Uuid,
        result: jobswipe_core::AutomationResult,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let status = state
            .jobs
            .get(&job_id)
            .map(|j| j.status)
            .ok_or(BrokerError::NotFound(job_id))?;
        if status.is_terminal() {
            return Ok(());
        }
        verify_token(&state, job_id, token)?;

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Err(BrokerError::NotFound(job_id));
        };
        // A desktop report may arrive while the job is still `Claimed`.
        if job.status == JobStatus::Claimed {
            transition(job, JobStatus::Processing)?;
            job.started_at.get_or_insert_with(chrono::Utc::now);
        }
        transition(job, JobStatus::Completed)?;
        job.completed_at = Some(chrono::Utc::now());
        job.result = Some(result);
        let snapshot = job.clone();

        release_locked(&mut state, job_id);
        drop(state);

        tracing::info!(job_id = %job_id, "Job completed");
        let confirmation = snapshot
            .result
            .as_ref()
            .and_then(|r| r.confirmation_number.clone());
        self.publish_for(
            &snapshot,
            StatusEventKind::Completed,
            Some(serde_json::json!({ "confirmation_number": confirmation })),
        );
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Increments `attempts`; reschedules with capped exponential backoff if
    /// budget and error kind allow, otherwise dead-letters the job.
    /// Idempotent on terminal jobs.
    pub async fn nack(
        &self,
        job_id: JobId,
        token: Uuid,
        error: &str,
        kind: ExecutionErrorKind,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let status = state
            .jobs
            .get(&job_id)
            .map(|j| j.status)
            .ok_or(BrokerError::NotFound(job_id))?;
        if status.is_terminal() {
            return Ok(());
        }
        verify_token(&state, job_id, token)?;

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Err(BrokerError::NotFound(job_id));
        };
        // A desktop failure report may arrive while the job is still
        // `Claimed`; route it through `Processing` so the DAG holds.
        if job.status == JobStatus::Claimed {
            transition(job, JobStatus::Processing)?;
            job.started_at.get_or_insert_with(chrono::Utc::now);
        }
        job.attempts = (job.attempts + 1).min(job.max_attempts);
        job.last_error = Some(error.to_string());
        job.last_error_kind = Some(kind);

        let retryable = kind.is_retryable() && job.attempts < job.max_attempts;
        if retryable {
            transition(job, JobStatus::Retrying)?;
            let delay = with_jitter(self.config.backoff_delay(job.attempts));
            let due = chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            job.next_retry_at = Some(due);
            let snapshot = job.clone();

            state.delayed.insert((due, job_id));
            release_locked(&mut state, job_id);
            drop(state);

            tracing::info!(
                job_id = %job_id,
                attempts = snapshot.attempts,
                delay_ms = delay.as_millis() as u64,
                error,
                "Job scheduled for retry"
            );
            self.publish_for(
                &snapshot,
                StatusEventKind::Retrying,
                Some(serde_json::json!({
                    "attempts": snapshot.attempts,
                    "max_attempts": snapshot.max_attempts,
                    "error": error,
                })),
            );
            return Ok(());
        }

        let reason = FailureReason::from_error_kind(kind);
        self.dead_letter_locked(state, job_id, reason).await;
        Ok(())
    }

    /// Cancel a job. Terminal `Cancelled`, not counted against retries.
    ///
    /// Queued/retrying jobs may be cancelled without a token; a live claim
    /// requires its authority token. Cancelling a terminal job is a no-op.
    pub async fn cancel(&self, job_id: JobId, token: Option<Uuid>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(&job_id)
            .ok_or(BrokerError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(());
        }

        if state.locks.contains_key(&job_id) {
            match token {
                Some(token) => verify_token(&state, job_id, token)?,
                None => return Err(BrokerError::StaleClaim(job_id)),
            }
        }

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Err(BrokerError::NotFound(job_id));
        };
        let previous = job.status;
        transition(job, JobStatus::Cancelled)?;
        job.completed_at = Some(chrono::Utc::now());
        let snapshot = job.clone();

        remove_from_queues_locked(&mut state, job_id, previous);
        release_locked(&mut state, job_id);
        drop(state);

        tracing::info!(job_id = %job_id, "Job cancelled");
        self.publish_for(&snapshot, StatusEventKind::Cancelled, None);
        Ok(())
    }

    /// Force a job to the dead-letter store outside the normal retry path
    /// (max-stalled breach, unparseable desktop report).
    pub async fn force_fail(
        &self,
        job_id: JobId,
        reason: FailureReason,
        error: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(BrokerError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.last_error = Some(error.to_string());
        let previous = job.status;
        remove_from_queues_locked(&mut state, job_id, previous);
        self.dead_letter_locked(state, job_id, reason).await;
        Ok(())
    }

    /// Desktop handoff: release the pool's claim and republish the job on
    /// the desktop availability channel (`Claimed -> QueuedForDesktop`).
    ///
    /// Completion/failure authority for the job transfers to whichever
    /// desktop client wins the subsequent [`claim_desktop`](Self::claim_desktop).
    pub async fn handoff_to_desktop(&self, job_id: JobId, token: Uuid) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        verify_token(&state, job_id, token)?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(BrokerError::NotFound(job_id))?;

        if job.execution_mode != ExecutionMode::Desktop {
            return Err(BrokerError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::QueuedForDesktop,
            });
        }
        transition(job, JobStatus::QueuedForDesktop)?;
        let snapshot = job.clone();
        release_locked(&mut state, job_id);
        drop(state);

        tracing::info!(job_id = %job_id, "Job queued for desktop execution");
        self.publish_for(&snapshot, StatusEventKind::QueuedForDesktop, None);
        self.publish_for(
            &snapshot,
            StatusEventKind::DesktopAvailable,
            Some(serde_json::json!({
                "title": snapshot.payload.title,
                "company": snapshot.payload.company,
            })),
        );
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    /// Snapshot of a job for status endpoints.
    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(&job_id).cloned()
    }

    /// Aggregate counts for health reporting.
    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts {
            waiting: 0,
            active: 0,
            completed: 0,
            failed: 0,
            delayed: 0,
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending | JobStatus::Queued | JobStatus::QueuedForDesktop => {
                    counts.waiting += 1
                }
                JobStatus::Claimed | JobStatus::Processing => counts.active += 1,
                JobStatus::Retrying => counts.delayed += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::DeadLetter => counts.failed += 1,
                JobStatus::Cancelled => {}
            }
        }
        counts
    }

    // -- Maintenance --------------------------------------------------------

    /// One maintenance pass: promote due retries, reclaim or force-fail
    /// stalled jobs, prune old completed jobs. Called periodically by
    /// [`run_maintenance`](crate::maintenance::run_maintenance).
    pub async fn run_sweeps(&self) {
        let now = chrono::Utc::now();
        self.promote_due(now).await;
        self.check_stalled(now).await;
        self.sweep_retention(now).await;
    }

    /// Move retry-delayed jobs whose due time has passed back into their
    /// queue (ready set for server jobs, availability event for desktop).
    pub async fn promote_due(&self, now: Timestamp) {
        let mut state = self.state.lock().await;
        promote_due_locked(&mut state, now, &self.bus);
    }

    /// Reclaim jobs whose locks expired; force-fail repeat offenders.
    pub async fn check_stalled(&self, now: Timestamp) {
        let expired: Vec<JobId> = {
            let state = self.state.lock().await;
            state
                .locks
                .iter()
                .filter(|(_, lock)| lock.deadline <= now)
                .map(|(id, _)| *id)
                .collect()
        };

        for job_id in expired {
            let mut state = self.state.lock().await;
            // Re-check under the lock; the worker may have finished meanwhile.
            let Some(lock) = state.locks.get(&job_id) else {
                continue;
            };
            if lock.deadline > now {
                continue;
            }
            let worker = lock.worker.clone();
            let stalls = state.stall_counts.entry(job_id).or_insert(0);
            *stalls += 1;
            let stalls = *stalls;

            tracing::warn!(
                job_id = %job_id,
                worker = %worker,
                stalls,
                "Claim lock expired without renewal"
            );

            if stalls > self.config.max_stalled_count {
                self.dead_letter_locked(state, job_id, FailureReason::SystemError)
                    .await;
                continue;
            }

            release_locked(&mut state, job_id);
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            let queued = job.queued_status();
            if transition(job, queued).is_err() {
                continue;
            }
            let snapshot = job.clone();
            if queued == JobStatus::Queued {
                let seq = state.seq_of.get(&job_id).copied().unwrap_or(u64::MAX);
                state.ready.insert((snapshot.priority, seq, job_id));
            }
            drop(state);

            let kind = match queued {
                JobStatus::QueuedForDesktop => StatusEventKind::DesktopAvailable,
                _ => StatusEventKind::Queued,
            };
            self.publish_for(&snapshot, kind, None);
        }
    }

    /// Prune completed jobs past the retention window, keeping the most
    /// recent `completed_keep_count` regardless of age.
    pub async fn sweep_retention(&self, now: Timestamp) {
        let cutoff =
            now - chrono::Duration::from_std(self.config.completed_retention).unwrap_or_else(|_| chrono::Duration::zero());

        let mut state = self.state.lock().await;
        let mut completed: Vec<(Timestamp, JobId)> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .map(|j| (j.completed_at.unwrap_or(j.created_at), j.id))
            .collect();
        completed.sort_by(|a, b| b.0.cmp(&a.0)); // newest first

        let stale: Vec<JobId> = completed
            .into_iter()
            .skip(self.config.completed_keep_count)
            .filter(|(at, _)| *at < cutoff)
            .map(|(_, id)| id)
            .collect();

        if stale.is_empty() {
            return;
        }

        let pruned = stale.len();
        for job_id in stale {
            state.jobs.remove(&job_id);
            state.seq_of.remove(&job_id);
            state.stall_counts.remove(&job_id);
        }
        tracing::info!(pruned, "Retention sweep pruned completed jobs");
    }

    // -- Internals ----------------------------------------------------------

    /// Dead-letter a job: terminal status, failure record, event.
    ///
    /// Takes the state guard by value so the (idempotent) store insert and
    /// the event publish happen after bookkeeping is consistent.
    async fn dead_letter_locked(
        &self,
        mut state: tokio::sync::MutexGuard<'_, BrokerState>,
        job_id: JobId,
        reason: FailureReason,
    ) {
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return;
        };
        if transition(job, JobStatus::DeadLetter).is_err() {
            return;
        }
        job.failed_at = Some(chrono::Utc::now());
        let snapshot = job.clone();
        release_locked(&mut state, job_id);
        state.stall_counts.remove(&job_id);
        drop(state);

        let record = FailureRecord::from_job(&snapshot, reason);
        self.dead_letters.add(record).await;

        self.publish_for(
            &snapshot,
            StatusEventKind::DeadLettered,
            Some(serde_json::json!({
                "reason": reason.as_str(),
                "error": snapshot.last_error,
                "attempts": snapshot.attempts,
            })),
        );
    }

    fn publish_for(&self, job: &Job, kind: StatusEventKind, payload: Option<serde_json::Value>) {
        let mut event = StatusEvent::new(kind, job.id, job.user_id.clone());
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.bus.publish(event);
    }
}

/// Check a presented authority token against the live lock.
fn verify_token(state: &BrokerState, job_id: JobId, token: Uuid) -> Result<(), BrokerError> {
    match state.locks.get(&job_id) {
        Some(lock) if lock.token == token => Ok(()),
        _ => Err(BrokerError::StaleClaim(job_id)),
    }
}

/// Apply a transition after checking the state machine.
fn transition(job: &mut Job, next: JobStatus) -> Result<(), BrokerError> {
    if !job.status.can_transition(next) {
        return Err(BrokerError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to: next,
        });
    }
    job.status = next;
    Ok(())
}

/// Drop the lock for a job, if any.
fn release_locked(state: &mut BrokerState, job_id: JobId) {
    state.locks.remove(&job_id);
}

/// Remove a job from the ready/delayed queues it may be waiting in.
fn remove_from_queues_locked(state: &mut BrokerState, job_id: JobId, status: JobStatus) {
    if status == JobStatus::Queued {
        if let Some(seq) = state.seq_of.get(&job_id).copied() {
            if let Some(priority) = state.jobs.get(&job_id).map(|j| j.priority) {
                state.ready.remove(&(priority, seq, job_id));
            }
        }
    }
    if status == JobStatus::Retrying {
        if let Some(due) = state.jobs.get(&job_id).and_then(|j| j.next_retry_at) {
            state.delayed.remove(&(due, job_id));
        }
    }
}

/// Promote due retries. Server jobs rejoin the ready set at their original
/// priority and sequence; desktop jobs are re-announced on the availability
/// channel.
fn promote_due_locked(state: &mut BrokerState, now: Timestamp, bus: &EventBus) {
    let due: Vec<(Timestamp, JobId)> = state
        .delayed
        .iter()
        .take_while(|(at, _)| *at <= now)
        .copied()
        .collect();

    for (at, job_id) in due {
        state.delayed.remove(&(at, job_id));
        let Some(job) = state.jobs.get_mut(&job_id) else {
            continue;
        };
        let queued = job.queued_status();
        if transition(job, queued).is_err() {
            continue;
        }
        job.next_retry_at = None;
        let snapshot = job.clone();

        match queued {
            JobStatus::Queued => {
                let seq = state.seq_of.get(&job_id).copied().unwrap_or(u64::MAX);
                state.ready.insert((snapshot.priority, seq, job_id));
                bus.publish(StatusEvent::new(
                    StatusEventKind::Queued,
                    job_id,
                    snapshot.user_id.clone(),
                ));
            }
            _ => {
                bus.publish(StatusEvent::new(
                    StatusEventKind::DesktopAvailable,
                    job_id,
                    snapshot.user_id.clone(),
                ));
            }
        }
    }
}
