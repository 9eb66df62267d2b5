//! The job envelope and its status state machine.
//!
//! A [`Job`] is the one authoritative record both worker pools coordinate
//! on. Its [`JobStatus`] transitions form a DAG; [`JobStatus::can_transition`]
//! is the single legality check every broker mutation goes through.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ExecutionErrorKind;
use crate::payload::{JobPayload, UserProfileSnapshot};
use crate::result::AutomationResult;
use crate::types::{JobId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Dequeue priority. Lower discriminant = claimed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Immediate = 0,
    Urgent = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// Which pool executes the job. Fixed at creation, never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// The server-resident worker pool runs the automation.
    Server,
    /// The job is handed off to the user's desktop client.
    Desktop,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Server => "server",
            ExecutionMode::Desktop => "desktop",
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Unified status state machine governing both execution paths.
///
/// `QueuedForDesktop` is a `Queued` sub-state used only for the desktop
/// handoff fork. `Completed`, `DeadLetter`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    QueuedForDesktop,
    Claimed,
    Processing,
    Retrying,
    Completed,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::QueuedForDesktop => "queued_for_desktop",
            JobStatus::Claimed => "claimed",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::DeadLetter => "dead_letter",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::DeadLetter | JobStatus::Cancelled
        )
    }

    /// Whether the job is waiting to be claimed (either fork).
    pub fn is_queued(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::QueuedForDesktop)
    }

    /// Legality check for a single transition.
    ///
    /// Encodes the DAG: no cycle ever re-enters a non-initial state except
    /// through the explicit retry edge, and nothing leaves a terminal state.
    pub fn can_transition(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Queued | QueuedForDesktop | Cancelled),
            Queued => matches!(next, Claimed | Cancelled),
            QueuedForDesktop => matches!(next, Claimed | Cancelled),
            // `Queued` from `Claimed`/`Processing` is the stalled-lock
            // reclaim edge; `DeadLetter` from `Claimed` is the
            // max-stalled force-fail.
            Claimed => matches!(
                next,
                Processing | Queued | QueuedForDesktop | DeadLetter | Cancelled
            ),
            Processing => matches!(
                next,
                Completed | Retrying | Queued | QueuedForDesktop | DeadLetter | Cancelled
            ),
            Retrying => matches!(next, Queued | QueuedForDesktop | DeadLetter | Cancelled),
            Completed | DeadLetter | Cancelled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission envelope
// ---------------------------------------------------------------------------

/// Per-job execution tunables supplied by the submitter.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobOptions {
    /// Run the executor's browser headless (server mode default).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Per-attempt execution timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 10, max = 3600))]
    pub timeout_secs: u64,

    /// Total attempt budget, including the first attempt.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default)]
    pub priority: Priority,
}

fn default_headless() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            priority: Priority::Normal,
        }
    }
}

/// What the submission collaborator hands the broker.
///
/// Validated exactly once at the ingestion boundary; everything downstream
/// trusts the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobSubmission {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: UserId,

    #[validate(nested)]
    pub job: JobPayload,

    #[validate(nested)]
    pub profile: UserProfileSnapshot,

    pub execution_mode: ExecutionMode,

    #[serde(default)]
    #[validate(nested)]
    pub options: JobOptions,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The authoritative job record.
///
/// Created by the broker from a [`JobSubmission`]; mutated only through the
/// broker's claim protocol; never deleted, only transitioned to a terminal
/// state or archived as a failure record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub payload: JobPayload,
    pub profile: UserProfileSnapshot,
    pub priority: Priority,
    pub execution_mode: ExecutionMode,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub options: JobOptions,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ExecutionErrorKind>,
    pub result: Option<AutomationResult>,
}

impl Job {
    /// Build a fresh `Pending` job from a validated submission.
    pub fn from_submission(submission: JobSubmission) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: submission.user_id,
            priority: submission.options.priority,
            execution_mode: submission.execution_mode,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: submission.options.max_attempts,
            payload: submission.job,
            profile: submission.profile,
            options: submission.options,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            next_retry_at: None,
            last_error: None,
            last_error_kind: None,
            result: None,
        }
    }

    /// The queued state matching this job's execution mode.
    pub fn queued_status(&self) -> JobStatus {
        match self.execution_mode {
            ExecutionMode::Server => JobStatus::Queued,
            ExecutionMode::Desktop => JobStatus::QueuedForDesktop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_immediate_first() {
        assert!(Priority::Immediate < Priority::Urgent);
        assert!(Priority::Urgent < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::DeadLetter,
            JobStatus::Cancelled,
        ] {
            for next in [
                JobStatus::Pending,
                JobStatus::Queued,
                JobStatus::Claimed,
                JobStatus::Processing,
                JobStatus::Retrying,
                JobStatus::Completed,
                JobStatus::DeadLetter,
                JobStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition(next),
                    "{terminal:?} -> {next:?} must be illegal"
                );
            }
        }
    }

    #[test]
    fn happy_path_is_legal() {
        assert!(JobStatus::Pending.can_transition(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition(JobStatus::Claimed));
        assert!(JobStatus::Claimed.can_transition(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition(JobStatus::Completed));
    }

    #[test]
    fn retry_edge_goes_through_queued() {
        assert!(JobStatus::Processing.can_transition(JobStatus::Retrying));
        assert!(JobStatus::Retrying.can_transition(JobStatus::Queued));
        // A retry never jumps straight back to Processing.
        assert!(!JobStatus::Retrying.can_transition(JobStatus::Processing));
    }

    #[test]
    fn dead_letter_never_requeues() {
        assert!(!JobStatus::DeadLetter.can_transition(JobStatus::Queued));
        assert!(!JobStatus::DeadLetter.can_transition(JobStatus::Retrying));
    }

    #[test]
    fn submission_defaults_applied() {
        let options: JobOptions = serde_json::from_str("{}").expect("empty options parse");
        assert!(options.headless);
        assert_eq!(options.timeout_secs, 300);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.priority, Priority::Normal);
    }
}
