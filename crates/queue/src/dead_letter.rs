//! Permanent store for jobs that exhausted their retry budget.
//!
//! Entries are immutable once created and inserted at most once per job;
//! requeue/delete is a manual operator action outside this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use jobswipe_core::{FailureReason, Job, JobId, Timestamp, UserId};

/// One dead-lettered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub original_job_id: JobId,
    pub user_id: UserId,
    pub failed_at: Timestamp,
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub failure_reason: FailureReason,
    /// Queue the job came from (`server` or `desktop`).
    pub original_queue: String,
}

impl FailureRecord {
    /// Build a record from the job's final state.
    pub fn from_job(job: &Job, reason: FailureReason) -> Self {
        Self {
            original_job_id: job.id,
            user_id: job.user_id.clone(),
            failed_at: chrono::Utc::now(),
            attempts_made: job.attempts,
            last_error: job.last_error.clone(),
            failure_reason: reason,
            original_queue: job.execution_mode.as_str().to_string(),
        }
    }
}

/// Thread-safe dead-letter store, shared as `Arc<DeadLetterStore>`.
pub struct DeadLetterStore {
    records: RwLock<HashMap<JobId, FailureRecord>>,
}

impl DeadLetterStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a record. Idempotent: re-adding the same job id is a no-op.
    ///
    /// Returns `true` if the record was inserted, `false` if one already
    /// existed for the job.
    pub async fn add(&self, record: FailureRecord) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(&record.original_job_id) {
            tracing::debug!(
                job_id = %record.original_job_id,
                "Dead-letter record already present, skipping"
            );
            return false;
        }

        tracing::warn!(
            job_id = %record.original_job_id,
            reason = record.failure_reason.as_str(),
            attempts = record.attempts_made,
            "Job dead-lettered"
        );
        records.insert(record.original_job_id, record);
        true
    }

    /// Fetch a single record by job id.
    pub async fn get(&self, job_id: JobId) -> Option<FailureRecord> {
        self.records.read().await.get(&job_id).cloned()
    }

    /// All records with the given failure reason, newest first.
    pub async fn list_by_reason(&self, reason: FailureReason) -> Vec<FailureRecord> {
        let mut out: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.failure_reason == reason)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        out
    }

    /// All records that failed at or after `since`, newest first.
    pub async fn list_since(&self, since: Timestamp) -> Vec<FailureRecord> {
        let mut out: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.failed_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        out
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for DeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobswipe_core::{
        ExecutionMode, JobOptions, JobPayload, JobSubmission, UserProfileSnapshot,
    };

    fn sample_job() -> Job {
        let submission = JobSubmission {
            user_id: "user-1".into(),
            job: JobPayload {
                external_id: "ext-1".into(),
                title: "Engineer".into(),
                company: "Acme".into(),
                apply_url: "https://careers.example.com/1".into(),
                location: None,
                description: None,
                requirements: vec![],
            },
            profile: UserProfileSnapshot {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                phone: None,
                resume_ref: None,
                cover_letter: None,
                current_title: None,
                skills: vec![],
                answers: serde_json::Value::Null,
            },
            execution_mode: ExecutionMode::Server,
            options: JobOptions::default(),
        };
        Job::from_submission(submission)
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = DeadLetterStore::new();
        let job = sample_job();

        let record = FailureRecord::from_job(&job, FailureReason::Timeout);
        assert!(store.add(record.clone()).await);
        assert!(!store.add(record).await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_by_reason_filters() {
        let store = DeadLetterStore::new();

        let a = sample_job();
        let b = sample_job();
        store
            .add(FailureRecord::from_job(&a, FailureReason::Timeout))
            .await;
        store
            .add(FailureRecord::from_job(&b, FailureReason::MaxAttempts))
            .await;

        let timeouts = store.list_by_reason(FailureReason::Timeout).await;
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].original_job_id, a.id);
    }

    #[tokio::test]
    async fn list_since_excludes_older() {
        let store = DeadLetterStore::new();
        let job = sample_job();
        store
            .add(FailureRecord::from_job(&job, FailureReason::SystemError))
            .await;

        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(store.list_since(future).await.is_empty());

        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.list_since(past).await.len(), 1);
    }
}
