//! Integration tests for the desktop claim coordinator against a scripted
//! server and adapter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use jobswipe_core::adapter::{ExecutionAdapter, ExecutionOptions};
use jobswipe_core::{
    AutomationResult, ExecutionError, ExecutionErrorKind, JobId, JobPayload, UserProfileSnapshot,
};
use jobswipe_desktop::{
    ClientError, CompletionReport, CoordinatorConfig, DesktopClaimCoordinator, GrantedClaim,
    JobServer,
};

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

/// In-memory [`JobServer`]: grants every claim and records all traffic.
struct MockServer {
    claims: Mutex<Vec<JobId>>,
    progress: Mutex<Vec<(JobId, u8)>>,
    completions: Mutex<Vec<CompletionReport>>,
}

impl MockServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            claims: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
        })
    }

    async fn completions(&self) -> Vec<CompletionReport> {
        self.completions.lock().await.clone()
    }
}

fn claimed_job(application_id: JobId) -> jobswipe_desktop::client::ClaimedJob {
    serde_json::from_value(serde_json::json!({
        "application_id": application_id,
        "payload": {
            "external_id": "ext-1",
            "title": "Engineer",
            "company": "Acme",
            "apply_url": "https://careers.example.com/1",
        },
        "profile": {
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
        },
        "timeout_secs": 30,
        "headless": false,
    }))
    .expect("claimed job fixture")
}

#[async_trait]
impl JobServer for MockServer {
    async fn claim(&self, application_id: JobId) -> Result<Option<GrantedClaim>, ClientError> {
        self.claims.lock().await.push(application_id);
        Ok(Some(GrantedClaim {
            token: Uuid::new_v4(),
            job: claimed_job(application_id),
        }))
    }

    async fn progress(
        &self,
        application_id: JobId,
        progress: u8,
        _message: Option<String>,
    ) -> Result<(), ClientError> {
        self.progress.lock().await.push((application_id, progress));
        Ok(())
    }

    async fn complete(&self, report: CompletionReport) -> Result<(), ClientError> {
        self.completions.lock().await.push(report);
        Ok(())
    }
}

/// Server that never grants a claim.
struct DenyingServer {
    claims: Mutex<usize>,
}

#[async_trait]
impl JobServer for DenyingServer {
    async fn claim(&self, _application_id: JobId) -> Result<Option<GrantedClaim>, ClientError> {
        *self.claims.lock().await += 1;
        Ok(None)
    }

    async fn progress(&self, _: JobId, _: u8, _: Option<String>) -> Result<(), ClientError> {
        panic!("losing claimant must not report progress");
    }

    async fn complete(&self, _: CompletionReport) -> Result<(), ClientError> {
        panic!("losing claimant must not report completion");
    }
}

// ---------------------------------------------------------------------------
// Scripted adapter
// ---------------------------------------------------------------------------

enum Step {
    Succeed,
    Fail,
    Hang,
}

struct ScriptedAdapter {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<usize>,
}

impl ScriptedAdapter {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(0),
        })
    }

    async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedAdapter {
    async fn execute(
        &self,
        _payload: &JobPayload,
        _profile: &UserProfileSnapshot,
        _options: &ExecutionOptions,
    ) -> Result<AutomationResult, ExecutionError> {
        *self.calls.lock().await += 1;
        let step = self.steps.lock().await.pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(AutomationResult::succeeded(Some("CONF123456".into()))),
            Step::Fail => Err(ExecutionError::new(
                ExecutionErrorKind::NetworkError,
                "connection reset",
            )),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(AutomationResult::succeeded(None))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        max_concurrent_executions: 1,
        retry_delay: Duration::from_millis(10),
        max_local_retries: 2,
        cancel_grace: Duration::from_millis(50),
        buffer_size: 1,
    }
}

/// Poll until `server` has `n` completion reports or the deadline passes.
async fn wait_for_completions(server: &MockServer, n: usize) -> Vec<CompletionReport> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let completions = server.completions().await;
        if completions.len() >= n {
            return completions;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {n} completions"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claims_executes_and_reports_success() {
    let server = MockServer::new();
    let adapter = ScriptedAdapter::new(vec![Step::Succeed]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(),
    );

    let job_id = Uuid::new_v4();
    coordinator.handle_available(job_id).await;

    let completions = wait_for_completions(&server, 1).await;
    assert!(completions[0].success);
    assert!(!completions[0].cancelled);
    assert_eq!(completions[0].application_id, job_id);
    assert_eq!(
        completions[0]
            .result
            .as_ref()
            .and_then(|r| r.confirmation_number.as_deref()),
        Some("CONF123456")
    );

    assert_eq!(adapter.calls().await, 1);
    assert!(coordinator.active_executions().await.is_empty());
}

#[tokio::test]
async fn lost_claim_race_has_no_side_effects() {
    let server = Arc::new(DenyingServer {
        claims: Mutex::new(0),
    });
    let adapter = ScriptedAdapter::new(vec![]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(),
    );

    coordinator.handle_available(Uuid::new_v4()).await;

    // Give any stray task a moment to run.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*server.claims.lock().await, 1);
    assert_eq!(adapter.calls().await, 0);
    assert!(coordinator.active_executions().await.is_empty());
    assert_eq!(coordinator.pending_count().await, 0);
}

#[tokio::test]
async fn failed_attempt_retries_locally_then_succeeds() {
    let server = MockServer::new();
    let adapter = ScriptedAdapter::new(vec![Step::Fail, Step::Succeed]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(),
    );

    let job_id = Uuid::new_v4();
    coordinator.handle_available(job_id).await;

    let completions = wait_for_completions(&server, 1).await;
    assert!(completions[0].success, "second attempt should succeed");
    assert_eq!(adapter.calls().await, 2);

    // One claim, two attempts: the local retry queue never re-claims.
    assert_eq!(server.claims.lock().await.len(), 1);

    // Each attempt gets a distinct execution id in the progress stream.
    let progress = server.progress.lock().await;
    assert_eq!(progress.iter().filter(|(_, p)| *p == 0).count(), 2);
}

#[tokio::test]
async fn exhausted_local_retries_report_failure() {
    let server = MockServer::new();
    let adapter = ScriptedAdapter::new(vec![Step::Fail, Step::Fail]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(),
    );

    coordinator.handle_available(Uuid::new_v4()).await;

    let completions = wait_for_completions(&server, 1).await;
    assert!(!completions[0].success);
    assert!(!completions[0].cancelled);
    assert_eq!(completions[0].error.as_deref(), Some("connection reset"));
    assert_eq!(adapter.calls().await, 2);
}

#[tokio::test]
async fn cancel_execution_reports_cancelled() {
    let server = MockServer::new();
    let adapter = ScriptedAdapter::new(vec![Step::Hang]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(),
    );

    let job_id = Uuid::new_v4();
    coordinator.handle_available(job_id).await;

    // Wait until the execution is live.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let execution_id = loop {
        let active = coordinator.active_executions().await;
        if let Some(id) = active.first() {
            break *id;
        }
        assert!(tokio::time::Instant::now() < deadline, "never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert!(coordinator.cancel_execution(execution_id).await);

    let completions = wait_for_completions(&server, 1).await;
    assert!(completions[0].cancelled);
    assert!(!completions[0].success);
    assert_eq!(completions[0].application_id, job_id);
    assert!(coordinator.active_executions().await.is_empty());

    // Cancelling an unknown execution is a no-op.
    assert!(!coordinator.cancel_execution(Uuid::new_v4()).await);
}

#[tokio::test]
async fn full_buffer_leaves_jobs_for_other_devices() {
    let server = MockServer::new();
    // One hanging execution occupies the single slot.
    let adapter = ScriptedAdapter::new(vec![Step::Hang, Step::Hang, Step::Hang]);
    let coordinator = DesktopClaimCoordinator::new(
        Arc::clone(&server) as Arc<dyn JobServer>,
        Arc::clone(&adapter) as Arc<dyn ExecutionAdapter>,
        fast_config(), // buffer_size = 1, max_concurrent = 1
    );

    coordinator.handle_available(Uuid::new_v4()).await; // -> active
    coordinator.handle_available(Uuid::new_v4()).await; // -> pending
    coordinator.handle_available(Uuid::new_v4()).await; // buffer full, skipped

    assert_eq!(
        server.claims.lock().await.len(),
        2,
        "third announcement must not be claimed"
    );
    assert_eq!(coordinator.pending_count().await, 1);
}
