//! The seam between the coordination core and the automation engine.
//!
//! Both worker pools drive an [`ExecutionAdapter`]: the server pool wraps the
//! headless automation engine, the desktop client wraps the local browser
//! runner. The core treats the adapter as opaque and only enforces the
//! per-attempt timeout around it.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::payload::{JobPayload, UserProfileSnapshot};
use crate::result::AutomationResult;

/// Executor tunables derived from the job's [`JobOptions`](crate::JobOptions).
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub headless: bool,
    /// Per-attempt timeout enforced by [`execute_with_timeout`].
    pub timeout_secs: u64,
}

/// Opaque automation executor.
///
/// Implementations run the actual browser automation and must return a
/// structured [`AutomationResult`] or a classified [`ExecutionError`].
/// They should honor cooperative cancellation by returning promptly when
/// their future is dropped.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(
        &self,
        payload: &JobPayload,
        profile: &UserProfileSnapshot,
        options: &ExecutionOptions,
    ) -> Result<AutomationResult, ExecutionError>;
}

/// Run the adapter under the per-attempt timeout.
///
/// A timeout is reported as a classified [`ExecutionError`] so it flows
/// through the same retry path as any other transient failure.
pub async fn execute_with_timeout(
    adapter: &dyn ExecutionAdapter,
    payload: &JobPayload,
    profile: &UserProfileSnapshot,
    options: &ExecutionOptions,
) -> Result<AutomationResult, ExecutionError> {
    let timeout = std::time::Duration::from_secs(options.timeout_secs);

    match tokio::time::timeout(timeout, adapter.execute(payload, profile, options)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::timed_out(options.timeout_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionErrorKind;
    use crate::result::AutomationResult;

    struct SlowAdapter;

    #[async_trait]
    impl ExecutionAdapter for SlowAdapter {
        async fn execute(
            &self,
            _payload: &JobPayload,
            _profile: &UserProfileSnapshot,
            _options: &ExecutionOptions,
        ) -> Result<AutomationResult, ExecutionError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(AutomationResult::succeeded(None))
        }
    }

    fn sample_payload() -> JobPayload {
        JobPayload {
            external_id: "x-1".into(),
            title: "Engineer".into(),
            company: "Acme".into(),
            apply_url: "https://careers.example.com/1".into(),
            location: None,
            description: None,
            requirements: vec![],
        }
    }

    fn sample_profile() -> UserProfileSnapshot {
        UserProfileSnapshot {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: None,
            resume_ref: None,
            cover_letter: None,
            current_title: None,
            skills: vec![],
            answers: serde_json::Value::Null,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_enforced_and_classified() {
        let options = ExecutionOptions {
            headless: true,
            timeout_secs: 5,
        };

        let err = execute_with_timeout(&SlowAdapter, &sample_payload(), &sample_profile(), &options)
            .await
            .expect_err("slow adapter must time out");

        assert_eq!(err.kind, ExecutionErrorKind::Timeout);
    }
}
