//! Authenticated HTTP client for the desktop <-> server protocol.
//!
//! [`JobServer`] is the seam the coordinator talks through; [`ApiClient`]
//! is the production implementation over reqwest. A denied claim is a
//! normal outcome (`Ok(None)`), not an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobswipe_core::{AutomationResult, JobId, JobPayload, UserProfileSnapshot};

/// Errors from the desktop HTTP protocol.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (connection refused, DNS, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server rejected request: {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// A granted claim: the authority token plus everything needed to execute.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantedClaim {
    pub token: Uuid,
    pub job: ClaimedJob,
}

/// Job material the server sends with a granted claim.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedJob {
    pub application_id: JobId,
    pub payload: JobPayload,
    pub profile: UserProfileSnapshot,
    pub timeout_secs: u64,
    pub headless: bool,
}

/// Terminal report for one application.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub application_id: JobId,
    pub token: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AutomationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancelled: bool,
}

/// The server operations the coordinator needs.
#[async_trait]
pub trait JobServer: Send + Sync {
    /// Race for the claim. `Ok(None)` means another device won.
    async fn claim(&self, application_id: JobId) -> Result<Option<GrantedClaim>, ClientError>;

    /// Report execution progress (0-100).
    async fn progress(
        &self,
        application_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), ClientError>;

    /// Report the terminal outcome.
    async fn complete(&self, report: CompletionReport) -> Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Production [`JobServer`] over authenticated HTTP.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

/// Server response envelope `{ "data": ... }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ClaimData {
    granted: bool,
    #[serde(default)]
    token: Option<Uuid>,
    #[serde(default)]
    job: Option<ClaimedJob>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobServer for ApiClient {
    async fn claim(&self, application_id: JobId) -> Result<Option<GrantedClaim>, ClientError> {
        let body = serde_json::json!({ "application_id": application_id });
        let envelope: Envelope<ClaimData> = self.post("/api/v1/desktop/claim", &body).await?;

        let data = envelope.data;
        match (data.granted, data.token, data.job) {
            (true, Some(token), Some(job)) => Ok(Some(GrantedClaim { token, job })),
            _ => Ok(None),
        }
    }

    async fn progress(
        &self,
        application_id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({
            "application_id": application_id,
            "progress": progress,
            "message": message,
        });
        let _: Envelope<serde_json::Value> = self.post("/api/v1/desktop/progress", &body).await?;
        Ok(())
    }

    async fn complete(&self, report: CompletionReport) -> Result<(), ClientError> {
        let body = serde_json::to_value(&report).map_err(|e| ClientError::Rejected {
            status: 0,
            message: format!("Unserialisable report: {e}"),
        })?;
        let _: Envelope<serde_json::Value> = self.post("/api/v1/desktop/complete", &body).await?;
        Ok(())
    }
}
