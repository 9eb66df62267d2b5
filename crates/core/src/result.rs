//! Standardized automation result envelope.
//!
//! Every executor — server pool or desktop client — reports back in this
//! shape, so the broker, the realtime fan-out, and operational tooling all
//! read one format regardless of where the automation ran.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// ApplicationStatus
// ---------------------------------------------------------------------------

/// Outcome status reported by the automation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Success,
    Failed,
    CaptchaRequired,
    LoginRequired,
    Timeout,
    RateLimited,
    FormError,
    NetworkError,
    UnknownError,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Success => "success",
            ApplicationStatus::Failed => "failed",
            ApplicationStatus::CaptchaRequired => "captcha_required",
            ApplicationStatus::LoginRequired => "login_required",
            ApplicationStatus::Timeout => "timeout",
            ApplicationStatus::RateLimited => "rate_limited",
            ApplicationStatus::FormError => "form_error",
            ApplicationStatus::NetworkError => "network_error",
            ApplicationStatus::UnknownError => "unknown_error",
        }
    }
}

// ---------------------------------------------------------------------------
// AutomationStep
// ---------------------------------------------------------------------------

/// One step in the automation run (navigate, fill form, submit, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStep {
    pub name: String,
    pub action: String,
    pub timestamp: Timestamp,
    pub success: bool,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// AutomationResult
// ---------------------------------------------------------------------------

/// The structured result an executor returns for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationResult {
    pub success: bool,
    pub status: ApplicationStatus,

    /// Application id issued by the target site, if the form produced one.
    #[serde(default)]
    pub application_id: Option<String>,

    #[serde(default)]
    pub confirmation_number: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub steps: Vec<AutomationStep>,

    /// Paths/URLs of screenshots captured during the run.
    #[serde(default)]
    pub screenshots: Vec<String>,

    /// Free-form executor metrics (page load times, retry counts, ...).
    #[serde(default)]
    pub performance_metrics: serde_json::Value,

    #[serde(default)]
    pub total_duration_ms: Option<i64>,

    /// Raw final-page text captured by the executor. Kept for debugging and
    /// scanned by [`extract_confirmation_number`] when the engine did not
    /// recognise a confirmation code itself.
    #[serde(default)]
    pub raw_output: Option<String>,
}

impl AutomationResult {
    /// A successful result with an optional confirmation number.
    pub fn succeeded(confirmation_number: Option<String>) -> Self {
        Self {
            success: true,
            status: ApplicationStatus::Success,
            application_id: None,
            confirmation_number,
            error_message: None,
            error_type: None,
            steps: Vec::new(),
            screenshots: Vec::new(),
            performance_metrics: serde_json::Value::Object(Default::default()),
            total_duration_ms: None,
            raw_output: None,
        }
    }

    /// A failed result carrying the error message and status.
    pub fn failed(status: ApplicationStatus, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            application_id: None,
            confirmation_number: None,
            error_message: Some(error_message.into()),
            error_type: None,
            steps: Vec::new(),
            screenshots: Vec::new(),
            performance_metrics: serde_json::Value::Object(Default::default()),
            total_duration_ms: None,
            raw_output: None,
        }
    }

    /// Record a step and keep the running log ordered.
    pub fn add_step(&mut self, name: impl Into<String>, action: impl Into<String>, success: bool) {
        self.steps.push(AutomationStep {
            name: name.into(),
            action: action.into(),
            timestamp: chrono::Utc::now(),
            success,
            duration_ms: None,
            error_message: None,
        });
    }

    /// Fraction of logged steps that succeeded (0.0 when no steps).
    pub fn step_success_rate(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let ok = self.steps.iter().filter(|s| s.success).count();
        ok as f64 / self.steps.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Confirmation-number extraction
// ---------------------------------------------------------------------------

/// Pull a likely confirmation/reference number out of free-form page text.
///
/// Patterns are tried in order of specificity; the first capture wins. The
/// keyword match is case-insensitive but the captured code is not, so prose
/// words after the keyword ("confirmation number is ...") are never captured.
pub fn extract_confirmation_number(text: &str) -> Option<String> {
    const PATTERNS: [&str; 6] = [
        r"(?i:confirmation)[^\n]*?\b([A-Z0-9][A-Z0-9-]{5,})\b",
        r"(?i:reference)[^\n]*?\b([A-Z0-9][A-Z0-9-]{5,})\b",
        r"(?i:application\s+id)[^\n]*?\b([A-Z0-9][A-Z0-9-]{5,})\b",
        r"(?i:tracking)[^\n]*?\b([A-Z0-9][A-Z0-9-]{5,})\b",
        r"(?i:ticket)[^\n]*?\b([A-Z0-9][A-Z0-9-]{5,})\b",
        r"\b([A-Z][A-Z0-9]{7,})\b",
    ];

    for pattern in PATTERNS {
        let re = regex::Regex::new(pattern).expect("confirmation pattern must compile");
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                return Some(m.as_str().to_string());
            }
        }
    }

    None
}
