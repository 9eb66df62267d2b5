//! Job payload and user profile snapshot.
//!
//! Both structs are validated once at the submission boundary; downstream
//! code (broker, workers, desktop coordinator) trusts them as-is.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// The job posting a submission targets.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobPayload {
    /// External posting id from the job board.
    #[validate(length(min = 1, message = "external_id must not be empty"))]
    pub external_id: String,

    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,

    #[validate(length(min = 1, message = "company must not be empty"))]
    pub company: String,

    /// URL of the application form the executor drives.
    #[validate(url(message = "apply_url must be a valid URL"))]
    pub apply_url: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Frozen copy of the user's profile taken at submission time.
///
/// A later profile edit must not change what an in-flight application
/// submits, so the snapshot travels with the job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UserProfileSnapshot {
    #[validate(length(min = 1, message = "first_name must not be empty"))]
    pub first_name: String,

    #[validate(length(min = 1, message = "last_name must not be empty"))]
    pub last_name: String,

    #[validate(email(message = "email must be a valid address"))]
    pub email: String,

    #[serde(default)]
    pub phone: Option<String>,

    /// Where the executor can fetch the resume (URL or local path,
    /// depending on execution mode).
    #[serde(default)]
    pub resume_ref: Option<String>,

    #[serde(default)]
    pub cover_letter: Option<String>,

    #[serde(default)]
    pub current_title: Option<String>,

    #[serde(default)]
    pub skills: Vec<String>,

    /// Pre-filled answers for screening questions, keyed by question slug.
    #[serde(default)]
    pub answers: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> JobPayload {
        JobPayload {
            external_id: "gh-4242".into(),
            title: "Software Engineer".into(),
            company: "Example Corp".into(),
            apply_url: "https://boards.greenhouse.io/example/jobs/4242".into(),
            location: Some("Remote".into()),
            description: None,
            requirements: vec!["Rust".into()],
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(valid_payload().validate().is_ok());
    }

    #[test]
    fn bad_apply_url_rejected() {
        let mut payload = valid_payload();
        payload.apply_url = "not a url".into();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn profile_requires_valid_email() {
        let profile = UserProfileSnapshot {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "not-an-email".into(),
            phone: None,
            resume_ref: None,
            cover_letter: None,
            current_title: None,
            skills: vec![],
            answers: serde_json::Value::Null,
        };
        assert!(profile.validate().is_err());
    }
}
