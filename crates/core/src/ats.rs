//! ATS / job-board detection from the apply URL.
//!
//! The executor picks its form-filling strategy per board; the core only
//! needs the label for routing, logging, and payload enrichment.

use serde::{Deserialize, Serialize};

/// Known applicant-tracking systems and job boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtsKind {
    LinkedIn,
    Greenhouse,
    Lever,
    Workday,
    Indeed,
    Generic,
}

impl AtsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AtsKind::LinkedIn => "linkedin",
            AtsKind::Greenhouse => "greenhouse",
            AtsKind::Lever => "lever",
            AtsKind::Workday => "workday",
            AtsKind::Indeed => "indeed",
            AtsKind::Generic => "generic",
        }
    }

    /// Detect the board from an apply URL. Unknown hosts map to `Generic`.
    pub fn detect(apply_url: &str) -> Self {
        let url = apply_url.to_lowercase();

        if url.contains("linkedin.com") {
            AtsKind::LinkedIn
        } else if url.contains("greenhouse.io") {
            AtsKind::Greenhouse
        } else if url.contains("lever.co") {
            AtsKind::Lever
        } else if url.contains("myworkdayjobs.com") || url.contains("workday.com") {
            AtsKind::Workday
        } else if url.contains("indeed.com") {
            AtsKind::Indeed
        } else {
            AtsKind::Generic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_boards() {
        assert_eq!(
            AtsKind::detect("https://www.linkedin.com/jobs/view/123"),
            AtsKind::LinkedIn
        );
        assert_eq!(
            AtsKind::detect("https://boards.greenhouse.io/acme/jobs/42"),
            AtsKind::Greenhouse
        );
        assert_eq!(
            AtsKind::detect("https://jobs.lever.co/acme/abc"),
            AtsKind::Lever
        );
        assert_eq!(
            AtsKind::detect("https://acme.wd1.myworkdayjobs.com/careers"),
            AtsKind::Workday
        );
        assert_eq!(
            AtsKind::detect("https://www.indeed.com/viewjob?jk=1"),
            AtsKind::Indeed
        );
    }

    #[test]
    fn unknown_host_is_generic() {
        assert_eq!(
            AtsKind::detect("https://careers.example.com/apply/9"),
            AtsKind::Generic
        );
    }

    #[test]
    fn detection_is_case_insensitive() {
        assert_eq!(
            AtsKind::detect("HTTPS://BOARDS.GREENHOUSE.IO/ACME"),
            AtsKind::Greenhouse
        );
    }
}
