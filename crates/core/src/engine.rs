//! Subprocess bridge to the automation engine.
//!
//! The automation engine is an external program (the browser-automation
//! stack); this adapter hands it one job on stdin as JSON and reads the
//! structured result back from stdout. The engine's output may contain log
//! lines, so the parser scans for the last JSON object line.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::adapter::{ExecutionAdapter, ExecutionOptions};
use crate::ats::AtsKind;
use crate::error::ExecutionError;
use crate::payload::{JobPayload, UserProfileSnapshot};
use crate::result::{extract_confirmation_number, AutomationResult};

/// How to launch the automation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl EngineConfig {
    /// Load from `ENGINE_COMMAND` / `ENGINE_ARGS` (space-separated).
    ///
    /// Defaults launch the Python engine module used in development.
    pub fn from_env() -> Self {
        let command = std::env::var("ENGINE_COMMAND").unwrap_or_else(|_| "python3".into());
        let args: Vec<String> = std::env::var("ENGINE_ARGS")
            .unwrap_or_else(|_| "-m automation_engine.run".into())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self { command, args }
    }
}

/// [`ExecutionAdapter`] that runs the engine as a child process per attempt.
pub struct ProcessAdapter {
    config: EngineConfig,
}

impl ProcessAdapter {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecutionAdapter for ProcessAdapter {
    async fn execute(
        &self,
        payload: &JobPayload,
        profile: &UserProfileSnapshot,
        options: &ExecutionOptions,
    ) -> Result<AutomationResult, ExecutionError> {
        let input = engine_input(payload, profile, options);

        let mut child = tokio::process::Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::from_message(format!("Failed to spawn engine: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.to_string().as_bytes())
                .await
                .map_err(|e| {
                    ExecutionError::from_message(format!("Failed to write engine input: {e}"))
                })?;
            // Close stdin so the engine sees EOF.
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ExecutionError::from_message(format!("Failed to read engine output: {e}"))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::from_message(format!(
                "Engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let result = parse_engine_output(&stdout)
            .ok_or_else(|| ExecutionError::from_message("Engine produced no parseable result"))?;
        Ok(recover_confirmation(result))
    }
}

/// Build the JSON the engine reads from stdin.
///
/// The detected job board rides along so the engine can route to the right
/// per-company automation without re-deriving it from the URL.
fn engine_input(
    payload: &JobPayload,
    profile: &UserProfileSnapshot,
    options: &ExecutionOptions,
) -> serde_json::Value {
    serde_json::json!({
        "job": payload,
        "job_board": AtsKind::detect(&payload.apply_url).as_str(),
        "profile": profile,
        "options": {
            "headless": options.headless,
            "timeout_secs": options.timeout_secs,
        },
    })
}

/// Scan engine stdout for the last line that parses as an
/// [`AutomationResult`]. Log lines and progress chatter are skipped.
fn parse_engine_output(stdout: &str) -> Option<AutomationResult> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(|line| serde_json::from_str::<AutomationResult>(line).ok())
}

/// Fill in a missing confirmation number from the captured page text.
///
/// The engine does not always recognise the code on the final page; when a
/// successful run comes back without one, scan its `raw_output`.
fn recover_confirmation(mut result: AutomationResult) -> AutomationResult {
    if result.success && result.confirmation_number.is_none() {
        if let Some(raw) = result.raw_output.as_deref() {
            result.confirmation_number = extract_confirmation_number(raw);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_line_among_logs() {
        let stdout = r#"
[info] navigating to apply page
[info] filling form
{"success":true,"status":"success","confirmation_number":"CONF123456"}
"#;
        let result = parse_engine_output(stdout).expect("result line");
        assert!(result.success);
        assert_eq!(result.confirmation_number.as_deref(), Some("CONF123456"));
    }

    #[test]
    fn takes_the_last_json_line() {
        let stdout = concat!(
            "{\"success\":false,\"status\":\"failed\"}\n",
            "{\"success\":true,\"status\":\"success\"}\n",
        );
        let result = parse_engine_output(stdout).expect("result line");
        assert!(result.success);
    }

    #[test]
    fn no_json_yields_none() {
        assert!(parse_engine_output("all logs, no result").is_none());
    }

    #[test]
    fn input_carries_detected_job_board() {
        let payload = JobPayload {
            external_id: "gh-1".into(),
            title: "Engineer".into(),
            company: "Acme".into(),
            apply_url: "https://boards.greenhouse.io/acme/jobs/1".into(),
            location: None,
            description: None,
            requirements: vec![],
        };
        let profile = UserProfileSnapshot {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: None,
            resume_ref: None,
            cover_letter: None,
            current_title: None,
            skills: vec![],
            answers: serde_json::Value::Null,
        };
        let options = ExecutionOptions {
            headless: true,
            timeout_secs: 60,
        };

        let input = engine_input(&payload, &profile, &options);
        assert_eq!(input["job_board"], "greenhouse");
        assert_eq!(input["job"]["company"], "Acme");
        assert_eq!(input["options"]["timeout_secs"], 60);
    }

    #[test]
    fn missing_confirmation_is_recovered_from_raw_output() {
        let stdout = concat!(
            "[info] submitted\n",
            r#"{"success":true,"status":"success","raw_output":"Thanks! Your confirmation number is CONF123456."}"#,
            "\n",
        );
        let result = recover_confirmation(parse_engine_output(stdout).expect("result line"));
        assert_eq!(result.confirmation_number.as_deref(), Some("CONF123456"));
    }

    #[test]
    fn explicit_confirmation_is_left_alone() {
        let stdout = concat!(
            r#"{"success":true,"status":"success","confirmation_number":"GH-2024-88421","#,
            r#""raw_output":"reference XYZ99999"}"#,
            "\n",
        );
        let result = recover_confirmation(parse_engine_output(stdout).expect("result line"));
        assert_eq!(result.confirmation_number.as_deref(), Some("GH-2024-88421"));
    }
}
