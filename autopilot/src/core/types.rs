//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between core components and the
//! collaborators that feed them. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Outcome of running one test command.
///
/// Collaborators never fail with an error: a command that could not be
/// spawned, crashed, or timed out is reported as `passed = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub passed: bool,
    pub duration_ms: u64,
    /// Captured stdout/stderr, bounded by the runner's output limit.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `None` when the process never produced an exit status.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    /// Set only when the command could not be started at all.
    #[serde(default)]
    pub spawn_failed: bool,
}

impl TestResult {
    pub fn passed(duration_ms: u64, output: impl Into<String>) -> Self {
        Self {
            passed: true,
            duration_ms,
            output: output.into(),
            error: None,
            exit_code: Some(0),
            timed_out: false,
            spawn_failed: false,
        }
    }

    pub fn failed(duration_ms: u64, exit_code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            duration_ms,
            output: String::new(),
            error: Some(error.into()),
            exit_code,
            timed_out: false,
            spawn_failed: false,
        }
    }

    /// The command never started (missing shell, bad working directory).
    pub fn not_run(duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            spawn_failed: true,
            ..Self::failed(duration_ms, None, error)
        }
    }

    /// True only when the command was never started. A suite killed by a
    /// signal ran, so it has no exit code but still counts as a failure.
    pub fn could_not_run(&self) -> bool {
        !self.passed && self.spawn_failed
    }

    /// Short failure description suitable for `lastError` and ledger lines.
    pub fn failure_summary(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated without exit status".to_string(),
        }
    }
}
