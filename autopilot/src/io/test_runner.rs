//! Test execution collaborator.
//!
//! A runner never returns an error: spawn failures, non-zero exits and
//! timeouts all become a failing [`TestResult`].

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::core::types::TestResult;
use crate::io::config::EngineConfig;
use crate::io::process::{run_command_with_timeout, shell_command};

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, command: &str, workdir: &Path) -> TestResult;
}

/// Runs test commands through `sh -c` in the project directory.
#[derive(Debug, Clone)]
pub struct ShellTestRunner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellTestRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.test_timeout_secs),
            cfg.test_output_limit_bytes,
        )
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(command = %command))]
    async fn run(&self, command: &str, workdir: &Path) -> TestResult {
        let started = Instant::now();
        let mut cmd = shell_command(command);
        cmd.current_dir(workdir);
        let outcome =
            run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes).await;
        let duration_ms = elapsed_ms(started);

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test command could not run");
                return TestResult::not_run(
                    duration_ms,
                    format!("could not run test command: {err:#}"),
                );
            }
        };

        let text = output.combined("test");
        let result = if output.timed_out {
            TestResult {
                output: text,
                timed_out: true,
                ..TestResult::failed(
                    duration_ms,
                    None,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            }
        } else if output.success() {
            TestResult::passed(duration_ms, text)
        } else {
            let exit_code = output.exit_code();
            TestResult {
                output: text,
                ..TestResult::failed(duration_ms, exit_code, exit_message(exit_code))
            }
        };
        info!(passed = result.passed, duration_ms, "test command finished");
        result
    }
}

fn exit_message(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
