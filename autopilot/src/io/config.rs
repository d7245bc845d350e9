//! Engine configuration stored under `<task_dir>/config.toml`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::status::DEFAULT_MAX_ATTEMPTS;
use crate::io::documents::{read_text, write_atomic};

/// Engine configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// `maxAttempts` given to every feature when status is first created.
    pub max_attempts_default: u32,

    /// Wall-clock limit for a single feature test command.
    pub test_timeout_secs: u64,

    /// Truncate captured test stdout/stderr beyond this many bytes.
    pub test_output_limit_bytes: usize,

    /// Ledger entries surfaced when a session starts.
    pub recent_progress_limit: usize,

    pub regression: RegressionConfig,
    pub reviewer: ReviewerConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegressionConfig {
    /// Full-suite shell command. Unset disables the regression gate.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewerConfig {
    /// Reviewer argv; receives the prompt on stdin, prints a JSON verdict.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--output-format".to_string(),
                "text".to_string(),
            ],
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Notification argv. Unset logs notifications instead.
    pub command: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts_default: DEFAULT_MAX_ATTEMPTS,
            test_timeout_secs: 120,
            test_output_limit_bytes: 50_000,
            recent_progress_limit: 10,
            regression: RegressionConfig::default(),
            reviewer: ReviewerConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.test_output_limit_bytes == 0 {
            return Err(anyhow!("test_output_limit_bytes must be > 0"));
        }
        if self.reviewer.timeout_secs == 0 {
            return Err(anyhow!("reviewer.timeout_secs must be > 0"));
        }
        if !is_usable_argv(&self.reviewer.command) {
            return Err(anyhow!("reviewer.command must be a non-empty array"));
        }
        if let Some(command) = &self.regression.command
            && command.trim().is_empty()
        {
            return Err(anyhow!("regression.command must not be empty when set"));
        }
        if let Some(command) = &self.notify.command
            && !is_usable_argv(command)
        {
            return Err(anyhow!("notify.command must be a non-empty array when set"));
        }
        Ok(())
    }
}

fn is_usable_argv(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub async fn load_config(path: &Path) -> Result<EngineConfig> {
    let cfg = match read_text(path).await? {
        Some(contents) => toml::from_str::<EngineConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?,
        None => EngineConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub async fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf).await
}
