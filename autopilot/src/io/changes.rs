//! Change and learning discovery for review context.
//!
//! Failures never abort a review: they are logged and degrade to an empty
//! summary.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::contradiction::extract_keywords;
use crate::core::goals::Feature;
use crate::io::documents::read_text;
use crate::io::process::{argv_command, run_command_with_timeout};

const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const GIT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;
const MAX_LEARNINGS: usize = 10;

/// Line delta for one file, from `git diff --numstat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub added: u32,
    pub removed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub files: Vec<FileChange>,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub learnings: Vec<String>,
}

impl ChangeSummary {
    pub fn from_files(files: Vec<FileChange>) -> Self {
        let lines_added = files.iter().map(|f| f.added).sum();
        let lines_removed = files.iter().map(|f| f.removed).sum();
        Self {
            files,
            lines_added,
            lines_removed,
            learnings: Vec::new(),
        }
    }

    /// One-line description, e.g. `3 files changed, +40/-7`.
    pub fn diff_summary(&self) -> String {
        if self.files.is_empty() {
            return "no changes detected".to_string();
        }
        format!(
            "{} file{} changed, +{}/-{}",
            self.files.len(),
            if self.files.len() == 1 { "" } else { "s" },
            self.lines_added,
            self.lines_removed
        )
    }
}

#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn changes(&self, feature: &Feature) -> ChangeSummary;
}

/// Reads the working-tree diff with git and learnings from a Markdown file.
#[derive(Debug, Clone)]
pub struct GitChangeSource {
    workdir: PathBuf,
    base: String,
    learnings_path: PathBuf,
}

impl GitChangeSource {
    pub fn new(workdir: impl Into<PathBuf>, learnings_path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            base: "HEAD".to_string(),
            learnings_path: learnings_path.into(),
        }
    }

    /// Diff against `base` instead of `HEAD`.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    async fn numstat(&self) -> Result<Vec<FileChange>> {
        let argv = ["git", "diff", "--numstat", self.base.as_str()].map(String::from);
        let mut cmd = argv_command(&argv)?;
        cmd.current_dir(&self.workdir);
        let output =
            run_command_with_timeout(cmd, None, GIT_TIMEOUT, GIT_OUTPUT_LIMIT_BYTES).await?;
        if !output.success() {
            return Err(anyhow!(
                "git diff --numstat failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(parse_numstat(&output.stdout_lossy()))
    }
}

#[async_trait]
impl ChangeSource for GitChangeSource {
    async fn changes(&self, feature: &Feature) -> ChangeSummary {
        let mut summary = match self.numstat().await {
            Ok(files) => ChangeSummary::from_files(files),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read changes, continuing without diff");
                ChangeSummary::default()
            }
        };
        summary.learnings = match read_text(&self.learnings_path).await {
            Ok(Some(contents)) => relevant_learnings(&contents, feature),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read learnings");
                Vec::new()
            }
        };
        debug!(
            files = summary.files.len(),
            learnings = summary.learnings.len(),
            "change summary collected"
        );
        summary
    }
}

/// Parse `git diff --numstat` output. Binary files (`-`) count as zero lines.
pub fn parse_numstat(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let removed = parts.next()?;
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            Some(FileChange {
                path: path.to_string(),
                added: added.parse().unwrap_or(0),
                removed: removed.parse().unwrap_or(0),
            })
        })
        .collect()
}

/// Bullet lines from `learnings.md` that mention the feature id or share a
/// keyword with its description, most recent last.
pub fn relevant_learnings(contents: &str, feature: &Feature) -> Vec<String> {
    let keywords: HashSet<String> = extract_keywords(&feature.description).into_iter().collect();
    let bullets: Vec<&str> = contents
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
        })
        .map(str::trim)
        .filter(|bullet| !bullet.is_empty())
        .collect();

    let relevant: Vec<String> = bullets
        .iter()
        .filter(|bullet| {
            bullet.contains(feature.id.as_str())
                || extract_keywords(bullet)
                    .iter()
                    .any(|word| keywords.contains(word))
        })
        .map(|bullet| (*bullet).to_string())
        .collect();
    let skip = relevant.len().saturating_sub(MAX_LEARNINGS);
    relevant.into_iter().skip(skip).collect()
}
