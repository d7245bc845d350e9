//! Progress ledger entries: rendering and re-parsing of the Markdown log.
//!
//! Each entry is a block:
//!
//! ```text
//! ## 2026-01-01T10:00:00.000Z - Feature Attempt
//! **Feature:** ft-1
//!
//! Ran tests for ft-1
//!
//! - **Attempt:** 1/3
//!
//! ---
//! ```
//!
//! Parsing only relies on the heading line, so entries written by older
//! versions or edited by hand still split correctly.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const LEDGER_SEPARATOR: &str = "---";

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^## (\S+) - (.+?)\s*$").expect("valid ledger heading regex")
});

static FEATURE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\*\*Feature:\*\* (\S+)\s*$").expect("valid feature tag regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    SessionStart,
    SessionEnd,
    FeatureAttempt,
    FeaturePassed,
    FeatureFailed,
    FeatureBlocked,
    MilestoneCompleted,
    ReviewApproved,
    ReviewRejected,
    ReviewEscalated,
    HumanIntervention,
}

impl ProgressKind {
    pub const ALL: [ProgressKind; 11] = [
        ProgressKind::SessionStart,
        ProgressKind::SessionEnd,
        ProgressKind::FeatureAttempt,
        ProgressKind::FeaturePassed,
        ProgressKind::FeatureFailed,
        ProgressKind::FeatureBlocked,
        ProgressKind::MilestoneCompleted,
        ProgressKind::ReviewApproved,
        ProgressKind::ReviewRejected,
        ProgressKind::ReviewEscalated,
        ProgressKind::HumanIntervention,
    ];

    /// Human-readable heading label.
    pub fn label(self) -> &'static str {
        match self {
            ProgressKind::SessionStart => "Session Start",
            ProgressKind::SessionEnd => "Session End",
            ProgressKind::FeatureAttempt => "Feature Attempt",
            ProgressKind::FeaturePassed => "Feature Passed",
            ProgressKind::FeatureFailed => "Feature Failed",
            ProgressKind::FeatureBlocked => "Feature Blocked",
            ProgressKind::MilestoneCompleted => "Milestone Completed",
            ProgressKind::ReviewApproved => "Review Approved",
            ProgressKind::ReviewRejected => "Review Rejected",
            ProgressKind::ReviewEscalated => "Review Escalated",
            ProgressKind::HumanIntervention => "Human Intervention",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

/// One `- **Label:** value` line under an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressDetail {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ProgressKind,
    pub feature_id: Option<String>,
    pub milestone_id: Option<String>,
    pub summary: String,
    pub details: Vec<ProgressDetail>,
}

impl ProgressEntry {
    pub fn new(kind: ProgressKind, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            feature_id: None,
            milestone_id: None,
            summary: summary.into(),
            details: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn milestone(mut self, milestone_id: impl Into<String>) -> Self {
        self.milestone_id = Some(milestone_id.into());
        self
    }

    pub fn detail(mut self, label: impl Into<String>, value: impl ToString) -> Self {
        self.details.push(ProgressDetail {
            label: label.into(),
            value: value.to_string(),
        });
        self
    }

    /// Attach a detail only when `value` is present.
    pub fn detail_opt<V: ToString>(self, label: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.detail(label, value),
            None => self,
        }
    }
}

/// Render an entry into its Markdown block (including the trailing separator).
pub fn format_progress_entry(entry: &ProgressEntry) -> String {
    let mut buf = String::new();
    buf.push_str(&format!(
        "## {} - {}\n",
        entry
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        entry.kind.label()
    ));
    if let Some(feature_id) = &entry.feature_id {
        buf.push_str(&format!("**Feature:** {feature_id}\n"));
    }
    if let Some(milestone_id) = &entry.milestone_id {
        buf.push_str(&format!("**Milestone:** {milestone_id}\n"));
    }
    buf.push('\n');
    buf.push_str(&summary_line(&entry.summary));
    buf.push('\n');
    if !entry.details.is_empty() {
        buf.push('\n');
        for detail in &entry.details {
            buf.push_str(&format!(
                "- **{}:** {}\n",
                detail.label,
                single_line(&detail.value)
            ));
        }
    }
    buf.push('\n');
    buf.push_str(LEDGER_SEPARATOR);
    buf.push_str("\n\n");
    buf
}

/// Header written once when a ledger is created.
pub fn ledger_header(task_name: &str) -> String {
    format!("# Progress Log: {task_name}\n\n")
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Summary flattened to one line, with a leading heading or tag marker escaped.
fn summary_line(summary: &str) -> String {
    let line = single_line(summary);
    if line.starts_with('#') || line.starts_with("**") {
        format!("\\{line}")
    } else {
        line
    }
}

/// An entry as recovered from ledger text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedProgressEntry {
    /// Timestamp exactly as written in the heading.
    pub timestamp: String,
    pub label: String,
    /// Entry text between the heading and the separator.
    pub body: String,
}

impl ParsedProgressEntry {
    pub fn kind(&self) -> Option<ProgressKind> {
        ProgressKind::from_label(&self.label)
    }

    pub fn feature_id(&self) -> Option<&str> {
        FEATURE_TAG_RE
            .captures(&self.body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Split ledger text into entries, oldest first.
pub fn parse_progress(content: &str) -> Vec<ParsedProgressEntry> {
    let headings: Vec<_> = HEADING_RE.captures_iter(content).collect();
    let mut entries = Vec::with_capacity(headings.len());
    for (idx, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(timestamp), Some(label)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let end = headings
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(content.len(), |m| m.start());
        entries.push(ParsedProgressEntry {
            timestamp: timestamp.as_str().to_string(),
            label: label.as_str().to_string(),
            body: clean_body(&content[whole.end()..end]),
        });
    }
    entries
}

fn clean_body(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_suffix(LEDGER_SEPARATOR)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// The most recent `limit` entries, in chronological order.
pub fn parse_recent_progress(content: &str, limit: usize) -> Vec<ParsedProgressEntry> {
    let mut entries = parse_progress(content);
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);
    entries
}

/// All entries tagged with `feature_id`, oldest first.
pub fn feature_progress(content: &str, feature_id: &str) -> Vec<ParsedProgressEntry> {
    parse_progress(content)
        .into_iter()
        .filter(|entry| entry.feature_id() == Some(feature_id))
        .collect()
}

/// Count attempt/failed/passed entries for `feature_id`.
pub fn count_feature_attempts(content: &str, feature_id: &str) -> usize {
    feature_progress(content, feature_id)
        .iter()
        .filter(|entry| {
            matches!(
                entry.kind(),
                Some(
                    ProgressKind::FeatureAttempt
                        | ProgressKind::FeatureFailed
                        | ProgressKind::FeaturePassed
                )
            )
        })
        .count()
}
