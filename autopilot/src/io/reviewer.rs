//! Quality-judgment collaborator.
//!
//! The reviewer receives a structured [`ReviewContext`] and returns a
//! [`ReviewJudgment`]. Anything that goes wrong on the way (spawn failure,
//! timeout, unparsable output) becomes an `escalate_to_human` judgment with
//! low confidence.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::goals::{Feature, GoalTree};
use crate::core::review::{
    DesignDecision, FeatureReviewHistory, ProposedDecision, ReviewDecision, ReviewIssue,
    ReviewJudgment,
};
use crate::io::changes::{ChangeSummary, FileChange};
use crate::io::config::ReviewerConfig;
use crate::io::process::{argv_command, run_command_with_timeout};

const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const REVIEW_OUTPUT_LIMIT_BYTES: usize = 200_000;
const MAX_PRIOR_REVIEWS: usize = 5;
const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorReview {
    pub timestamp: DateTime<Utc>,
    pub decision: ReviewDecision,
    pub feedback: String,
}

/// Everything a reviewer sees about one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewContext {
    pub task_name: String,
    pub feature_id: String,
    pub feature_description: String,
    pub test_command: String,
    pub diff_summary: String,
    pub files: Vec<FileChange>,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub prior_reviews: Vec<PriorReview>,
    pub binding_decisions: Vec<DesignDecision>,
    pub learnings: Vec<String>,
    pub constraints: Vec<String>,
    pub preferences: Vec<String>,
}

impl ReviewContext {
    pub fn build(
        goals: &GoalTree,
        feature: &Feature,
        changes: &ChangeSummary,
        history: &FeatureReviewHistory,
    ) -> Self {
        let skip = history.reviews.len().saturating_sub(MAX_PRIOR_REVIEWS);
        Self {
            task_name: goals.task_name.clone(),
            feature_id: feature.id.clone(),
            feature_description: feature.description.clone(),
            test_command: feature.test_command.clone(),
            diff_summary: changes.diff_summary(),
            files: changes.files.clone(),
            lines_added: changes.lines_added,
            lines_removed: changes.lines_removed,
            prior_reviews: history
                .reviews
                .iter()
                .skip(skip)
                .map(|record| PriorReview {
                    timestamp: record.timestamp,
                    decision: record.decision,
                    feedback: record.feedback.clone(),
                })
                .collect(),
            binding_decisions: history.binding_decisions.clone(),
            learnings: changes.learnings.clone(),
            constraints: goals.constraints.clone(),
            preferences: goals.preferences.clone(),
        }
    }
}

#[async_trait]
pub trait QualityReviewer: Send + Sync {
    /// Identity recorded as `madeBy` on decisions this reviewer proposes.
    fn name(&self) -> &str;

    async fn review(&self, context: &ReviewContext) -> ReviewJudgment;
}

/// Render the reviewer prompt for `context`.
pub fn render_review_prompt(context: &ReviewContext) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("review", REVIEW_TEMPLATE)
        .context("load review template")?;
    let template = env.get_template("review")?;
    let rendered = template.render(context).context("render review prompt")?;
    Ok(rendered)
}

/// Pipes the rendered prompt to an external command and parses its stdout.
#[derive(Debug, Clone)]
pub struct CommandReviewer {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandReviewer {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    pub fn from_config(cfg: &ReviewerConfig) -> Self {
        Self::new(cfg.command.clone(), Duration::from_secs(cfg.timeout_secs))
    }

    async fn invoke(&self, context: &ReviewContext) -> Result<String> {
        let prompt = render_review_prompt(context)?;
        let cmd = argv_command(&self.argv)?;
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            REVIEW_OUTPUT_LIMIT_BYTES,
        )
        .await?;
        if output.timed_out {
            return Err(anyhow!(
                "reviewer timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.success() {
            return Err(anyhow!(
                "reviewer exited with {:?}: {}",
                output.exit_code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout_lossy())
    }
}

#[async_trait]
impl QualityReviewer for CommandReviewer {
    fn name(&self) -> &str {
        self.argv.first().map_or("reviewer", String::as_str)
    }

    #[instrument(skip_all, fields(feature_id = %context.feature_id))]
    async fn review(&self, context: &ReviewContext) -> ReviewJudgment {
        match self.invoke(context).await {
            Ok(stdout) => parse_review_response(&stdout),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reviewer failed, escalating");
                ReviewJudgment::escalation(format!("Reviewer unavailable: {err:#}"))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJudgment {
    decision: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    issues: Vec<ReviewIssue>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default, alias = "new_decisions")]
    new_decisions: Vec<ProposedDecision>,
}

/// Parse a reviewer's reply into a judgment.
///
/// Accepts bare JSON, fenced JSON, or JSON embedded in prose (first `{` to
/// last `}`). Malformed replies escalate with confidence 0.1; confidence is
/// clamped to `[0, 1]`.
pub fn parse_review_response(text: &str) -> ReviewJudgment {
    match try_parse(text) {
        Ok(judgment) => judgment,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "unparsable reviewer output, escalating");
            ReviewJudgment::escalation(format!(
                "Reviewer output could not be parsed: {err:#}"
            ))
        }
    }
}

fn try_parse(text: &str) -> Result<ReviewJudgment> {
    let start = text.find('{').ok_or_else(|| anyhow!("no JSON object found"))?;
    let end = text.rfind('}').ok_or_else(|| anyhow!("no JSON object found"))?;
    if end < start {
        return Err(anyhow!("no JSON object found"));
    }
    let raw: RawJudgment =
        serde_json::from_str(&text[start..=end]).context("invalid review JSON")?;
    let decision = parse_decision(&raw.decision)
        .ok_or_else(|| anyhow!("unknown decision '{}'", raw.decision))?;
    let confidence = clamp_confidence(raw.confidence.unwrap_or(DEFAULT_CONFIDENCE));
    debug!(decision = decision.as_str(), confidence, "review parsed");
    Ok(ReviewJudgment {
        decision,
        confidence,
        feedback: raw.feedback,
        issues: raw.issues,
        suggestions: raw.suggestions,
        new_decisions: raw.new_decisions,
    })
}

fn parse_decision(value: &str) -> Option<ReviewDecision> {
    match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "approved" | "approve" => Some(ReviewDecision::Approved),
        "changes_requested" | "request_changes" | "rejected" | "reject" => {
            Some(ReviewDecision::ChangesRequested)
        }
        "escalate_to_human" | "escalate" | "escalated" => Some(ReviewDecision::EscalateToHuman),
        _ => None,
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
