//! Completion/notification collaborator.
//!
//! Notification failures are logged and never fail the caller.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::io::process::{argv_command, run_command_with_timeout};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);
const NOTIFY_OUTPUT_LIMIT_BYTES: usize = 10_000;

/// Terminal states worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    FeatureApproved { feature_id: String },
    MilestoneCompleted { milestone_id: String },
    /// A completed milestone that needs a human to sign off on its criteria.
    MilestoneReviewRequested { milestone_id: String, criteria: Vec<String> },
    FeatureBlocked { feature_id: String, reason: String },
    HumanReviewRequested { feature_id: String, reason: String },
    TaskCompleted { task_name: String },
}

impl Notification {
    pub fn event(&self) -> &'static str {
        match self {
            Notification::FeatureApproved { .. } => "feature_approved",
            Notification::MilestoneCompleted { .. } => "milestone_completed",
            Notification::MilestoneReviewRequested { .. } => "milestone_review_requested",
            Notification::FeatureBlocked { .. } => "feature_blocked",
            Notification::HumanReviewRequested { .. } => "human_review_requested",
            Notification::TaskCompleted { .. } => "task_completed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::FeatureApproved { feature_id } => {
                format!("feature {feature_id} approved")
            }
            Notification::MilestoneCompleted { milestone_id } => {
                format!("milestone {milestone_id} completed")
            }
            Notification::MilestoneReviewRequested {
                milestone_id,
                criteria,
            } => {
                if criteria.is_empty() {
                    format!("milestone {milestone_id} needs human sign-off")
                } else {
                    format!(
                        "milestone {milestone_id} needs human sign-off: {}",
                        criteria.join("; ")
                    )
                }
            }
            Notification::FeatureBlocked { feature_id, reason } => {
                format!("feature {feature_id} blocked: {reason}")
            }
            Notification::HumanReviewRequested { feature_id, reason } => {
                format!("feature {feature_id} needs human review: {reason}")
            }
            Notification::TaskCompleted { task_name } => format!("task {task_name} completed"),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        info!(event = notification.event(), "{}", notification.message());
    }
}

/// Runs a configured command with the notification in its environment
/// (`AUTOPILOT_EVENT`, `AUTOPILOT_MESSAGE`, `AUTOPILOT_PAYLOAD` as JSON).
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    argv: Vec<String>,
}

impl CommandNotifier {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    async fn try_notify(&self, notification: &Notification) -> Result<()> {
        let mut cmd = argv_command(&self.argv)?;
        cmd.env("AUTOPILOT_EVENT", notification.event())
            .env("AUTOPILOT_MESSAGE", notification.message())
            .env("AUTOPILOT_PAYLOAD", serde_json::to_string(notification)?);
        let output =
            run_command_with_timeout(cmd, None, NOTIFY_TIMEOUT, NOTIFY_OUTPUT_LIMIT_BYTES).await?;
        if !output.success() {
            return Err(anyhow!(
                "notify command failed: {}",
                output.combined("notify").trim()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self, notification: &Notification) {
        if let Err(err) = self.try_notify(notification).await {
            warn!(event = notification.event(), err = %format!("{err:#}"), "notification failed");
        }
    }
}

/// Notifier for a config: command if configured, else log.
pub fn notifier_from_config(command: Option<&Vec<String>>) -> Box<dyn Notifier> {
    match command {
        Some(argv) => Box::new(CommandNotifier::new(argv.clone())),
        None => Box::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_notifier_passes_event_in_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("out.txt");
        let script = format!(
            "printf '%s|%s' \"$AUTOPILOT_EVENT\" \"$AUTOPILOT_MESSAGE\" > '{}'",
            out.display()
        );
        let notifier = CommandNotifier::new(vec!["sh".into(), "-c".into(), script]);
        notifier
            .notify(&Notification::FeatureApproved {
                feature_id: "ft-1".to_string(),
            })
            .await;
        assert_eq!(
            std::fs::read_to_string(&out).expect("read"),
            "feature_approved|feature ft-1 approved"
        );
    }

    /// A broken notifier must not surface an error to the caller.
    #[tokio::test]
    async fn failing_command_is_swallowed() {
        let notifier = CommandNotifier::new(vec!["/no/such/notifier".to_string()]);
        notifier
            .notify(&Notification::TaskCompleted {
                task_name: "t".to_string(),
            })
            .await;
    }

    #[test]
    fn payload_is_tagged_json() {
        let json = serde_json::to_value(Notification::FeatureBlocked {
            feature_id: "ft-2".to_string(),
            reason: "3 failed attempts".to_string(),
        })
        .expect("serialize");
        assert_eq!(json["event"], "feature_blocked");
        assert_eq!(json["feature_id"], "ft-2");
    }

    #[test]
    fn milestone_review_message_lists_criteria() {
        let notification = Notification::MilestoneReviewRequested {
            milestone_id: "m-1".to_string(),
            criteria: vec!["login works".to_string(), "docs updated".to_string()],
        };
        assert_eq!(notification.event(), "milestone_review_requested");
        assert_eq!(
            notification.message(),
            "milestone m-1 needs human sign-off: login works; docs updated"
        );
    }
}
