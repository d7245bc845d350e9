//! Durable feature engine CLI.
//!
//! Every command works on one task directory (`--task-dir`, default
//! `.autopilot`) holding the goal tree, status, progress ledger and review
//! side-cars. Exit codes are listed in `autopilot::exit_codes`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autopilot::core::exploration::{
    ApproachStatus, ApproachTestResult, ExplorationPhase, ResumeAction,
};
use autopilot::core::review::ReviewDecision;
use autopilot::core::scheduler::progress_summary;
use autopilot::core::status::FeatureState;
use autopilot::exit_codes;
use autopilot::intervention::{block_manually, record_commit, start_exploration};
use autopilot::io::changes::GitChangeSource;
use autopilot::io::checkpoint_store::CheckpointStore;
use autopilot::io::config::{EngineConfig, load_config};
use autopilot::io::init::{InitOptions, init_task};
use autopilot::io::notifier::notifier_from_config;
use autopilot::io::paths::TaskPaths;
use autopilot::io::progress_log::{read_feature_progress, read_recent_progress};
use autopilot::io::reviewer::CommandReviewer;
use autopilot::io::test_runner::ShellTestRunner;
use autopilot::review_gate::ReviewGate;
use autopilot::select::{SelectOutcome, load_task, select_from_task};
use autopilot::session::{SessionInit, end_session, initialize_session};
use autopilot::validate::validate_task;
use autopilot::verify::run_feature_tests;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Durable feature engine for multi-session autonomous coding"
)]
struct Cli {
    /// Task directory holding goals.json, status.json and progress.md.
    #[arg(long, global = true, default_value = ".autopilot")]
    task_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the task directory from a goal tree document.
    Init {
        /// Goal tree JSON to install as goals.json.
        #[arg(long)]
        goals: PathBuf,
        /// Replace an existing goal tree and reset status.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, goal tree and status consistency.
    Validate,
    /// Print the id of the next feature to work on.
    Select {
        #[arg(long)]
        json: bool,
    },
    /// Print progress and per-feature status.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print recent ledger entries.
    Progress {
        /// Only entries for this feature.
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Run a feature's tests and record the attempt.
    Verify {
        feature: String,
        /// Project checkout the test command runs in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
    /// Run the review gate for a feature awaiting review.
    Review {
        feature: String,
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Git revision the change summary diffs against.
        #[arg(long, default_value = "HEAD")]
        base: String,
    },
    /// Block a feature by hand.
    Block {
        feature: String,
        #[arg(long)]
        reason: String,
    },
    /// Attach a commit id to a feature.
    Commit { feature: String, commit: String },
    /// Print how to resume a feature's parallel exploration, or list checkpoints.
    Resume { feature: Option<String> },
    /// Maintain parallel-exploration checkpoints.
    Explore {
        #[command(subcommand)]
        action: ExploreCommand,
    },
    /// Start or end a work session.
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
}

#[derive(Subcommand)]
enum ExploreCommand {
    /// Create a checkpoint with one approach per `--approach id=strategy`.
    Start {
        feature: String,
        #[arg(long = "approach", required = true)]
        approaches: Vec<String>,
    },
    Phase {
        feature: String,
        /// initializing, implementing, testing, comparing, finalizing or complete.
        phase: String,
    },
    Approach {
        feature: String,
        approach: String,
        /// pending, in_progress, completed, failed or timeout.
        status: String,
        #[arg(long)]
        error: Option<String>,
        #[arg(long = "file")]
        files: Vec<String>,
    },
    Test {
        feature: String,
        approach: String,
        #[arg(long)]
        passed: bool,
        #[arg(long, default_value_t = 0)]
        duration_ms: u64,
        #[arg(long, default_value = "")]
        summary: String,
    },
    Cost {
        feature: String,
        approach: String,
        usd: f64,
    },
    Select {
        feature: String,
        approach: String,
        #[arg(long)]
        reason: String,
    },
    /// Delete a checkpoint once exploration has concluded.
    Clear { feature: String },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Hydrate a session and regenerate context.md.
    Start {
        #[arg(long)]
        json: bool,
    },
    /// Close a session with a note.
    End {
        #[arg(long, default_value = "")]
        note: String,
    },
}

#[tokio::main]
async fn main() {
    autopilot::logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = TaskPaths::new(&cli.task_dir);
    match cli.command {
        Command::Init { goals, force } => cmd_init(&cli.task_dir, &goals, force).await,
        Command::Validate => cmd_validate(&cli.task_dir).await,
        Command::Select { json } => cmd_select(&paths, json).await,
        Command::Status { json } => cmd_status(&paths, json).await,
        Command::Progress {
            feature,
            limit,
            json,
        } => cmd_progress(&paths, feature.as_deref(), limit, json).await,
        Command::Verify { feature, workdir } => cmd_verify(&paths, &feature, &workdir).await,
        Command::Review {
            feature,
            workdir,
            base,
        } => cmd_review(&paths, &feature, &workdir, &base).await,
        Command::Block { feature, reason } => {
            let cfg = load_config(&paths.config_path).await?;
            let notifier = notifier_from_config(cfg.notify.command.as_ref());
            block_manually(&paths, &feature, &reason, notifier.as_ref()).await?;
            Ok(exit_codes::OK)
        }
        Command::Commit { feature, commit } => {
            record_commit(&paths, &feature, &commit).await?;
            Ok(exit_codes::OK)
        }
        Command::Resume { feature } => cmd_resume(&paths, feature.as_deref()).await,
        Command::Explore { action } => cmd_explore(&paths, action).await,
        Command::Session { action } => cmd_session(&paths, action).await,
    }
}

async fn cmd_init(task_dir: &Path, goals: &Path, force: bool) -> Result<i32> {
    let paths = init_task(task_dir, goals, &InitOptions { force }).await?;
    println!("initialized {}", paths.task_dir.display());
    Ok(exit_codes::OK)
}

async fn cmd_validate(task_dir: &Path) -> Result<i32> {
    let outcome = validate_task(task_dir).await?;
    println!(
        "ok: {} milestones, {} features{}",
        outcome.milestones,
        outcome.features,
        if outcome.status_present {
            ""
        } else {
            " (status not initialized)"
        }
    );
    Ok(exit_codes::OK)
}

async fn cmd_select(paths: &TaskPaths, json: bool) -> Result<i32> {
    let outcome = select_from_task(paths).await?;
    if json {
        print_json(&outcome)?;
    }
    Ok(match outcome {
        SelectOutcome::Open(feature) => {
            if !json {
                println!("{}", feature.id);
            }
            exit_codes::OK
        }
        SelectOutcome::Complete => exit_codes::COMPLETE,
        SelectOutcome::Blocked { blocked } => {
            if !json {
                eprintln!("no selectable feature; blocked: {}", blocked.join(", "));
            }
            exit_codes::BLOCKED
        }
    })
}

#[derive(Serialize)]
struct StatusReport<'a> {
    summary: autopilot::core::scheduler::ProgressSummary,
    status: &'a autopilot::core::status::TaskStatus,
}

async fn cmd_status(paths: &TaskPaths, json: bool) -> Result<i32> {
    let (goals, status) = load_task(paths).await?;
    let summary = progress_summary(&goals, &status);
    if json {
        print_json(&StatusReport {
            summary,
            status: &status,
        })?;
        return Ok(exit_codes::OK);
    }

    println!(
        "{}: {}/{} features passing ({}%)",
        goals.task_name, summary.passing, summary.total, summary.percent_complete
    );
    for milestone in &goals.milestones {
        let state = status
            .milestones
            .get(&milestone.id)
            .map_or("unknown", |m| m.status.as_str());
        println!("{} [{}]", milestone.id, state);
        for feature in milestone.features() {
            let Some(feature_status) = status.feature(&feature.id) else {
                continue;
            };
            println!(
                "  {:<24} {:<12} {}/{}",
                feature.id,
                feature_status.status.as_str(),
                feature_status.attempts,
                feature_status.max_attempts
            );
        }
    }
    Ok(exit_codes::OK)
}

async fn cmd_progress(
    paths: &TaskPaths,
    feature: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<i32> {
    let entries = match feature {
        Some(feature_id) => {
            let mut entries = read_feature_progress(&paths.progress_path, feature_id).await?;
            if let Some(limit) = limit {
                entries.drain(..entries.len().saturating_sub(limit));
            }
            entries
        }
        None => {
            let cfg = load_config(&paths.config_path).await?;
            let limit = limit.unwrap_or(cfg.recent_progress_limit);
            read_recent_progress(&paths.progress_path, limit).await?
        }
    };
    if json {
        print_json(&entries)?;
        return Ok(exit_codes::OK);
    }
    for entry in entries {
        println!("## {} - {}", entry.timestamp, entry.label);
        println!("{}\n", entry.body.trim());
    }
    Ok(exit_codes::OK)
}

async fn cmd_verify(paths: &TaskPaths, feature_id: &str, workdir: &Path) -> Result<i32> {
    let cfg = load_config(&paths.config_path).await?;
    let runner = ShellTestRunner::from_config(&cfg);
    let notifier = notifier_from_config(cfg.notify.command.as_ref());
    let outcome =
        run_feature_tests(paths, feature_id, &runner, notifier.as_ref(), workdir).await?;
    println!(
        "{feature_id}: {} (attempt {}/{})",
        outcome.state.as_str(),
        outcome.attempts,
        outcome.max_attempts
    );
    Ok(match outcome.state {
        FeatureState::InProgress | FeatureState::Passing => exit_codes::OK,
        FeatureState::Blocked => exit_codes::BLOCKED,
        FeatureState::Pending | FeatureState::Failing => {
            eprintln!("{}", outcome.result.failure_summary());
            exit_codes::INVALID
        }
    })
}

async fn cmd_review(
    paths: &TaskPaths,
    feature_id: &str,
    workdir: &Path,
    base: &str,
) -> Result<i32> {
    let cfg: EngineConfig = load_config(&paths.config_path).await?;
    let runner = ShellTestRunner::from_config(&cfg);
    let reviewer = CommandReviewer::from_config(&cfg.reviewer);
    let changes = GitChangeSource::new(workdir, &paths.learnings_path).with_base(base);
    let notifier = notifier_from_config(cfg.notify.command.as_ref());

    let outcome = ReviewGate::new(paths, workdir, &runner, &reviewer, &changes, notifier.as_ref())
        .with_regression_command(cfg.regression.command.clone())
        .review_feature(feature_id)
        .await?;
    println!(
        "{feature_id}: {} ({})",
        outcome.decision().as_str(),
        outcome.state.as_str()
    );
    if !outcome.record.feedback.is_empty() {
        println!("{}", outcome.record.feedback);
    }
    Ok(match outcome.decision() {
        ReviewDecision::Approved if outcome.task_complete => exit_codes::COMPLETE,
        ReviewDecision::Approved => exit_codes::OK,
        ReviewDecision::ChangesRequested => exit_codes::INVALID,
        ReviewDecision::EscalateToHuman => exit_codes::BLOCKED,
    })
}

async fn cmd_resume(paths: &TaskPaths, feature: Option<&str>) -> Result<i32> {
    let store = CheckpointStore::new(&paths.parallel_dir);
    let Some(feature_id) = feature else {
        for feature_id in store.list_checkpoints().await? {
            println!("{feature_id}");
        }
        return Ok(exit_codes::OK);
    };
    let action: ResumeAction = store.resume_action(feature_id).await?;
    print_json(&action)?;
    Ok(exit_codes::OK)
}

async fn cmd_explore(paths: &TaskPaths, action: ExploreCommand) -> Result<i32> {
    let store = CheckpointStore::new(&paths.parallel_dir);
    let checkpoint = match action {
        ExploreCommand::Start {
            feature,
            approaches,
        } => start_exploration(paths, &feature, &approaches).await?,
        ExploreCommand::Phase { feature, phase } => {
            let phase: ExplorationPhase = parse_tag(&phase)?;
            store.update_phase(&feature, phase).await?
        }
        ExploreCommand::Approach {
            feature,
            approach,
            status,
            error,
            files,
        } => {
            let status: ApproachStatus = parse_tag(&status)?;
            let files = (!files.is_empty()).then_some(files);
            store
                .update_approach_status(&feature, &approach, status, error, files)
                .await?
        }
        ExploreCommand::Test {
            feature,
            approach,
            passed,
            duration_ms,
            summary,
        } => {
            let result = ApproachTestResult {
                passed,
                duration_ms,
                summary,
                recorded_at: Utc::now(),
            };
            store.record_test_result(&feature, &approach, result).await?
        }
        ExploreCommand::Cost {
            feature,
            approach,
            usd,
        } => store.add_cost(&feature, &approach, usd).await?,
        ExploreCommand::Select {
            feature,
            approach,
            reason,
        } => store.record_selection(&feature, &approach, &reason).await?,
        ExploreCommand::Clear { feature } => {
            let removed = store.clear(&feature).await?;
            println!("{}", if removed { "cleared" } else { "no checkpoint" });
            return Ok(exit_codes::OK);
        }
    };
    print_json(&checkpoint)?;
    Ok(exit_codes::OK)
}

async fn cmd_session(paths: &TaskPaths, action: SessionCommand) -> Result<i32> {
    match action {
        SessionCommand::Start { json } => {
            let cfg = load_config(&paths.config_path).await?;
            let init = initialize_session(paths, &cfg).await?;
            if json {
                print_json(&init)?;
            }
            Ok(match init {
                SessionInit::Ready { feature, .. } => {
                    if !json {
                        println!("{}", feature.id);
                    }
                    exit_codes::OK
                }
                SessionInit::Complete { .. } => exit_codes::COMPLETE,
                SessionInit::Blocked { blocked, .. } => {
                    if !json {
                        eprintln!("no selectable feature; blocked: {}", blocked.join(", "));
                    }
                    exit_codes::BLOCKED
                }
            })
        }
        SessionCommand::End { note } => {
            let summary = end_session(paths, &note).await?;
            println!(
                "{}/{} features passing ({}%)",
                summary.passing, summary.total, summary.percent_complete
            );
            Ok(exit_codes::OK)
        }
    }
}

/// Parse a snake_case enum tag such as `in_progress`.
fn parse_tag<T: DeserializeOwned>(tag: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(tag.to_string()))
        .with_context(|| format!("unknown value '{tag}'"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
