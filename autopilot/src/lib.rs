//! Durable feature engine for multi-session autonomous coding.
//!
//! A task is a goal tree of milestones, subtasks and test-verified features.
//! Progress survives process restarts through plain documents in a task
//! directory, and a feature only becomes `passing` through the review gate.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, status transitions,
//!   ledger format, review bookkeeping, contradiction checks, exploration
//!   resume). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (documents, process execution,
//!   reviewer and notifier collaborators).
//!
//! Orchestration modules ([`verify`], [`review_gate`], [`session`],
//! [`select`], [`validate`]) coordinate core logic with I/O to implement CLI
//! commands.

pub mod core;
pub mod exit_codes;
pub mod intervention;
pub mod io;
pub mod logging;
pub mod review_gate;
pub mod select;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod verify;
