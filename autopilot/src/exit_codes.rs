//! Stable exit codes for autopilot CLI commands.

/// Command succeeded or a feature was selected.
pub const OK: i32 = 0;
/// Invalid task directory, documents, config or arguments, or any other error.
pub const INVALID: i32 = 1;
/// `autopilot select`/`session` found every feature passing.
pub const COMPLETE: i32 = 2;
/// Nothing selectable without human help, or a review escalated to a human.
pub const BLOCKED: i32 = 3;
