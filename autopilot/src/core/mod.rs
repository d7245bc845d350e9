//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod contradiction;
pub mod exploration;
pub mod goals;
pub mod invariants;
pub mod progress;
pub mod review;
pub mod scheduler;
pub mod status;
pub mod types;
