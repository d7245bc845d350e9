//! Side-effecting operations: documents on disk and external collaborators.

pub mod changes;
pub mod checkpoint_store;
pub mod config;
pub mod context;
pub mod documents;
pub mod goal_store;
pub mod init;
pub mod notifier;
pub mod paths;
pub mod process;
pub mod progress_log;
pub mod review_store;
pub mod reviewer;
pub mod status_store;
pub mod test_runner;
