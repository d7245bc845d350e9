//! Progress ledger file (`progress.md`).
//!
//! This is a product artifact: it is always written and is not affected by
//! `RUST_LOG`.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::core::progress::{
    ParsedProgressEntry, ProgressEntry, count_feature_attempts, feature_progress,
    format_progress_entry, ledger_header, parse_recent_progress,
};
use crate::io::documents::{append_text, create_if_absent, read_text};

/// Write the ledger header if the ledger does not exist yet.
pub async fn init_ledger(path: &Path, task_name: &str) -> Result<bool> {
    create_if_absent(path, &ledger_header(task_name)).await
}

/// Append one formatted entry; safe to call concurrently.
pub async fn append_progress_entry(path: &Path, entry: &ProgressEntry) -> Result<()> {
    debug!(
        path = %path.display(),
        kind = entry.kind.label(),
        feature_id = entry.feature_id.as_deref().unwrap_or(""),
        "appending progress entry"
    );
    append_text(path, &format_progress_entry(entry)).await
}

async fn read_ledger(path: &Path) -> Result<String> {
    Ok(read_text(path).await?.unwrap_or_default())
}

/// The last `limit` entries, oldest first. A missing ledger is empty.
pub async fn read_recent_progress(
    path: &Path,
    limit: usize,
) -> Result<Vec<ParsedProgressEntry>> {
    Ok(parse_recent_progress(&read_ledger(path).await?, limit))
}

pub async fn read_feature_progress(
    path: &Path,
    feature_id: &str,
) -> Result<Vec<ParsedProgressEntry>> {
    Ok(feature_progress(&read_ledger(path).await?, feature_id))
}

pub async fn read_feature_attempts(path: &Path, feature_id: &str) -> Result<usize> {
    Ok(count_feature_attempts(&read_ledger(path).await?, feature_id))
}
