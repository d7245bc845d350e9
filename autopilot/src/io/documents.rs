//! Typed document persistence shared by every store.
//!
//! Missing files load as `None`; every other I/O failure propagates. Saves go
//! through a temp file + rename so readers never observe a half-written
//! document. Appends are a single `O_APPEND` write per call.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::debug;

/// Read a text document, mapping a missing file to `None`.
pub async fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

/// Load and deserialize a JSON document, mapping a missing file to `None`.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(contents) = read_text(path).await? else {
        debug!(path = %path.display(), "document absent");
        return Ok(None);
    };
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf).await
}

/// Write `contents` to a sibling temp file, then rename over `path`.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = temp_path(path)?;
    fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "document saved");
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("path missing file name {}", path.display()))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    Ok(path.with_file_name(tmp_name))
}

/// Append `text` to `path`, creating the file (and parents) if absent.
///
/// The whole chunk goes out in one `write_all` on an append-mode handle, so
/// concurrent appenders never interleave within an entry.
pub async fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let owned_path = path.to_path_buf();
    let bytes = text.as_bytes().to_vec();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&owned_path)
            .with_context(|| format!("open {}", owned_path.display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("append {}", owned_path.display()))?;
        Ok(())
    })
    .await
    .context("join append task")?
}

/// Create `path` with `contents` only if it does not exist yet.
///
/// Returns `true` when the file was created.
pub async fn create_if_absent(path: &Path, contents: &str) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let owned_path = path.to_path_buf();
    let bytes = contents.as_bytes().to_vec();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&owned_path)
        {
            Ok(mut file) => {
                file.write_all(&bytes)
                    .with_context(|| format!("write {}", owned_path.display()))?;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).with_context(|| format!("create {}", owned_path.display())),
        }
    })
    .await
    .context("join create task")?
}

/// Remove a file, treating a missing file as already removed.
///
/// Returns `true` when a file was deleted.
pub async fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn missing_document_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded: Option<Doc> = load_json(&temp.path().join("nope.json"))
            .await
            .expect("load");
        assert!(loaded.is_none());
    }

    /// Saving into a directory that does not exist creates it, and leaves no
    /// temp files behind.
    #[tokio::test]
    async fn save_creates_parents_and_replaces_atomically() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("doc.json");
        let doc = Doc {
            name: "a".to_string(),
            count: 1,
        };
        save_json(&path, &doc).await.expect("save");
        save_json(
            &path,
            &Doc {
                name: "b".to_string(),
                count: 2,
            },
        )
        .await
        .expect("save again");

        let loaded: Option<Doc> = load_json(&path).await.expect("load");
        assert_eq!(loaded.map(|d| d.count), Some(2));
        let entries = std::fs::read_dir(temp.path().join("nested"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");
        std::fs::write(&path, "{not json").expect("write");
        let err = load_json::<Doc>(&path).await.expect_err("parse error");
        assert!(err.to_string().starts_with("parse "));
    }

    #[tokio::test]
    async fn append_creates_then_appends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("log.md");
        append_text(&path, "one\n").await.expect("append");
        append_text(&path, "two\n").await.expect("append");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "one\ntwo\n");
    }

    #[tokio::test]
    async fn create_if_absent_never_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("header.md");
        assert!(create_if_absent(&path, "first").await.expect("create"));
        assert!(!create_if_absent(&path, "second").await.expect("create"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "first");
        assert!(remove_file(&path).await.expect("remove"));
        assert!(!remove_file(&path).await.expect("remove again"));
    }
}
