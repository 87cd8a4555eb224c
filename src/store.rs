//! # Stage: Durable Store
//!
//! ## Responsibility
//! The persistence surface shared by every observer: load a JSON document or
//! fall back to a fresh default, write it back atomically, and append lines to
//! log-style files.
//!
//! ## Guarantees
//! - A missing file is fresh state, never an error
//! - A corrupt file is moved aside to `<name>.corrupt-<unix-seconds>` before
//!   fresh state is returned, so the next flush cannot destroy it
//! - The read-only path (`read_json_or_default`) never renames or writes
//! - Structured writes go through a sibling temp file and a rename
//! - Parent directories are created on demand
//!
//! ## NOT Responsible For
//! - Cross-process locking (one pipeline owns a workspace)
//! - Deciding when to flush (observers track their own dirty flag)

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;

/// Load `path` as JSON, or `T::default()` when it is absent or unreadable as
/// `T`. A corrupt file is moved aside first. Only filesystem errors other
/// than "not found" are returned.
pub async fn load_json_or_default<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let Some(bytes) = read_existing(path).await? else {
        return Ok(T::default());
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            let aside = quarantine(path).await?;
            tracing::warn!(
                target: "multicomp::store",
                path = %path.display(),
                moved_to = %aside.display(),
                error = %err,
                "stored state is corrupt; starting fresh"
            );
            Ok(T::default())
        }
    }
}

/// Like [`load_json_or_default`], but never writes: a corrupt file is reported
/// and left where it is.
pub async fn read_json_or_default<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let Some(bytes) = read_existing(path).await? else {
        return Ok(T::default());
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::warn!(
                target: "multicomp::store",
                path = %path.display(),
                error = %err,
                "stored state is corrupt; reading as empty"
            );
            Ok(T::default())
        }
    }
}

async fn read_existing(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                target: "multicomp::store",
                path = %path.display(),
                "no stored state, starting fresh"
            );
            Ok(None)
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Pretty-print `value` to `path` via a temp file and rename.
pub async fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path).await?;
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = sibling(path, ".tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    tracing::trace!(
        target: "multicomp::store",
        path = %path.display(),
        bytes = body.len(),
        "state flushed"
    );
    Ok(())
}

/// Append `line` plus a newline, creating the file if needed.
pub async fn append_line(path: &Path, line: &str) -> Result<(), StoreError> {
    append_with_header(path, None, line).await
}

/// Append `line` plus a newline. When the file does not exist yet, `header`
/// is written first.
pub async fn append_with_header(
    path: &Path,
    header: Option<&str>,
    line: &str,
) -> Result<(), StoreError> {
    ensure_parent(path).await?;
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;

    let mut buf = String::new();
    if !exists {
        if let Some(h) = header {
            buf.push_str(h);
        }
    }
    buf.push_str(line);
    buf.push('\n');

    file.write_all(buf.as_bytes())
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().await.map_err(|e| StoreError::io(path, e))
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

async fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let secs = chrono::Utc::now().timestamp();
    let aside = sibling(path, &format!(".corrupt-{secs}"));
    tokio::fs::rename(path, &aside)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(aside)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let v: Vec<u32> = load_json_or_default(&dir.path().join("none.json")).await.unwrap();
        assert!(v.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), 1u32);
        save_json(&path, &m).await.unwrap();

        let back: BTreeMap<String, u32> = load_json_or_default(&path).await.unwrap();
        assert_eq!(back, m);
        assert!(!sibling(&path, ".tmp").exists(), "temp file must be renamed away");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let v: Vec<u32> = load_json_or_default(&path).await.unwrap();
        assert!(v.is_empty());
        assert!(!path.exists());

        let moved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("cache.json.corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);
        let preserved = std::fs::read(dir.path().join(&moved[0])).unwrap();
        assert_eq!(preserved, b"{ not json");
    }

    #[tokio::test]
    async fn test_read_only_load_leaves_corrupt_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"[1, 2,,").await.unwrap();

        let v: Vec<u32> = read_json_or_default(&path).await.unwrap();
        assert!(v.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"[1, 2,,");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_append_with_header_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.md");
        append_with_header(&path, Some("# Log\n\n"), "one").await.unwrap();
        append_with_header(&path, Some("# Log\n\n"), "two").await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "# Log\n\none\ntwo\n");
    }

    #[tokio::test]
    async fn test_append_line_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics/points.jsonl");
        append_line(&path, "{}").await.unwrap();
        append_line(&path, "{}").await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_sibling_appends_suffix() {
        let p = Path::new("/w/patterns/cache.json");
        assert_eq!(sibling(p, ".tmp"), PathBuf::from("/w/patterns/cache.json.tmp"));
    }
}
