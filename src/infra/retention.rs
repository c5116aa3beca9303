//! JSON index of when each user datapack directory was last used.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::repos::{RepoError, RetentionRepo};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetentionRecord {
    #[serde(with = "time::serde::rfc3339")]
    last_updated: OffsetDateTime,
    /// Fields written by other tools are carried through untouched.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

type RetentionMap = BTreeMap<String, RetentionRecord>;

/// File-backed [`RetentionRepo`]; writes replace the file atomically.
#[derive(Debug)]
pub struct JsonRetentionIndex {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonRetentionIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<RetentionMap, RepoError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RetentionMap::new());
            }
            Err(err) => return Err(RepoError::Io(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RetentionMap::new());
        }
        serde_json::from_slice(&bytes).map_err(RepoError::from_persistence)
    }

    async fn store(&self, map: &RetentionMap) -> Result<(), RepoError> {
        let payload = serde_json::to_vec(map).map_err(RepoError::from_persistence)?;
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &payload))
            .await
            .map_err(RepoError::from_persistence)?
            .map_err(RepoError::Io)
    }
}

fn write_atomically(target: &Path, payload: &[u8]) -> std::io::Result<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(payload)?;
    file.as_file().sync_all()?;
    file.persist(target).map_err(|err| err.error)?;
    Ok(())
}

fn index_key(directory: &Path) -> String {
    directory.to_string_lossy().into_owned()
}

#[async_trait]
impl RetentionRepo for JsonRetentionIndex {
    async fn touch(&self, directories: &[PathBuf]) -> Result<(), RepoError> {
        if directories.is_empty() {
            return Ok(());
        }

        let _held = self.guard.lock().await;
        let mut map = self.load().await?;
        let now = OffsetDateTime::now_utc();
        for directory in directories {
            let key = index_key(directory);
            let record = map.get_mut(&key).ok_or_else(|| {
                RepoError::invalid_input(format!("`{key}` is not in the retention index"))
            })?;
            record.last_updated = now;
        }
        self.store(&map).await?;

        debug!(
            target = "chartforge::infra::retention",
            op = "retention::touch",
            result = "ok",
            count = directories.len(),
            "Retention index refreshed"
        );
        Ok(())
    }

    async fn forget(&self, directory: &Path) -> Result<(), RepoError> {
        let _held = self.guard.lock().await;
        let mut map = self.load().await?;
        if map.remove(&index_key(directory)).is_none() {
            return Ok(());
        }
        self.store(&map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(path: &Path, entries: &[&str]) {
        let mut map = serde_json::Map::new();
        for entry in entries {
            map.insert(
                (*entry).to_string(),
                serde_json::json!({
                    "lastUpdated": "2024-01-01T00:00:00Z",
                    "fileName": "pack.dpk",
                }),
            );
        }
        std::fs::write(path, serde_json::to_vec(&map).expect("encode")).expect("seed index");
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(path).expect("read index")).expect("decode index")
    }

    #[tokio::test]
    async fn touch_refreshes_timestamp_and_keeps_extra_fields() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("file-metadata.json");
        seed(&path, &["public/datapacks/private/u/Africa"]);

        let index = JsonRetentionIndex::new(&path);
        index
            .touch(&[PathBuf::from("public/datapacks/private/u/Africa")])
            .await
            .expect("touch");

        let value = read(&path);
        let record = &value["public/datapacks/private/u/Africa"];
        assert_eq!(record["fileName"], "pack.dpk");
        assert_ne!(record["lastUpdated"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn touch_fails_for_unindexed_directory() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("file-metadata.json");
        seed(&path, &["known"]);

        let index = JsonRetentionIndex::new(&path);
        let err = index
            .touch(&[PathBuf::from("known"), PathBuf::from("unknown")])
            .await
            .expect_err("unknown entry");
        assert!(matches!(err, RepoError::InvalidInput { .. }));

        // Nothing is written when any entry is missing.
        assert_eq!(read(&path)["known"]["lastUpdated"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn forget_removes_entry_and_ignores_missing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("file-metadata.json");
        seed(&path, &["a", "b"]);

        let index = JsonRetentionIndex::new(&path);
        index.forget(Path::new("a")).await.expect("forget a");
        index.forget(Path::new("missing")).await.expect("forget missing");

        let value = read(&path);
        assert!(value.get("a").is_none());
        assert!(value.get("b").is_some());
    }

    #[tokio::test]
    async fn empty_touch_does_not_require_index() {
        let dir = TempDir::new().expect("tempdir");
        let index = JsonRetentionIndex::new(dir.path().join("absent.json"));
        index.touch(&[]).await.expect("no-op touch");
        assert!(!index.path().exists());
    }
}
