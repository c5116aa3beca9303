//! Per-user record of recently generated charts.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::{fs, sync::Mutex};
use tracing::debug;

use crate::application::{
    chart::cache_index::{CHART_FILE_NAME, SETTINGS_FILE_NAME},
    repos::{HistoryEntry, HistoryRepo, RepoError},
};

const DATAPACKS_DIR: &str = "datapacks";
const KEY_FILE_NAME: &str = "hash";

/// Stores each entry under `<root>/<uuid>/<epoch-ms>/`.
#[derive(Debug)]
pub struct FsHistoryStore {
    root: PathBuf,
    max_entries: NonZeroUsize,
    guard: Mutex<()>,
}

impl FsHistoryStore {
    pub fn new(root: impl Into<PathBuf>, max_entries: NonZeroUsize) -> Self {
        Self {
            root: root.into(),
            max_entries,
            guard: Mutex::new(()),
        }
    }

    pub fn user_dir(&self, entry: &HistoryEntry) -> PathBuf {
        self.root.join(entry.user_uuid.to_string())
    }

    /// Remove the oldest entries until there is room for one more.
    async fn prune(&self, user_dir: &Path) -> Result<(), RepoError> {
        let mut entries = list_entries(user_dir).await?;
        let keep = self.max_entries.get() - 1;
        if entries.len() <= keep {
            return Ok(());
        }
        entries.sort();
        let excess = entries.len() - keep;
        for (_, path) in entries.into_iter().take(excess) {
            fs::remove_dir_all(&path).await?;
            debug!(
                target = "chartforge::infra::history",
                op = "history::prune",
                result = "removed",
                path = %path.display(),
                "Dropped oldest chart history entry"
            );
        }
        Ok(())
    }
}

async fn list_entries(user_dir: &Path) -> Result<Vec<(i128, PathBuf)>, RepoError> {
    let mut reader = fs::read_dir(user_dir).await?;
    let mut entries = Vec::new();
    while let Some(item) = reader.next_entry().await? {
        let Some(stamp) = item
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i128>().ok())
        else {
            continue;
        };
        entries.push((stamp, item.path()));
    }
    Ok(entries)
}

/// Create a fresh entry directory named after the current time in milliseconds.
async fn create_entry_dir(user_dir: &Path) -> Result<PathBuf, RepoError> {
    let mut stamp = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    loop {
        let candidate = user_dir.join(stamp.to_string());
        match fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => stamp += 1,
            Err(err) => return Err(RepoError::Io(err)),
        }
    }
}

#[cfg(unix)]
async fn link_datapack(source: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink(source, link).await
}

#[cfg(windows)]
async fn link_datapack(source: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink_file(source, link).await
}

#[async_trait]
impl HistoryRepo for FsHistoryStore {
    async fn record(&self, entry: &HistoryEntry) -> Result<(), RepoError> {
        let _held = self.guard.lock().await;
        let user_dir = self.user_dir(entry);
        fs::create_dir_all(&user_dir).await?;
        self.prune(&user_dir).await?;

        let entry_dir = create_entry_dir(&user_dir).await?;
        fs::copy(&entry.settings_path, entry_dir.join(SETTINGS_FILE_NAME)).await?;
        fs::copy(&entry.chart_path, entry_dir.join(CHART_FILE_NAME)).await?;
        fs::write(entry_dir.join(KEY_FILE_NAME), entry.cache_key.as_str()).await?;

        let datapacks_dir = entry_dir.join(DATAPACKS_DIR);
        fs::create_dir(&datapacks_dir).await?;
        for datapack in &entry.datapack_paths {
            let Some(name) = datapack.file_name() else {
                return Err(RepoError::invalid_input(format!(
                    "datapack path `{}` has no file name",
                    datapack.display()
                )));
            };
            let source = fs::canonicalize(datapack).await?;
            link_datapack(&source, &datapacks_dir.join(name)).await?;
        }

        debug!(
            target = "chartforge::infra::history",
            op = "history::record",
            result = "ok",
            user = %entry.user_uuid,
            cache_key = %entry.cache_key,
            "Chart history entry saved"
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::CacheKey;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        store: FsHistoryStore,
        entry: HistoryEntry,
    }

    fn fixture(max_entries: usize) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let inputs = dir.path().join("inputs");
        std::fs::create_dir_all(&inputs).expect("inputs dir");
        let settings = inputs.join("settings.tsc");
        let chart = inputs.join("chart.svg");
        let datapack = inputs.join("Africa.dpk");
        std::fs::write(&settings, "<settings/>").expect("settings");
        std::fs::write(&chart, "<svg/>").expect("chart");
        std::fs::write(&datapack, "pack").expect("datapack");

        let store = FsHistoryStore::new(
            dir.path().join("history"),
            NonZeroUsize::new(max_entries).expect("non-zero"),
        );
        let entry = HistoryEntry {
            user_uuid: Uuid::new_v4(),
            cache_key: CacheKey::parse(&"ab".repeat(32)).expect("key"),
            settings_path: settings,
            chart_path: chart,
            datapack_paths: vec![datapack],
        };
        Fixture {
            _dir: dir,
            store,
            entry,
        }
    }

    #[tokio::test]
    async fn record_copies_inputs_and_links_datapacks() {
        let fx = fixture(10);
        fx.store.record(&fx.entry).await.expect("record");

        let entries = list_entries(&fx.store.user_dir(&fx.entry))
            .await
            .expect("list");
        assert_eq!(entries.len(), 1);
        let entry_dir = &entries[0].1;
        assert_eq!(
            std::fs::read_to_string(entry_dir.join(SETTINGS_FILE_NAME)).expect("settings"),
            "<settings/>"
        );
        assert_eq!(
            std::fs::read_to_string(entry_dir.join(KEY_FILE_NAME)).expect("hash"),
            "ab".repeat(32)
        );
        let link = entry_dir.join(DATAPACKS_DIR).join("Africa.dpk");
        assert!(
            std::fs::symlink_metadata(&link)
                .expect("link metadata")
                .file_type()
                .is_symlink()
        );
        assert_eq!(std::fs::read_to_string(&link).expect("via link"), "pack");
    }

    #[tokio::test]
    async fn oldest_entries_are_dropped_past_the_limit() {
        let fx = fixture(2);
        for _ in 0..3 {
            fx.store.record(&fx.entry).await.expect("record");
        }

        let user_dir = fx.store.user_dir(&fx.entry);
        let mut entries = list_entries(&user_dir).await.expect("list");
        entries.sort();
        assert_eq!(entries.len(), 2);
    }
}
