//! Content-addressed lookup of previously rendered charts.

use std::{
    io::ErrorKind,
    path::PathBuf,
    time::Instant,
};

use metrics::counter;
use tracing::{debug, info};

use crate::domain::{CacheKey, ChartArtifact};

pub const CHART_FILE_NAME: &str = "chart.svg";
pub const SETTINGS_FILE_NAME: &str = "settings.tsc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(PathBuf),
    Miss,
}

/// Layout: `<charts_dir>/<cache-key>/{chart.svg,settings.tsc}`.
#[derive(Debug, Clone)]
pub struct CacheIndex {
    charts_dir: PathBuf,
    url_prefix: String,
}

impl CacheIndex {
    pub fn new(charts_dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into();
        Self {
            charts_dir: charts_dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// URL path under which chart directories are served, without a trailing `/`.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn chart_path(&self, key: &CacheKey) -> PathBuf {
        self.chart_dir(key).join(CHART_FILE_NAME)
    }

    pub fn chart_dir(&self, key: &CacheKey) -> PathBuf {
        self.charts_dir.join(key.as_str())
    }

    pub fn settings_path(&self, key: &CacheKey) -> PathBuf {
        self.chart_dir(key).join(SETTINGS_FILE_NAME)
    }

    pub fn artifact_for(&self, key: &CacheKey) -> ChartArtifact {
        ChartArtifact {
            cache_key: key.clone(),
            url_path: format!("{}/{}/{}", self.url_prefix, key, CHART_FILE_NAME),
            filesystem_path: self.chart_path(key),
        }
    }

    /// Check whether `artifact` already exists.
    ///
    /// With `use_cache == false` an existing entry is removed together with
    /// its directory and reported as a miss, so the next render starts clean.
    pub async fn lookup(
        &self,
        artifact: &ChartArtifact,
        use_cache: bool,
    ) -> std::io::Result<CacheLookup> {
        let started_at = Instant::now();
        let exists = tokio::fs::try_exists(&artifact.filesystem_path).await?;

        if !exists {
            counter!("chartforge_cache_miss_total").increment(1);
            debug!(
                target = "chartforge::application::chart::cache_index",
                op = "cache_index::lookup",
                result = "miss",
                cache_key = %artifact.cache_key,
                "Chart not cached"
            );
            return Ok(CacheLookup::Miss);
        }

        if !use_cache {
            let chart_dir = self.chart_dir(&artifact.cache_key);
            match tokio::fs::remove_dir_all(&chart_dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            counter!("chartforge_cache_miss_total").increment(1);
            info!(
                target = "chartforge::application::chart::cache_index",
                op = "cache_index::lookup",
                result = "invalidated",
                cache_key = %artifact.cache_key,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Cached chart removed for regeneration"
            );
            return Ok(CacheLookup::Miss);
        }

        counter!("chartforge_cache_hit_total").increment(1);
        info!(
            target = "chartforge::application::chart::cache_index",
            op = "cache_index::lookup",
            result = "hit",
            cache_key = %artifact.cache_key,
            "Chart served from cache"
        );
        Ok(CacheLookup::Hit(artifact.filesystem_path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{ChartRequest, DatapackRef};

    fn key() -> CacheKey {
        CacheKey::for_request(&ChartRequest {
            settings_text: "<s/>".to_string(),
            datapack_refs: vec![DatapackRef::official("GTS", "gts.dpk")],
            use_cache: true,
            is_cross_plot: false,
        })
    }

    #[test]
    fn artifact_layout_follows_the_key() {
        let index = CacheIndex::new("/srv/charts", "/public/charts/");
        let key = key();
        let artifact = index.artifact_for(&key);

        assert_eq!(artifact.url_path, format!("/public/charts/{key}/chart.svg"));
        assert_eq!(
            artifact.filesystem_path,
            PathBuf::from(format!("/srv/charts/{key}/chart.svg"))
        );
        assert_eq!(
            index.settings_path(&key),
            PathBuf::from(format!("/srv/charts/{key}/settings.tsc"))
        );
    }

    #[tokio::test]
    async fn absent_artifact_is_a_miss() {
        let dir = TempDir::new().expect("temp dir");
        let index = CacheIndex::new(dir.path(), "/public/charts");
        let artifact = index.artifact_for(&key());

        for use_cache in [true, false] {
            assert_eq!(
                index.lookup(&artifact, use_cache).await.expect("lookup"),
                CacheLookup::Miss
            );
        }
    }

    #[tokio::test]
    async fn existing_artifact_hits_or_is_invalidated() {
        let dir = TempDir::new().expect("temp dir");
        let index = CacheIndex::new(dir.path(), "/public/charts");
        let key = key();
        let artifact = index.artifact_for(&key);
        std::fs::create_dir_all(index.chart_dir(&key)).expect("chart dir");
        std::fs::write(&artifact.filesystem_path, "<svg/>").expect("chart");
        std::fs::write(index.settings_path(&key), "<s/>").expect("settings");

        assert_eq!(
            index.lookup(&artifact, true).await.expect("lookup"),
            CacheLookup::Hit(artifact.filesystem_path.clone())
        );

        assert_eq!(
            index.lookup(&artifact, false).await.expect("lookup"),
            CacheLookup::Miss
        );
        assert!(!index.chart_dir(&key).exists());
    }
}
