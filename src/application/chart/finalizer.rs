//! Waits for the renderer's output to be completely written.
//!
//! The renderer can exit before its SVG is flushed, so a chart only counts
//! as finished once the file exists and parses.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("chart `{path}` was not ready after {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct ArtifactFinalizer {
    poll_interval: Duration,
}

enum Readiness {
    Missing,
    Malformed(String),
    Ready,
}

impl ArtifactFinalizer {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub async fn wait_until_ready(&self, path: &Path, timeout: Duration) -> Result<(), FinalizeError> {
        let started_at = Instant::now();
        let mut attempts = 0_u32;

        loop {
            attempts += 1;
            match check(path).await {
                Readiness::Ready => {
                    info!(
                        target = "chartforge::application::chart::finalizer",
                        op = "finalizer::wait_until_ready",
                        result = "ready",
                        attempts,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        path = %path.display(),
                        "Chart output finalized"
                    );
                    return Ok(());
                }
                Readiness::Missing => {}
                Readiness::Malformed(reason) => debug!(
                    target = "chartforge::application::chart::finalizer",
                    op = "finalizer::wait_until_ready",
                    result = "malformed",
                    attempts,
                    reason = %reason,
                    "Chart output not parseable yet"
                ),
            }

            if started_at.elapsed() + self.poll_interval > timeout {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(
            target = "chartforge::application::chart::finalizer",
            op = "finalizer::wait_until_ready",
            result = "timeout",
            attempts,
            timeout_ms = timeout.as_millis() as u64,
            path = %path.display(),
            "Chart output did not finalize in time"
        );
        Err(FinalizeError::Timeout {
            path: path.to_path_buf(),
            timeout,
        })
    }
}

async fn check(path: &Path) -> Readiness {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Readiness::Missing,
        Err(err) => return Readiness::Malformed(err.to_string()),
    };

    let parsed = tokio::task::spawn_blocking(move || {
        let options = usvg::Options::default();
        usvg::Tree::from_data(&bytes, &options)
            .map(|_| ())
            .map_err(|err| err.to_string())
    })
    .await;

    match parsed {
        Ok(Ok(())) => Readiness::Ready,
        Ok(Err(reason)) => Readiness::Malformed(reason),
        Err(join) => Readiness::Malformed(join.to_string()),
    }
}
