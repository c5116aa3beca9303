//! External chart renderer: job description, outcome and the seam the
//! orchestrator calls through.

mod known_errors;
mod progress;
mod supervisor;

use std::{collections::HashMap, io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use known_errors::{UNKNOWN_ERROR_CODE, classify, known_error_code};
pub use progress::{LineAccumulator, parse_milestone};
pub use supervisor::RendererSupervisor;

use super::channel::ProgressSink;

/// Everything the renderer needs for one invocation.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub is_cross_plot: bool,
    pub settings_path: PathBuf,
    pub datapack_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    /// Stored file name to title, used to label per-datapack progress.
    pub display_names: HashMap<String, String>,
}

/// How a renderer run that exited on its own went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    /// `0` when the success sentinel was printed.
    pub known_error_code: u32,
    pub error_message: String,
}

impl RenderOutcome {
    pub fn success() -> Self {
        Self {
            known_error_code: 0,
            error_message: String::new(),
        }
    }

    pub fn failure(code: u32, message: impl Into<String>) -> Self {
        Self {
            known_error_code: code,
            error_message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.known_error_code == 0
    }
}

/// Failures of the process itself, as opposed to errors it reports.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to spawn renderer `{program}`: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("renderer killed after {0:?}")]
    Timeout(Duration),
    #[error("renderer i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Run the renderer to completion, reporting milestones to `progress`.
    ///
    /// The process must no longer be running when this returns.
    async fn render(
        &self,
        job: &RenderJob,
        progress: &ProgressSink,
    ) -> Result<RenderOutcome, RendererError>;
}
