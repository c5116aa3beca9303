use thiserror::Error;

use super::{
    finalizer::FinalizeError, renderer::RendererError, resolver::ResolveError,
    scheduler::AdmissionError,
};

/// Everything that can end a chart request without a chart.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid chart request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Authorization(ResolveError),
    #[error(transparent)]
    DatapackNotFound(ResolveError),
    #[error("Queue is too busy")]
    Capacity(#[source] AdmissionError),
    #[error("Queue timed out")]
    QueueTimeout(#[source] AdmissionError),
    #[error("Failed to update file metadata: {0}")]
    MetadataPersist(String),
    #[error("Failed to execute chart renderer")]
    SpawnFailure(#[source] RendererError),
    #[error("Chart renderer timed out")]
    RendererTimeout(#[source] RendererError),
    #[error("{message}")]
    RendererReported { code: u32, message: String },
    #[error("Chart file did not finalize in time")]
    FinalizationTimeout(#[source] FinalizeError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChartError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Stable number sent to clients in the terminal error message.
    pub fn code(&self) -> u32 {
        match self {
            ChartError::MetadataPersist(_) => 100,
            ChartError::SpawnFailure(_) => 400,
            ChartError::Authorization(_) => 403,
            ChartError::DatapackNotFound(_) => 404,
            ChartError::QueueTimeout(_) => 408,
            ChartError::InvalidRequest(_) => 422,
            ChartError::Capacity(_) => 503,
            ChartError::RendererTimeout(_) => 504,
            ChartError::RendererReported { code, .. } => *code,
            ChartError::Internal(_) => 5000,
            ChartError::FinalizationTimeout(_) => 5001,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChartError::InvalidRequest(_) => "invalid_request",
            ChartError::Authorization(_) => "authorization",
            ChartError::DatapackNotFound(_) => "datapack_not_found",
            ChartError::Capacity(_) => "capacity",
            ChartError::QueueTimeout(_) => "queue_timeout",
            ChartError::MetadataPersist(_) => "metadata_persist",
            ChartError::SpawnFailure(_) => "spawn_failure",
            ChartError::RendererTimeout(_) => "renderer_timeout",
            ChartError::RendererReported { .. } => "renderer_reported",
            ChartError::FinalizationTimeout(_) => "finalization_timeout",
            ChartError::Internal(_) => "internal",
        }
    }
}

impl From<ResolveError> for ChartError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Unauthorized { .. } => ChartError::Authorization(error),
            ResolveError::MissingDatapack { .. } => ChartError::DatapackNotFound(error),
            ResolveError::InvalidName { .. } => ChartError::InvalidRequest(error.to_string()),
            ResolveError::Lookup(_) => ChartError::internal(error),
        }
    }
}

impl From<AdmissionError> for ChartError {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::Capacity { .. } => ChartError::Capacity(error),
            AdmissionError::Timeout(_) => ChartError::QueueTimeout(error),
            AdmissionError::Closed => ChartError::internal(error),
        }
    }
}

impl From<RendererError> for ChartError {
    fn from(error: RendererError) -> Self {
        match error {
            RendererError::Spawn { .. } => ChartError::SpawnFailure(error),
            RendererError::Timeout(_) => ChartError::RendererTimeout(error),
            RendererError::Io(_) => ChartError::internal(error),
        }
    }
}

impl From<FinalizeError> for ChartError {
    fn from(error: FinalizeError) -> Self {
        ChartError::FinalizationTimeout(error)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn queue_failures_stay_distinguishable() {
        let capacity = ChartError::from(AdmissionError::Capacity {
            depth: 30,
            max_depth: 30,
        });
        let timeout = ChartError::from(AdmissionError::Timeout(Duration::from_secs(1)));

        assert_eq!(capacity.code(), 503);
        assert_eq!(timeout.code(), 408);
        assert_eq!(capacity.to_string(), "Queue is too busy");
    }

    #[test]
    fn renderer_failures_map_to_their_own_codes() {
        let spawn = ChartError::from(RendererError::Spawn {
            program: "java".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        let killed = ChartError::from(RendererError::Timeout(Duration::from_secs(30)));
        let reported = ChartError::RendererReported {
            code: 1001,
            message: "Error! No columns selected".to_string(),
        };

        assert_eq!(spawn.code(), 400);
        assert_eq!(killed.code(), 504);
        assert_eq!(reported.code(), 1001);
        assert_eq!(reported.to_string(), "Error! No columns selected");
    }

    #[test]
    fn resolution_failures_split_by_cause() {
        let denied = ChartError::from(ResolveError::Unauthorized {
            title: "x".to_string(),
            reason: "nope",
        });
        let missing = ChartError::from(ResolveError::MissingDatapack {
            title: "x".to_string(),
        });
        let invalid = ChartError::from(ResolveError::InvalidName {
            name: "..".to_string(),
        });

        assert_eq!(denied.code(), 403);
        assert_eq!(missing.code(), 404);
        assert_eq!(invalid.code(), 422);
    }
}
