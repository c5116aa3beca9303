//! Collaborator traits the chart pipeline depends on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::CacheKey;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Account row resolved from a caller's uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub uuid: Uuid,
}

/// Ownership and membership lookups used to authorise datapack access.
#[async_trait]
pub trait AccessRepo: Send + Sync {
    async fn find_user(&self, uuid: Uuid) -> Result<Option<UserRecord>, RepoError>;

    /// Workshops the user belongs to that have not ended yet.
    async fn active_workshop_ids(&self, user_id: i64) -> Result<Vec<i64>, RepoError>;
}

/// Storage folder a datapack is looked up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatapackOwner {
    Official,
    User(Uuid),
    Workshop(String),
    Temp,
}

/// Maps datapack references onto directories on disk.
#[async_trait]
pub trait DatapackRepo: Send + Sync {
    /// Directory holding the datapack named `title`, or `None` when absent.
    async fn locate(&self, owner: &DatapackOwner, title: &str)
    -> Result<Option<PathBuf>, RepoError>;

    async fn delete_temp(&self, title: &str) -> Result<PathBuf, RepoError>;
}

/// Last-used bookkeeping for user datapack directories.
#[async_trait]
pub trait RetentionRepo: Send + Sync {
    async fn touch(&self, directories: &[PathBuf]) -> Result<(), RepoError>;

    async fn forget(&self, directory: &Path) -> Result<(), RepoError>;
}

/// One successfully served chart, as remembered for the caller.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub user_uuid: Uuid,
    pub cache_key: CacheKey,
    pub settings_path: PathBuf,
    pub chart_path: PathBuf,
    pub datapack_paths: Vec<PathBuf>,
}

#[async_trait]
pub trait HistoryRepo: Send + Sync {
    async fn record(&self, entry: &HistoryEntry) -> Result<(), RepoError>;
}
