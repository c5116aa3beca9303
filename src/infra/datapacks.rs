//! Filesystem layout of stored datapacks.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::application::repos::{DatapackOwner, DatapackRepo, RepoError};

const OFFICIAL_DIR: &str = "official";
const PRIVATE_DIR: &str = "private";
const PUBLIC_DIR: &str = "public";
const WORKSHOP_DIR: &str = "workshops";
const TEMP_DIR: &str = "temp";

/// Datapack directories rooted at a single folder.
///
/// A user's private copy shadows a public one with the same title.
#[derive(Debug, Clone)]
pub struct FsDatapackStore {
    root: PathBuf,
}

impl FsDatapackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, owner: &DatapackOwner, title: &str) -> Result<Vec<PathBuf>, RepoError> {
        let title = segment(title)?;
        let paths = match owner {
            DatapackOwner::Official => vec![self.root.join(OFFICIAL_DIR).join(title)],
            DatapackOwner::User(uuid) => {
                let uuid = uuid.to_string();
                vec![
                    self.root.join(PRIVATE_DIR).join(&uuid).join(title),
                    self.root.join(PUBLIC_DIR).join(&uuid).join(title),
                ]
            }
            DatapackOwner::Workshop(workshop) => {
                vec![self.root.join(WORKSHOP_DIR).join(segment(workshop)?).join(title)]
            }
            DatapackOwner::Temp => vec![self.root.join(TEMP_DIR).join(title)],
        };
        Ok(paths)
    }
}

#[async_trait]
impl DatapackRepo for FsDatapackStore {
    async fn locate(
        &self,
        owner: &DatapackOwner,
        title: &str,
    ) -> Result<Option<PathBuf>, RepoError> {
        for candidate in self.candidates(owner, title)? {
            match fs::metadata(&candidate).await {
                Ok(meta) if meta.is_dir() => return Ok(Some(candidate)),
                Ok(_) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(RepoError::Io(err)),
            }
        }
        Ok(None)
    }

    async fn delete_temp(&self, title: &str) -> Result<PathBuf, RepoError> {
        let directory = self.root.join(TEMP_DIR).join(segment(title)?);
        match fs::remove_dir_all(&directory).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    target = "chartforge::infra::datapacks",
                    op = "datapacks::delete_temp",
                    result = "missing",
                    path = %directory.display(),
                    "Temp datapack already removed"
                );
            }
            Err(err) => return Err(RepoError::Io(err)),
        }
        Ok(directory)
    }
}

/// Accept `value` only when it names exactly one normal path component.
fn segment(value: &str) -> Result<&str, RepoError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\', '\0']) => Ok(value),
        _ => Err(RepoError::invalid_input(format!(
            "`{value}` is not a valid datapack path segment"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn store() -> (TempDir, FsDatapackStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = FsDatapackStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn private_copy_shadows_public_copy() {
        let (_dir, store) = store();
        let uuid = Uuid::new_v4();
        let private = store
            .root()
            .join(PRIVATE_DIR)
            .join(uuid.to_string())
            .join("Africa");
        let public = store
            .root()
            .join(PUBLIC_DIR)
            .join(uuid.to_string())
            .join("Africa");
        std::fs::create_dir_all(&private).expect("private dir");
        std::fs::create_dir_all(&public).expect("public dir");

        let found = store
            .locate(&DatapackOwner::User(uuid), "Africa")
            .await
            .expect("locate");
        assert_eq!(found, Some(private.clone()));

        std::fs::remove_dir_all(&private).expect("remove private");
        let found = store
            .locate(&DatapackOwner::User(uuid), "Africa")
            .await
            .expect("locate");
        assert_eq!(found, Some(public));
    }

    #[tokio::test]
    async fn plain_files_are_not_datapacks() {
        let (_dir, store) = store();
        let official = store.root().join(OFFICIAL_DIR);
        std::fs::create_dir_all(&official).expect("official dir");
        std::fs::write(official.join("GTS2020"), b"not a dir").expect("file");

        let found = store
            .locate(&DatapackOwner::Official, "GTS2020")
            .await
            .expect("locate");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn traversal_titles_are_rejected() {
        let (_dir, store) = store();
        for title in ["..", "../official", "a/b", ""] {
            let err = store
                .locate(&DatapackOwner::Official, title)
                .await
                .expect_err("invalid title");
            assert!(matches!(err, RepoError::InvalidInput { .. }), "{title}");
        }
        let err = store
            .locate(&DatapackOwner::Workshop("..".to_string()), "x")
            .await
            .expect_err("invalid workshop");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn delete_temp_removes_directory_and_tolerates_absence() {
        let (_dir, store) = store();
        let temp = store.root().join(TEMP_DIR).join("scratch");
        std::fs::create_dir_all(&temp).expect("temp dir");
        std::fs::write(temp.join("scratch.txt"), b"data").expect("file");

        let removed = store.delete_temp("scratch").await.expect("delete");
        assert_eq!(removed, temp);
        assert!(!temp.exists());

        store.delete_temp("scratch").await.expect("second delete");
    }
}
