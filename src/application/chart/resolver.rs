//! Authorises datapack references and maps them onto renderer input paths.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{AccessRepo, DatapackOwner, DatapackRepo, RepoError, UserRecord};
use crate::domain::{CallerIdentity, ChartRequest, DatapackRef, DatapackSource};

use super::scheduler::Priority;

const WORKSHOP_UUID_PREFIX: &str = "workshop-";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("access to datapack `{title}` denied: {reason}")]
    Unauthorized { title: String, reason: &'static str },
    #[error("datapack `{title}` does not exist")]
    MissingDatapack { title: String },
    #[error("datapack name `{name}` is not a valid file name")]
    InvalidName { name: String },
    #[error("failed to look up datapack access: {0}")]
    Lookup(#[from] RepoError),
}

/// What is known about the caller once their identity has been checked
/// against the account store.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub identity: Option<CallerIdentity>,
    pub user: Option<UserRecord>,
    pub active_workshops: Vec<i64>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn priority(&self) -> Priority {
        if !self.active_workshops.is_empty() {
            Priority::Workshop
        } else if self.identity.is_some() {
            Priority::Authenticated
        } else {
            Priority::Anonymous
        }
    }

    fn is_active_member(&self, workshop_id: i64) -> bool {
        self.user.is_some() && self.active_workshops.contains(&workshop_id)
    }
}

/// Authorised renderer inputs for one request.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRequest {
    /// Datapack files in request order.
    pub datapack_paths: Vec<PathBuf>,
    /// Directories of user-owned datapacks whose retention must be refreshed.
    pub retained_dirs: Vec<PathBuf>,
    /// Titles of temp datapacks to delete once the request is over.
    pub temp_titles: Vec<String>,
    /// Stored file name to human-readable title.
    pub display_names: HashMap<String, String>,
}

pub struct RequestResolver {
    access: Arc<dyn AccessRepo>,
    datapacks: Arc<dyn DatapackRepo>,
}

impl RequestResolver {
    pub fn new(access: Arc<dyn AccessRepo>, datapacks: Arc<dyn DatapackRepo>) -> Self {
        Self { access, datapacks }
    }

    pub async fn caller_context(
        &self,
        identity: Option<CallerIdentity>,
    ) -> Result<CallerContext, ResolveError> {
        let Some(identity) = identity else {
            return Ok(CallerContext::anonymous());
        };

        let user = self.access.find_user(identity.user_uuid).await?;
        let active_workshops = match user {
            Some(user) => self.access.active_workshop_ids(user.user_id).await?,
            None => Vec::new(),
        };

        Ok(CallerContext {
            identity: Some(identity),
            user,
            active_workshops,
        })
    }

    /// Resolve every reference in order. Any single failure rejects the
    /// whole request.
    pub async fn resolve(
        &self,
        request: &ChartRequest,
        caller: &CallerContext,
    ) -> Result<ResolvedRequest, ResolveError> {
        let started_at = Instant::now();
        let mut resolved = ResolvedRequest::default();

        for datapack in &request.datapack_refs {
            ensure_file_name(&datapack.title)?;
            ensure_file_name(&datapack.stored_filename)?;

            let owner = authorize(datapack, caller).inspect_err(|err| {
                warn!(
                    target = "chartforge::application::chart::resolver",
                    op = "resolver::resolve",
                    result = "denied",
                    title = %datapack.title,
                    error = %err,
                    "Datapack access denied"
                );
            })?;

            let directory = self
                .datapacks
                .locate(&owner, &datapack.title)
                .await?
                .ok_or_else(|| ResolveError::MissingDatapack {
                    title: datapack.title.clone(),
                })?;

            match datapack.source {
                DatapackSource::User { .. } => resolved.retained_dirs.push(directory.clone()),
                DatapackSource::Temp => resolved.temp_titles.push(datapack.title.clone()),
                DatapackSource::Official | DatapackSource::Workshop { .. } => {}
            }
            resolved
                .datapack_paths
                .push(directory.join(&datapack.stored_filename));
            resolved
                .display_names
                .insert(datapack.stored_filename.clone(), datapack.title.clone());
        }

        debug!(
            target = "chartforge::application::chart::resolver",
            op = "resolver::resolve",
            result = "ok",
            datapacks = resolved.datapack_paths.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Datapacks resolved"
        );
        Ok(resolved)
    }
}

fn authorize(datapack: &DatapackRef, caller: &CallerContext) -> Result<DatapackOwner, ResolveError> {
    let denied = |reason| ResolveError::Unauthorized {
        title: datapack.title.clone(),
        reason,
    };

    match &datapack.source {
        DatapackSource::Official => Ok(DatapackOwner::Official),
        DatapackSource::Temp => Ok(DatapackOwner::Temp),
        DatapackSource::User { uuid, is_public } => {
            let is_owner = caller
                .identity
                .is_some_and(|identity| identity.user_uuid == *uuid);
            if *is_public || is_owner {
                Ok(DatapackOwner::User(*uuid))
            } else {
                Err(denied("private datapack belongs to another user"))
            }
        }
        DatapackSource::Workshop { uuid } => {
            let workshop_id =
                workshop_id_from_uuid(uuid).ok_or_else(|| denied("malformed workshop uuid"))?;
            if caller.is_active_member(workshop_id) {
                Ok(DatapackOwner::Workshop(uuid.clone()))
            } else {
                Err(denied("caller is not an active member of the workshop"))
            }
        }
    }
}

/// Workshop folders are named `workshop-<id>`.
pub fn workshop_id_from_uuid(uuid: &str) -> Option<i64> {
    uuid.strip_prefix(WORKSHOP_UUID_PREFIX)?.parse().ok()
}

fn ensure_file_name(name: &str) -> Result<(), ResolveError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(ResolveError::InvalidName {
            name: name.to_string(),
        })
    }
}
