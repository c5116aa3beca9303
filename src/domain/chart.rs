//! Chart request model and the content-addressed identifiers derived from it.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const CACHE_KEY_HEX_LEN: usize = 64;

/// A chart-generation request as submitted by a client.
///
/// `settings_text` is opaque to this service; it is produced by the settings
/// transcoder and handed to the renderer verbatim. The order of
/// `datapack_refs` is significant: it is forwarded to the renderer as-is and
/// participates in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    #[serde(rename = "settings")]
    pub settings_text: String,
    #[serde(rename = "datapacks")]
    pub datapack_refs: Vec<DatapackRef>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default)]
    pub is_cross_plot: bool,
}

fn default_use_cache() -> bool {
    true
}

/// Reference to a stored datapack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapackRef {
    pub title: String,
    #[serde(rename = "storedFileName")]
    pub stored_filename: String,
    #[serde(flatten)]
    pub source: DatapackSource,
}

/// Where a datapack lives and which access rule applies to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum DatapackSource {
    Official,
    User { uuid: Uuid, is_public: bool },
    Workshop { uuid: String },
    Temp,
}

impl DatapackRef {
    pub fn official(title: impl Into<String>, stored_filename: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            stored_filename: stored_filename.into(),
            source: DatapackSource::Official,
        }
    }

    pub fn user(
        title: impl Into<String>,
        stored_filename: impl Into<String>,
        owner: Uuid,
        is_public: bool,
    ) -> Self {
        Self {
            title: title.into(),
            stored_filename: stored_filename.into(),
            source: DatapackSource::User {
                uuid: owner,
                is_public,
            },
        }
    }

    pub fn workshop(
        title: impl Into<String>,
        stored_filename: impl Into<String>,
        workshop_uuid: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            stored_filename: stored_filename.into(),
            source: DatapackSource::Workshop {
                uuid: workshop_uuid.into(),
            },
        }
    }

    pub fn temp(title: impl Into<String>, stored_filename: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            stored_filename: stored_filename.into(),
            source: DatapackSource::Temp,
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        match &self.source {
            DatapackSource::Official => update_framed(hasher, b"official"),
            DatapackSource::User { uuid, is_public } => {
                update_framed(hasher, b"user");
                update_framed(hasher, uuid.as_bytes());
                hasher.update([u8::from(*is_public)]);
            }
            DatapackSource::Workshop { uuid } => {
                update_framed(hasher, b"workshop");
                update_framed(hasher, uuid.as_bytes());
            }
            DatapackSource::Temp => update_framed(hasher, b"temp"),
        }
        update_framed(hasher, self.title.as_bytes());
        update_framed(hasher, self.stored_filename.as_bytes());
    }
}

/// Deterministic digest identifying a render request.
///
/// Computed over the cross-plot flag, the settings text and every datapack
/// reference in request order. Each variable-length field is length-prefixed
/// so distinct inputs cannot collide by concatenation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &ChartRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([u8::from(request.is_cross_plot)]);
        update_framed(&mut hasher, request.settings_text.as_bytes());
        hasher.update((request.datapack_refs.len() as u64).to_be_bytes());
        for datapack in &request.datapack_refs {
            datapack.digest_into(&mut hasher);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a key coming back from a URL; only lowercase hex digests of the
    /// expected length are valid.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == CACHE_KEY_HEX_LEN
            && value
                .bytes()
                .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Location of a rendered chart, both on disk and as served to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartArtifact {
    pub cache_key: CacheKey,
    pub url_path: String,
    pub filesystem_path: PathBuf,
}

/// Identity asserted by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_uuid: Uuid,
}

impl CallerIdentity {
    pub fn new(user_uuid: Uuid) -> Self {
        Self { user_uuid }
    }
}
