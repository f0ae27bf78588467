// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Model artifact resolution with remote freshness checking.
//!
//! [`ModelCache::fetch`] turns a [`ModelDescriptor`] into model bytes. Cached
//! bytes are reused as long as the host's version tag matches the one stored
//! when they were downloaded. The freshness check is best-effort: when the
//! host is unreachable the cache is used as-is.

use std::fmt;
use std::sync::Arc;

use crate::download::{HttpModelHost, ModelHost};
use crate::error::{InferenceError, Result};
use crate::inference::InferenceConfig;
use crate::store::{BlobCache, FsBlobCache, FsTagStore, TagStore};
use crate::{verbose, warn};

/// Environment variable naming the artifact repository.
pub const MODEL_REPO_ENV: &str = "DETECTION_MODEL_REPO";

/// Environment variable naming the artifact path inside the repository.
pub const MODEL_PATH_ENV: &str = "DETECTION_MODEL_PATH";

/// Identifies a model artifact on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelDescriptor {
    /// Repository on the host, e.g. `"org/bubble-detector"`.
    pub repository_id: String,
    /// File inside the repository, e.g. `"model.onnx"`.
    pub artifact_path: String,
}

impl ModelDescriptor {
    /// Create a descriptor. Surrounding slashes are trimmed from both parts.
    pub fn new(repository_id: impl AsRef<str>, artifact_path: impl AsRef<str>) -> Self {
        Self {
            repository_id: repository_id.as_ref().trim_matches('/').to_string(),
            artifact_path: artifact_path.as_ref().trim_matches('/').to_string(),
        }
    }

    /// Read the descriptor from [`MODEL_REPO_ENV`] and [`MODEL_PATH_ENV`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the descriptor from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either variable is missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| InferenceError::ConfigError(format!("{key} is not set")))
        };
        Ok(Self::new(read(MODEL_REPO_ENV)?, read(MODEL_PATH_ENV)?))
    }

    /// Resolve the download URL on `endpoint` at `revision`.
    #[must_use]
    pub fn url(&self, endpoint: &str, revision: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            endpoint.trim_end_matches('/'),
            self.repository_id,
            revision,
            self.artifact_path
        )
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository_id, self.artifact_path)
    }
}

/// Model bytes together with the version tag they were validated against.
#[derive(Clone)]
pub struct CachedArtifact {
    /// Which artifact these bytes belong to.
    pub descriptor: ModelDescriptor,
    /// Host version tag, if one has ever been seen for this descriptor.
    pub remote_version_tag: Option<String>,
    /// Raw model bytes.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for CachedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedArtifact")
            .field("descriptor", &self.descriptor)
            .field("remote_version_tag", &self.remote_version_tag)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Outcome of the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Freshness {
    /// Host tag matches the stored tag.
    Current(String),
    /// Host reported a different tag than the stored one.
    Stale(String),
    /// Host answered without a tag, or could not be reached.
    Unknown,
}

/// Resolves model descriptors to bytes using a local cache and a remote host.
pub struct ModelCache {
    host: Arc<dyn ModelHost>,
    blobs: Arc<dyn BlobCache>,
    tags: Arc<dyn TagStore>,
    endpoint: String,
    revision: String,
}

impl ModelCache {
    /// Create a cache from explicit parts.
    pub fn new(
        host: Arc<dyn ModelHost>,
        blobs: Arc<dyn BlobCache>,
        tags: Arc<dyn TagStore>,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            host,
            blobs,
            tags,
            endpoint: config.endpoint.clone(),
            revision: config.revision.clone(),
        }
    }

    /// HTTP host plus filesystem stores under the configured cache directory.
    #[must_use]
    pub fn from_config(config: &InferenceConfig) -> Self {
        let root = config.resolved_cache_dir();
        Self::new(
            Arc::new(HttpModelHost::new(config)),
            Arc::new(FsBlobCache::new(root.join("blobs"))),
            Arc::new(FsTagStore::new(root.join("tags"))),
            config,
        )
    }

    /// Canonical remote URL for `descriptor`.
    #[must_use]
    pub fn url_for(&self, descriptor: &ModelDescriptor) -> String {
        descriptor.url(&self.endpoint, &self.revision)
    }

    /// Return the model bytes for `descriptor`, downloading them when the
    /// cache is empty or the host reports a newer version.
    ///
    /// # Errors
    ///
    /// * `ArtifactUnavailable` when there are no cached bytes and the download fails.
    /// * `Io` when a store cannot be read or written.
    pub fn fetch(&self, descriptor: &ModelDescriptor) -> Result<CachedArtifact> {
        let url = self.url_for(descriptor);
        let key = descriptor.to_string();

        let cached = self.blobs.get(&url)?;
        let freshness = self.check_freshness(&url, &key)?;

        let needs_update = matches!(freshness, Freshness::Stale(_));
        let remote_tag = match freshness {
            Freshness::Current(tag) | Freshness::Stale(tag) => Some(tag),
            Freshness::Unknown => None,
        };

        let Some(bytes) = cached.filter(|_| !needs_update) else {
            return self.download(descriptor, &url, &key, remote_tag);
        };

        Ok(CachedArtifact {
            descriptor: descriptor.clone(),
            remote_version_tag: match remote_tag {
                Some(tag) => Some(tag),
                None => self.tags.get(&key)?,
            },
            bytes,
        })
    }

    /// Compare the host's tag against the stored one.
    ///
    /// A failed `HEAD` is the only tolerated failure in the pipeline: it is
    /// logged and reported as [`Freshness::Unknown`].
    fn check_freshness(&self, url: &str, key: &str) -> Result<Freshness> {
        let remote = match self.host.head(url) {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                verbose!("No {} header for {url}; using cached model", crate::download::VERSION_HEADER);
                return Ok(Freshness::Unknown);
            }
            Err(e) => {
                warn!("Offline: skipping model update check and using cache ({e})");
                return Ok(Freshness::Unknown);
            }
        };

        if self.tags.get(key)?.as_deref() == Some(remote.as_str()) {
            Ok(Freshness::Current(remote))
        } else {
            Ok(Freshness::Stale(remote))
        }
    }

    /// Full fetch, then overwrite the blob and persist the tag.
    fn download(
        &self,
        descriptor: &ModelDescriptor,
        url: &str,
        key: &str,
        remote_tag: Option<String>,
    ) -> Result<CachedArtifact> {
        verbose!("Fetching model {descriptor} from {url}");
        let bytes = match self.host.get(url) {
            Ok(bytes) => bytes,
            Err(e) => return self.fall_back_to_cache(descriptor, url, key, e),
        };

        self.blobs.put(url, &bytes)?;
        if let Some(tag) = &remote_tag {
            self.tags.set(key, tag)?;
        }

        Ok(CachedArtifact {
            descriptor: descriptor.clone(),
            remote_version_tag: remote_tag,
            bytes,
        })
    }

    /// A failed refresh still leaves older cached bytes usable.
    fn fall_back_to_cache(
        &self,
        descriptor: &ModelDescriptor,
        url: &str,
        key: &str,
        err: InferenceError,
    ) -> Result<CachedArtifact> {
        let Some(bytes) = self.blobs.get(url)? else {
            return Err(match err {
                InferenceError::ArtifactUnavailable(_) => err,
                other => InferenceError::ArtifactUnavailable(other.to_string()),
            });
        };
        warn!("Model update for {descriptor} failed, using stale cached copy ({err})");
        Ok(CachedArtifact {
            descriptor: descriptor.clone(),
            remote_version_tag: self.tags.get(key)?,
            bytes,
        })
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("endpoint", &self.endpoint)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}
