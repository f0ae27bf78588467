// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Detector configuration.
//!
//! This module defines the [`InferenceConfig`] struct, which controls the
//! letterbox size, the confidence threshold, where the model artifact is
//! fetched from and cached, and how the ONNX Runtime session is built.

use std::path::PathBuf;
use std::time::Duration;

use crate::device::{ExecutionProvider, parse_preference};
use crate::error::{InferenceError, Result};

/// Square input size the detection model was exported with.
pub const DEFAULT_TARGET_SIZE: u32 = 1280;

/// Default minimum confidence for a detection to be reported.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Default static artifact host.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Default artifact revision.
pub const DEFAULT_REVISION: &str = "main";

/// Configuration for the detector.
///
/// # Example
///
/// ```rust
/// use bubble_inference::{ExecutionProvider, InferenceConfig};
///
/// let config = InferenceConfig::new()
///     .with_target_size(640)
///     .with_min_confidence(0.4)
///     .with_providers(vec![ExecutionProvider::Cpu]);
/// ```
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Square letterbox size in pixels. `None` falls back to [`DEFAULT_TARGET_SIZE`].
    pub target_size: Option<u32>,
    /// Default confidence threshold used by `detect_default`.
    pub min_confidence: f32,
    /// Number of intra-op threads for ONNX Runtime.
    /// Setting this to `0` allows ONNX Runtime to choose.
    pub num_threads: usize,
    /// Execution providers in order of preference.
    pub providers: Vec<ExecutionProvider>,
    /// Base URL of the artifact host.
    pub endpoint: String,
    /// Revision (branch, tag or commit) of the artifact repository.
    pub revision: String,
    /// Directory for the blob and tag stores.
    /// If `None`, the platform cache directory is used.
    pub cache_dir: Option<PathBuf>,
    /// Connection timeout for HEAD and GET requests.
    pub connect_timeout: Duration,
    /// Body read timeout for the full model download.
    pub read_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            target_size: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            num_threads: 0,
            providers: ExecutionProvider::default_preference(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            cache_dir: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
        }
    }
}

impl InferenceConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Letterbox size actually used for inference.
    #[must_use]
    pub fn target_size(&self) -> u32 {
        self.target_size.unwrap_or(DEFAULT_TARGET_SIZE)
    }

    /// Set the square letterbox size.
    #[must_use]
    pub const fn with_target_size(mut self, size: u32) -> Self {
        self.target_size = Some(size);
        self
    }

    /// Set the default confidence threshold.
    ///
    /// # Arguments
    ///
    /// * `threshold` - The minimum confidence score (0.0 to 1.0).
    #[must_use]
    pub const fn with_min_confidence(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold;
        self
    }

    /// Set the number of threads for inference.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Set the execution provider preference order.
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<ExecutionProvider>) -> Self {
        self.providers = providers;
        self
    }

    /// Set the provider preference from a list such as `"coreml,cuda:0,cpu"`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an unknown provider name.
    pub fn with_provider_list(self, list: &str) -> Result<Self> {
        let providers = parse_preference(list).map_err(InferenceError::ConfigError)?;
        Ok(self.with_providers(providers))
    }

    /// Set the artifact host base URL. A trailing slash is dropped.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Set the artifact revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Set the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the HTTP connect and body timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Resolve the cache directory, falling back to the platform cache dir.
    #[must_use]
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join(crate::NAME)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = InferenceConfig::default();
        assert!((config.min_confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.target_size(), 1280);
        assert_eq!(config.endpoint, "https://huggingface.co");
        assert_eq!(config.revision, "main");
        assert_eq!(config.providers.last(), Some(&ExecutionProvider::Cpu));
    }

    #[test]
    fn test_config_builder() {
        let config = InferenceConfig::new()
            .with_target_size(640)
            .with_min_confidence(0.3)
            .with_threads(4)
            .with_endpoint("http://localhost:8080/")
            .with_revision("v2")
            .with_cache_dir("/tmp/models");

        assert_eq!(config.target_size(), 640);
        assert!((config.min_confidence - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.revision, "v2");
        assert_eq!(config.resolved_cache_dir(), PathBuf::from("/tmp/models"));
    }

    #[test]
    fn test_provider_list() {
        let config = InferenceConfig::new()
            .with_provider_list("cuda:1, cpu")
            .unwrap();
        assert_eq!(
            config.providers,
            vec![ExecutionProvider::Cuda(1), ExecutionProvider::Cpu]
        );
        assert!(matches!(
            InferenceConfig::new().with_provider_list("tpu"),
            Err(InferenceError::ConfigError(_))
        ));
    }

    #[test]
    fn test_default_cache_dir_is_namespaced() {
        let dir = InferenceConfig::default().resolved_cache_dir();
        assert!(dir.ends_with(crate::NAME));
    }
}
