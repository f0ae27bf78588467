// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Error types for the detection pipeline.

use std::fmt;

/// Result type alias for detection operations.
pub type Result<T> = std::result::Result<T, InferenceError>;

/// Main error type for the detection pipeline.
#[derive(Debug)]
pub enum InferenceError {
    /// Neither the model host nor the local cache produced model bytes.
    ArtifactUnavailable(String),
    /// The HEAD freshness check failed. Recovered inside the model cache.
    FreshnessCheckFailed(String),
    /// The model bytes could not be turned into a runnable session.
    EngineConstructionFailed(String),
    /// Another detection is currently running on the engine.
    Busy,
    /// The input image could not be decoded or has invalid dimensions.
    MalformedInput(String),
    /// Error while running the engine.
    InferenceError(String),
    /// Invalid or missing configuration.
    ConfigError(String),
    /// Wrapped `std::io::Error`
    Io(std::io::Error),
}

impl InferenceError {
    /// Whether the caller may simply re-issue the same request later.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArtifactUnavailable(msg) => write!(f, "Model artifact unavailable: {msg}"),
            Self::FreshnessCheckFailed(msg) => write!(f, "Freshness check failed: {msg}"),
            Self::EngineConstructionFailed(msg) => write!(f, "Engine construction failed: {msg}"),
            Self::Busy => write!(f, "Model is currently busy processing another image"),
            Self::MalformedInput(msg) => write!(f, "Malformed input: {msg}"),
            Self::InferenceError(msg) => write!(f, "Inference error: {msg}"),
            Self::ConfigError(msg) => write!(f, "Config error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for InferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for InferenceError {
    fn from(err: image::ImageError) -> Self {
        Self::MalformedInput(err.to_string())
    }
}
