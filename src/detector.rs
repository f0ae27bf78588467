// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! The detection service.
//!
//! [`Detector`] is the single entry point of the crate. It owns the model
//! cache, loads the engine exactly once on first use, and drives one image
//! through letterboxing, tensor construction, the single-flight engine run,
//! decoding, and coordinate restoration.

use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use image::DynamicImage;

use crate::cache::{CachedArtifact, ModelCache, ModelDescriptor};
use crate::engine::{InferenceEngine, OrtEngine};
use crate::error::Result;
use crate::guard::InferenceGuard;
use crate::inference::InferenceConfig;
use crate::postprocessing::{decode, restore_all};
use crate::preprocessing::{ImageSource, build_tensor, decode_image, letterbox};
use crate::results::RestoredDetection;
use crate::verbose;

/// Builds an engine from resolved model bytes.
pub type EngineLoader<E> =
    Box<dyn Fn(&CachedArtifact, &InferenceConfig) -> Result<E> + Send + Sync>;

/// Detection service owning one lazily loaded engine.
///
/// Share it between threads by reference or `Arc`. Only one detection can be
/// inside the engine at a time; a concurrent call gets
/// [`InferenceError::Busy`](crate::InferenceError::Busy).
///
/// # Example
///
/// ```no_run
/// use bubble_inference::{Detector, InferenceConfig, ModelDescriptor};
///
/// let detector = Detector::new(
///     ModelDescriptor::new("org/bubble-detector", "model.onnx"),
///     InferenceConfig::default(),
/// );
/// let image = std::fs::read("page.jpg")?;
/// for det in detector.detect(&image, 0.5)? {
///     println!("{:?} {:.2}", det.xyxy(), det.confidence);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Detector<E = OrtEngine> {
    descriptor: ModelDescriptor,
    config: InferenceConfig,
    cache: ModelCache,
    loader: EngineLoader<E>,
    engine: OnceLock<InferenceGuard<E>>,
    load_lock: Mutex<()>,
}

impl Detector<OrtEngine> {
    /// Detector backed by the HTTP host, the on-disk cache, and ONNX Runtime.
    #[must_use]
    pub fn new(descriptor: ModelDescriptor, config: InferenceConfig) -> Self {
        let cache = ModelCache::from_config(&config);
        Self::with_parts(
            descriptor,
            config,
            cache,
            Box::new(|artifact, config| OrtEngine::from_bytes(&artifact.bytes, config)),
        )
    }

    /// Like [`Detector::new`], with the descriptor read from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the model variables are not set.
    pub fn from_env(config: InferenceConfig) -> Result<Self> {
        Ok(Self::new(ModelDescriptor::from_env()?, config))
    }
}

impl<E: InferenceEngine> Detector<E> {
    /// Detector with a custom cache and engine loader.
    pub fn with_parts(
        descriptor: ModelDescriptor,
        config: InferenceConfig,
        cache: ModelCache,
        loader: EngineLoader<E>,
    ) -> Self {
        Self {
            descriptor,
            config,
            cache,
            loader,
            engine: OnceLock::new(),
            load_lock: Mutex::new(()),
        }
    }

    /// Return the engine, resolving and loading it on first use.
    ///
    /// Racing first callers serialize on a load lock, so the engine is built
    /// exactly once. A loaded engine is kept for the detector's lifetime,
    /// even if the host later publishes a newer artifact.
    ///
    /// # Errors
    ///
    /// * `ArtifactUnavailable` if no model bytes can be obtained.
    /// * `EngineConstructionFailed` if the bytes do not load.
    pub fn resolve(&self) -> Result<&InferenceGuard<E>> {
        if let Some(guard) = self.engine.get() {
            return Ok(guard);
        }

        let _loading = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(guard) = self.engine.get() {
            return Ok(guard);
        }

        let start = Instant::now();
        let artifact = self.cache.fetch(&self.descriptor)?;
        let engine = (self.loader)(&artifact, &self.config)?;
        verbose!(
            "Model {} ({}) ready in {:.1}ms",
            self.descriptor,
            artifact.remote_version_tag.as_deref().unwrap_or("untagged"),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(self.engine.get_or_init(|| InferenceGuard::new(engine)))
    }

    /// Whether the engine has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.engine.get().is_some()
    }

    /// Detect objects in an encoded or base64 image.
    ///
    /// # Errors
    ///
    /// * `MalformedInput` if the image cannot be decoded.
    /// * `Busy` if another detection is running.
    /// * Any model resolution or engine error.
    pub fn detect<'a>(
        &self,
        image: impl Into<ImageSource<'a>>,
        min_confidence: f32,
    ) -> Result<Vec<RestoredDetection>> {
        let image = decode_image(image.into())?;
        self.detect_image(&image, min_confidence)
    }

    /// [`Detector::detect`] with the configured confidence threshold.
    ///
    /// # Errors
    ///
    /// See [`Detector::detect`].
    pub fn detect_default<'a>(
        &self,
        image: impl Into<ImageSource<'a>>,
    ) -> Result<Vec<RestoredDetection>> {
        self.detect(image, self.config.min_confidence)
    }

    /// Detect objects in an already decoded image.
    ///
    /// # Errors
    ///
    /// See [`Detector::detect`].
    pub fn detect_image(
        &self,
        image: &DynamicImage,
        min_confidence: f32,
    ) -> Result<Vec<RestoredDetection>> {
        let guard = self.resolve()?;

        let start_preprocess = Instant::now();
        let letterboxed = letterbox(image, self.config.target_size())?;
        let tensor = build_tensor(&letterboxed.padded_pixels, letterboxed.target_size)?;
        let preprocess_ms = start_preprocess.elapsed().as_secs_f64() * 1000.0;

        let start_inference = Instant::now();
        let output = guard.run(&tensor)?;
        let inference_ms = start_inference.elapsed().as_secs_f64() * 1000.0;

        let start_postprocess = Instant::now();
        let detections = restore_all(&decode(&output, min_confidence), &letterboxed);
        let postprocess_ms = start_postprocess.elapsed().as_secs_f64() * 1000.0;

        verbose!(
            "{}x{}: {} detections, {preprocess_ms:.1}ms preprocess, {inference_ms:.1}ms inference, {postprocess_ms:.1}ms postprocess",
            letterboxed.original_width,
            letterboxed.original_height,
            detections.len()
        );

        Ok(detections)
    }

    /// The model this detector serves.
    #[must_use]
    pub const fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// The detector configuration.
    #[must_use]
    pub const fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

impl<E> fmt::Debug for Detector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("descriptor", &self.descriptor)
            .field("target_size", &self.config.target_size())
            .field("loaded", &self.engine.get().is_some())
            .finish_non_exhaustive()
    }
}
