// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Bubble Inference
//!
//! On-device object detection for a single ONNX detector, typically a comic
//! speech-bubble model. Images of any resolution go in, boxes in the image's
//! own pixel space come out.
//!
//! The model artifact is downloaded from a Hugging Face style host, checked
//! for freshness with a `HEAD` request on every process start, and cached on
//! disk so detection keeps working offline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bubble_inference::{Detector, InferenceConfig, ModelDescriptor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let detector = Detector::new(
//!         ModelDescriptor::new("org/bubble-detector", "detector.onnx"),
//!         InferenceConfig::new().with_target_size(1280),
//!     );
//!
//!     let bytes = std::fs::read("page.png")?;
//!     for det in detector.detect(&bytes, 0.5)? {
//!         let [x1, y1, x2, y2] = det.xyxy();
//!         println!("class {} {:.2} [{x1:.0}, {y1:.0}, {x2:.0}, {y2:.0}]", det.class_id, det.confidence);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Base64 payloads and `data:` URLs are accepted as well:
//!
//! ```no_run
//! # use bubble_inference::{Detector, InferenceConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let detector = Detector::from_env(InferenceConfig::default())?;
//! let payload = "data:image/png;base64,iVBORw0KGgo...";
//! let detections = detector.detect(payload, 0.5)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Function |
//! |-------|----------|
//! | Model resolution | [`ModelCache::fetch`], [`Detector::resolve`] |
//! | Letterbox | [`preprocessing::letterbox`] |
//! | Tensor | [`preprocessing::build_tensor`] |
//! | Engine run | [`InferenceGuard::run`] |
//! | Decode | [`postprocessing::decode`] |
//! | Restore | [`postprocessing::restore`] |
//!
//! Only one image can be inside the engine at a time. A call that arrives
//! while another is running fails fast with [`InferenceError::Busy`].
//!
//! ## Hardware Acceleration
//!
//! ```bash
//! cargo build --release --features cuda
//! cargo build --release --features coreml
//! ```
//!
//! The provider preference is set with [`InferenceConfig::with_providers`].
//! Providers that are not compiled in are skipped and CPU is always tried last.
//!
//! ## License
//!
//! AGPL-3.0.

// Modules
pub mod cache;
pub mod detector;
pub mod device;
pub mod download;
pub mod engine;
pub mod error;
pub mod guard;
pub mod inference;
pub mod logging;
pub mod postprocessing;
pub mod preprocessing;
pub mod results;
pub mod store;

// Re-export main types for convenience
pub use cache::{CachedArtifact, ModelCache, ModelDescriptor};
pub use detector::{Detector, EngineLoader};
pub use device::ExecutionProvider;
pub use download::{HttpModelHost, ModelHost};
pub use engine::{InferenceEngine, OrtEngine};
pub use error::{InferenceError, Result};
pub use guard::InferenceGuard;
pub use inference::InferenceConfig;
pub use preprocessing::{ImageSource, LetterboxResult};
pub use results::{DetectionRecord, RestoredDetection};
pub use store::{BlobCache, FsBlobCache, FsTagStore, MemoryBlobCache, MemoryTagStore, TagStore};

// Used by the logging macros.
#[doc(hidden)]
pub use colored;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
