// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Detect objects in one image with the model named by the environment.
//!
//! ```bash
//! DETECTION_MODEL_REPO=org/bubble-detector DETECTION_MODEL_PATH=detector.onnx \
//!     cargo run --release --example detect -- page.jpg 0.4
//! ```
//!
//! Set `DETECTION_PROVIDERS=coreml,cpu` to choose execution providers.

use std::time::Instant;

use bubble_inference::{Detector, InferenceConfig, info, logging, success, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        warn!("Usage: detect <image> [min-confidence]");
        std::process::exit(2);
    };
    let min_confidence = match args.next() {
        Some(value) => value.parse::<f32>()?,
        None => bubble_inference::inference::DEFAULT_MIN_CONFIDENCE,
    };

    logging::set_verbose(std::env::var_os("DETECTION_VERBOSE").is_some());

    let mut config = InferenceConfig::default();
    if let Ok(list) = std::env::var("DETECTION_PROVIDERS") {
        config = config.with_provider_list(&list)?;
    }

    let detector = Detector::from_env(config)?;
    let image = std::fs::read(&path)?;

    let start = Instant::now();
    let detections = detector.detect(&image, min_confidence)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    for det in &detections {
        let [x1, y1, x2, y2] = det.xyxy();
        info!(
            "class {} {:.2} [{x1:.1}, {y1:.1}, {x2:.1}, {y2:.1}]",
            det.class_id, det.confidence
        );
    }
    success!("{path}: {} detections in {elapsed_ms:.1}ms", detections.len());

    Ok(())
}
