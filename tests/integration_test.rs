// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! End-to-end tests through the public API with an in-process host and engine.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bubble_inference::{
    BlobCache, Detector, FsBlobCache, FsTagStore, InferenceConfig, InferenceEngine,
    InferenceError, MemoryBlobCache, MemoryTagStore, ModelCache, ModelDescriptor, ModelHost,
    Result, TagStore,
};
use image::{DynamicImage, ImageFormat};
use ndarray::Array4;

/// Host serving one artifact with a switchable version tag.
struct FakeHost {
    tag: Mutex<Option<String>>,
    online: Mutex<bool>,
    gets: AtomicUsize,
}

impl FakeHost {
    fn new(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            tag: Mutex::new(Some(tag.to_string())),
            online: Mutex::new(true),
            gets: AtomicUsize::new(0),
        })
    }

    fn publish(&self, tag: &str) {
        *self.tag.lock().unwrap() = Some(tag.to_string());
    }

    fn set_online(&self, online: bool) {
        *self.online.lock().unwrap() = online;
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl ModelHost for FakeHost {
    fn head(&self, url: &str) -> Result<Option<String>> {
        if !*self.online.lock().unwrap() {
            return Err(InferenceError::FreshnessCheckFailed(format!("{url}: offline")));
        }
        Ok(self.tag.lock().unwrap().clone())
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        if !*self.online.lock().unwrap() {
            return Err(InferenceError::ArtifactUnavailable(format!("{url}: offline")));
        }
        self.gets.fetch_add(1, Ordering::SeqCst);
        let tag = self.tag.lock().unwrap().clone().unwrap_or_default();
        Ok(format!("weights@{tag}").into_bytes())
    }
}

/// Engine replaying a canned output buffer.
struct ReplayEngine {
    output: Vec<f32>,
}

impl InferenceEngine for ReplayEngine {
    fn input_name(&self) -> &str {
        "images"
    }

    fn output_name(&self) -> &str {
        "output0"
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
        assert_eq!(input.shape(), &[1, 3, 1280, 1280]);
        Ok(self.output.clone())
    }
}

fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("comics/bubble-detector", "detector.onnx")
}

fn cache(host: Arc<FakeHost>, blobs: Arc<dyn BlobCache>, tags: Arc<dyn TagStore>) -> ModelCache {
    ModelCache::new(host, blobs, tags, &InferenceConfig::default())
}

fn replay_detector(cache: ModelCache, output: Vec<f32>) -> Detector<ReplayEngine> {
    Detector::with_parts(
        descriptor(),
        InferenceConfig::default(),
        cache,
        Box::new(move |_, _| {
            Ok(ReplayEngine {
                output: output.clone(),
            })
        }),
    )
}

fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[test]
fn test_detect_restores_original_coordinates() {
    let host = FakeHost::new("abc123");
    let cache = cache(
        host,
        Arc::new(MemoryBlobCache::new()),
        Arc::new(MemoryTagStore::new()),
    );
    let detector = replay_detector(
        cache,
        vec![
            100.0, 200.0, 300.0, 400.0, 0.9, 1.0, //
            10.0, 10.0, 20.0, 20.0, 0.2, 0.0,
        ],
    );

    let detections = detector.detect(&encode_png(800, 600), 0.5).unwrap();

    assert_eq!(detections.len(), 1);
    let det = detections[0];
    assert!((det.x1 - 62.5).abs() < 1e-3);
    assert!((det.y1 - 25.0).abs() < 1e-3);
    assert!((det.x2 - 187.5).abs() < 1e-3);
    assert!((det.y2 - 150.0).abs() < 1e-3);
    assert_eq!(det.class_id, 1);
    assert!((det.confidence - 0.9).abs() < 1e-6);
}

#[test]
fn test_detect_accepts_base64_and_data_url() {
    let detector = replay_detector(
        cache(
            FakeHost::new("abc123"),
            Arc::new(MemoryBlobCache::new()),
            Arc::new(MemoryTagStore::new()),
        ),
        vec![0.0, 0.0, 1280.0, 1280.0, 0.8, 0.0],
    );
    let encoded = STANDARD.encode(encode_png(64, 64));

    let plain = detector.detect(&encoded, 0.5).unwrap();
    let data_url = detector
        .detect(format!("data:image/png;base64,{encoded}").as_str(), 0.5)
        .unwrap();

    assert_eq!(plain, data_url);
    assert_eq!(plain[0].xyxy(), [0.0, 0.0, 64.0, 64.0]);
}

#[test]
fn test_detect_default_uses_configured_threshold() {
    let detector = Detector::with_parts(
        descriptor(),
        InferenceConfig::new().with_min_confidence(0.95),
        cache(
            FakeHost::new("abc123"),
            Arc::new(MemoryBlobCache::new()),
            Arc::new(MemoryTagStore::new()),
        ),
        Box::new(|_, _| {
            Ok(ReplayEngine {
                output: vec![0.0, 0.0, 10.0, 10.0, 0.9, 0.0],
            })
        }),
    );

    assert!(detector.detect_default(&encode_png(32, 32)).unwrap().is_empty());
    assert_eq!(detector.detect(&encode_png(32, 32), 0.5).unwrap().len(), 1);
}

#[test]
fn test_model_refreshed_only_when_tag_changes() {
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobCache> = Arc::new(FsBlobCache::new(dir.path().join("blobs")));
    let tags: Arc<dyn TagStore> = Arc::new(FsTagStore::new(dir.path().join("tags")));
    let host = FakeHost::new("v1");
    let desc = descriptor();

    // Cold start downloads.
    let first = cache(host.clone(), blobs.clone(), tags.clone()).fetch(&desc).unwrap();
    assert_eq!(first.bytes, b"weights@v1");
    assert_eq!(host.gets(), 1);

    // Restart with the same tag reuses the cache.
    let second = cache(host.clone(), blobs.clone(), tags.clone()).fetch(&desc).unwrap();
    assert_eq!(second.bytes, b"weights@v1");
    assert_eq!(host.gets(), 1);

    // A new tag triggers exactly one download.
    host.publish("v2");
    let third = cache(host.clone(), blobs.clone(), tags.clone()).fetch(&desc).unwrap();
    assert_eq!(third.bytes, b"weights@v2");
    assert_eq!(third.remote_version_tag.as_deref(), Some("v2"));
    assert_eq!(host.gets(), 2);
    assert_eq!(tags.get(&desc.to_string()).unwrap().as_deref(), Some("v2"));

    // Offline restart still serves the cached copy.
    host.set_online(false);
    let offline = cache(host.clone(), blobs, tags).fetch(&desc).unwrap();
    assert_eq!(offline.bytes, b"weights@v2");
    assert_eq!(host.gets(), 2);
}

#[test]
fn test_offline_cold_start_is_unavailable() {
    let host = FakeHost::new("v1");
    host.set_online(false);
    let detector = replay_detector(
        cache(
            host,
            Arc::new(MemoryBlobCache::new()),
            Arc::new(MemoryTagStore::new()),
        ),
        Vec::new(),
    );

    let result = detector.detect(&encode_png(16, 16), 0.5);
    assert!(matches!(result, Err(InferenceError::ArtifactUnavailable(_))));
    assert!(!detector.is_loaded());
}

#[test]
fn test_engine_construction_failure_propagates() {
    let detector: Detector<ReplayEngine> = Detector::with_parts(
        descriptor(),
        InferenceConfig::default(),
        cache(
            FakeHost::new("v1"),
            Arc::new(MemoryBlobCache::new()),
            Arc::new(MemoryTagStore::new()),
        ),
        Box::new(|_, _| Err(InferenceError::EngineConstructionFailed("bad graph".into()))),
    );

    let result = detector.detect(&encode_png(16, 16), 0.5);
    assert!(matches!(result, Err(InferenceError::EngineConstructionFailed(_))));
}

/// Engine that parks inside `run` until released.
struct ParkedEngine {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl InferenceEngine for ParkedEngine {
    fn input_name(&self) -> &str {
        "images"
    }

    fn output_name(&self) -> &str {
        "output0"
    }

    fn run(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>> {
        self.entered.send(()).unwrap();
        self.release.recv().unwrap();
        Ok(vec![0.0, 0.0, 10.0, 10.0, 0.9, 0.0])
    }
}

#[test]
fn test_concurrent_detect_is_rejected_while_busy() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let parts = Mutex::new(Some((entered_tx, release_rx)));

    let detector = Arc::new(Detector::with_parts(
        descriptor(),
        InferenceConfig::default(),
        cache(
            FakeHost::new("v1"),
            Arc::new(MemoryBlobCache::new()),
            Arc::new(MemoryTagStore::new()),
        ),
        Box::new(move |_, _| {
            let (entered, release) = parts.lock().unwrap().take().unwrap();
            Ok(ParkedEngine { entered, release })
        }),
    ));
    let image = encode_png(32, 32);

    let worker = {
        let detector = detector.clone();
        let image = image.clone();
        std::thread::spawn(move || detector.detect(&image, 0.5))
    };
    entered_rx.recv().unwrap();

    let rejected = detector.detect(&image, 0.5);
    assert!(matches!(rejected, Err(InferenceError::Busy)));

    release_tx.send(()).unwrap();
    assert_eq!(worker.join().unwrap().unwrap().len(), 1);

    // The guard is free again; the next run is accepted.
    release_tx.send(()).unwrap();
    assert_eq!(detector.detect(&image, 0.5).unwrap().len(), 1);
    entered_rx.recv().unwrap();
}
