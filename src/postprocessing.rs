// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Post-processing for detector outputs.
//!
//! The detector emits a flat buffer of fixed-width records
//! `[x1, y1, x2, y2, confidence, class_id]` with non-maximum suppression
//! already applied inside the model. This module filters those records and
//! maps them back into the original image.

use crate::preprocessing::LetterboxResult;
use crate::results::{DetectionRecord, RestoredDetection};

/// Number of `f32` values per detection record.
pub const RECORD_WIDTH: usize = 6;

/// Parse the engine output into detection records.
///
/// The record count is `buffer.len() / 6`; a trailing partial record is
/// ignored. Records whose confidence is NaN or below `min_confidence` are
/// dropped, as are records whose class value is not a non-negative whole
/// number. Output order matches engine order.
#[must_use]
pub fn decode(buffer: &[f32], min_confidence: f32) -> Vec<DetectionRecord> {
    buffer
        .chunks_exact(RECORD_WIDTH)
        .filter(|record| {
            let confidence = record[4];
            !confidence.is_nan() && confidence >= min_confidence
        })
        .filter_map(|record| {
            Some(DetectionRecord {
                x1: record[0],
                y1: record[1],
                x2: record[2],
                y2: record[3],
                confidence: record[4],
                class_id: class_index(record[5])?,
            })
        })
        .collect()
}

/// Exact class index, or `None` for NaN, infinite, negative or fractional values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn class_index(value: f32) -> Option<usize> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0).then(|| value as usize)
}

/// Map a detection from letterboxed canvas space into original image space.
///
/// `x' = (x - pad_x) / gain`, `y' = (y - pad_y) / gain`. No clamping.
#[must_use]
pub fn restore(detection: &DetectionRecord, letterbox: &LetterboxResult) -> RestoredDetection {
    let (x1, y1) = letterbox.inverse(detection.x1, detection.y1);
    let (x2, y2) = letterbox.inverse(detection.x2, detection.y2);
    RestoredDetection {
        x1,
        y1,
        x2,
        y2,
        confidence: detection.confidence,
        class_id: detection.class_id,
    }
}

/// [`restore`] every detection, preserving order.
#[must_use]
pub fn restore_all(
    detections: &[DetectionRecord],
    letterbox: &LetterboxResult,
) -> Vec<RestoredDetection> {
    detections.iter().map(|d| restore(d, letterbox)).collect()
}
