// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Detection records.
//!
//! The engine emits [`DetectionRecord`]s in letterboxed canvas space; the
//! caller receives [`RestoredDetection`]s in original image space.

/// One detection in padded canvas pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRecord {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
    /// Detection confidence (0.0 - 1.0).
    pub confidence: f32,
    /// Class index as emitted by the model.
    pub class_id: usize,
}

/// One detection in original image pixel space.
///
/// Coordinates are not clamped: a box reaching into the letterbox padding
/// restores to coordinates outside the image. Use [`Self::clamped`] when the
/// box must stay on the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoredDetection {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
    /// Detection confidence (0.0 - 1.0).
    pub confidence: f32,
    /// Class index as emitted by the model.
    pub class_id: usize,
}

impl RestoredDetection {
    /// Corners as `[x1, y1, x2, y2]`.
    #[must_use]
    pub const fn xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Center, width and height as `[cx, cy, w, h]`.
    #[must_use]
    pub fn xywh(&self) -> [f32; 4] {
        [
            (self.x1 + self.x2) / 2.0,
            (self.y1 + self.y2) / 2.0,
            self.width(),
            self.height(),
        ]
    }

    /// Box width.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Box height.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Box area.
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Copy of this detection clipped to a `width × height` image.
    #[must_use]
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
            ..*self
        }
    }
}
