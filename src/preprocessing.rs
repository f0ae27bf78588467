// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Image preprocessing for detection.
//!
//! This module decodes caller images, letterboxes them into the model's
//! square input canvas, and converts the canvas into a normalized planar
//! NCHW tensor.

#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use rayon::prelude::*;

use crate::error::{InferenceError, Result};

/// Letterbox padding color the detector was trained with. Must match exactly.
pub const LETTERBOX_COLOR: [u8; 3] = [114, 114, 114];

/// RGBA form of [`LETTERBOX_COLOR`].
const LETTERBOX_RGBA: [u8; 4] = [114, 114, 114, 255];

/// An image as the caller hands it over.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// Encoded image file bytes (JPEG, PNG, WebP, ...).
    Encoded(&'a [u8]),
    /// Base64 text, optionally wrapped in a `data:image/...;base64,` URL.
    Base64(&'a str),
}

impl<'a> From<&'a [u8]> for ImageSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Encoded(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for ImageSource<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Encoded(bytes)
    }
}

impl<'a> From<&'a str> for ImageSource<'a> {
    fn from(text: &'a str) -> Self {
        Self::Base64(text)
    }
}

impl<'a> From<&'a String> for ImageSource<'a> {
    fn from(text: &'a String) -> Self {
        Self::Base64(text)
    }
}

/// Decode an [`ImageSource`] into pixels.
///
/// # Errors
///
/// Returns `MalformedInput` for invalid base64, a non-base64 data URL, or
/// bytes no image decoder accepts.
pub fn decode_image(source: ImageSource<'_>) -> Result<DynamicImage> {
    match source {
        ImageSource::Encoded(bytes) => Ok(image::load_from_memory(bytes)?),
        ImageSource::Base64(text) => {
            let bytes = decode_base64_payload(text)?;
            Ok(image::load_from_memory(&bytes)?)
        }
    }
}

/// Strip an optional data URL header and decode the base64 body.
fn decode_base64_payload(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    let payload = match text.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest.split_once(',').ok_or_else(|| {
                InferenceError::MalformedInput("data URL without payload".to_string())
            })?;
            if !header.ends_with(";base64") {
                return Err(InferenceError::MalformedInput(format!(
                    "unsupported data URL encoding: {header}"
                )));
            }
            body
        }
        None => text,
    };

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| InferenceError::MalformedInput(format!("invalid base64 image: {e}")))
}

/// A letterboxed canvas and the geometry needed to undo it.
#[derive(Debug, Clone)]
pub struct LetterboxResult {
    /// `target_size × target_size` RGBA pixels, row-major, top-left origin.
    pub padded_pixels: Vec<u8>,
    /// Side length of the square canvas.
    pub target_size: u32,
    /// Source image width.
    pub original_width: u32,
    /// Source image height.
    pub original_height: u32,
    /// Scale applied to the source, `min(T / width, T / height)`.
    pub gain: f32,
    /// Left offset of the scaled image inside the canvas.
    pub pad_x: f32,
    /// Top offset of the scaled image inside the canvas.
    pub pad_y: f32,
    /// Width of the scaled image inside the canvas.
    pub scaled_width: u32,
    /// Height of the scaled image inside the canvas.
    pub scaled_height: u32,
}

impl LetterboxResult {
    /// Map a point from original image space into canvas space.
    #[must_use]
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.gain + self.pad_x, y * self.gain + self.pad_y)
    }

    /// Map a point from canvas space back into original image space.
    #[must_use]
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.gain, (y - self.pad_y) / self.gain)
    }

    /// Whether a canvas pixel lies inside the scaled source region.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (left, top) = (self.pad_x as u32, self.pad_y as u32);
        (left..left + self.scaled_width).contains(&x) && (top..top + self.scaled_height).contains(&y)
    }
}

/// Letterbox geometry for a `width × height` source in a `target` canvas.
///
/// Scaled sizes are rounded to the nearest pixel; pad offsets are truncated
/// to whole pixels so the recorded offsets are exactly where pixels land.
///
/// Each scaled side is clamped to at least one pixel. At extreme aspect
/// ratios (10000x1 into 64) the short side is then drawn larger than
/// `side * gain`. Restoration still divides by the single `gain`, so boxes on
/// that axis come back in the model's geometric frame, not the stretched
/// pixel row. Such images carry no usable content on the short axis.
///
/// Returns `(gain, scaled_width, scaled_height, pad_x, pad_y)`.
#[must_use]
pub fn letterbox_geometry(width: u32, height: u32, target: u32) -> (f32, u32, u32, u32, u32) {
    let t = target as f32;
    let gain = (t / width as f32).min(t / height as f32);

    let scaled_w = ((width as f32 * gain).round() as u32).clamp(1, target);
    let scaled_h = ((height as f32 * gain).round() as u32).clamp(1, target);

    let pad_x = (target - scaled_w) / 2;
    let pad_y = (target - scaled_h) / 2;

    (gain, scaled_w, scaled_h, pad_x, pad_y)
}

/// Resize and pad `image` into a `target_size` square canvas.
///
/// The canvas is filled with [`LETTERBOX_COLOR`], then the aspect-preserving
/// resize of the source is composited on top, centered.
///
/// # Errors
///
/// Returns `MalformedInput` for a zero target size or an empty image.
pub fn letterbox(image: &DynamicImage, target_size: u32) -> Result<LetterboxResult> {
    let (width, height) = image.dimensions();
    if target_size == 0 {
        return Err(InferenceError::MalformedInput(
            "letterbox target size must be positive".to_string(),
        ));
    }
    if width == 0 || height == 0 {
        return Err(InferenceError::MalformedInput(format!(
            "image has zero dimension: {width}x{height}"
        )));
    }

    let (gain, scaled_w, scaled_h, pad_x, pad_y) = letterbox_geometry(width, height, target_size);

    let rgba = image.to_rgba8().into_raw();
    let resized = if (scaled_w, scaled_h) == (width, height) {
        rgba
    } else {
        resize_rgba(rgba, (width, height), (scaled_w, scaled_h))?
    };

    let side = target_size as usize;
    let mut canvas = vec![0u8; side * side * 4];
    for px in canvas.chunks_exact_mut(4) {
        px.copy_from_slice(&LETTERBOX_RGBA);
    }

    let row_bytes = scaled_w as usize * 4;
    for (row, src_row) in resized.chunks_exact(row_bytes).enumerate() {
        let start = ((pad_y as usize + row) * side + pad_x as usize) * 4;
        let dst_row = &mut canvas[start..start + row_bytes];
        for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            composite_over(dst, src);
        }
    }

    Ok(LetterboxResult {
        padded_pixels: canvas,
        target_size,
        original_width: width,
        original_height: height,
        gain,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        scaled_width: scaled_w,
        scaled_height: scaled_h,
    })
}

/// Bilinear resize of a tightly packed RGBA buffer.
fn resize_rgba(src: Vec<u8>, from: (u32, u32), to: (u32, u32)) -> Result<Vec<u8>> {
    let src_image = Image::from_vec_u8(from.0, from.1, src, PixelType::U8x4)
        .map_err(|e| InferenceError::MalformedInput(format!("invalid source buffer: {e}")))?;
    let mut dst_image = Image::new(to.0, to.1, PixelType::U8x4);

    let options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
    Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| InferenceError::MalformedInput(format!("resize failed: {e}")))?;

    Ok(dst_image.into_vec())
}

/// Source-over compositing of one RGBA pixel onto an opaque canvas pixel.
fn composite_over(dst: &mut [u8], src: &[u8]) {
    match src[3] {
        255 => dst[..3].copy_from_slice(&src[..3]),
        0 => {}
        alpha => {
            let a = u32::from(alpha);
            for c in 0..3 {
                let blended = u32::from(src[c]) * a + u32::from(dst[c]) * (255 - a);
                dst[c] = ((blended + 127) / 255) as u8;
            }
        }
    }
    dst[3] = 255;
}

/// Convert an RGBA canvas into a `[1, 3, size, size]` tensor with values in
/// `[0, 1]`. Plane 0 is red, 1 green, 2 blue; alpha is dropped.
///
/// # Errors
///
/// Returns `MalformedInput` if `pixels` is not exactly `size * size * 4` bytes.
pub fn build_tensor(pixels: &[u8], size: u32) -> Result<Array4<f32>> {
    let side = size as usize;
    let plane = side * side;
    if pixels.len() != plane * 4 {
        return Err(InferenceError::MalformedInput(format!(
            "expected {} RGBA bytes for a {size}x{size} canvas, got {}",
            plane * 4,
            pixels.len()
        )));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    let data = tensor
        .as_slice_mut()
        .ok_or_else(|| InferenceError::InferenceError("tensor is not contiguous".to_string()))?;
    let (r_plane, rest) = data.split_at_mut(plane);
    let (g_plane, b_plane) = rest.split_at_mut(plane);

    r_plane
        .par_iter_mut()
        .zip(g_plane.par_iter_mut())
        .zip(b_plane.par_iter_mut())
        .zip(pixels.par_chunks_exact(4))
        .for_each(|(((r, g), b), px)| {
            *r = f32::from(px[0]) / 255.0;
            *g = f32::from(px[1]) / 255.0;
            *b = f32::from(px[2]) / 255.0;
        });

    Ok(tensor)
}
