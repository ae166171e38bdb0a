//! Face crop geometry and input normalisation for embedding extractors.
//!
//! Extractors crop each detected face out of the full frame, undo head roll,
//! resample to the model's square input and standardise the pixels. These
//! helpers hold the geometry and the arithmetic so extractor backends only
//! deal with pixel access. [`EmbeddingExtractor`](crate::capability::EmbeddingExtractor)
//! implementations call them per face before running their model.

use crate::geometry::Point;
use crate::types::Bounds;

/// Square input edge of FaceNet-style embedding models.
pub const FACENET_INPUT_SIZE: u32 = 160;

/// Four corners of a roll-corrected face crop, in bottom-left-origin image
/// coordinates (the convention of most GPU image pipelines).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropQuad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_left: Point,
    pub bottom_right: Point,
}

impl CropQuad {
    pub fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_left, self.bottom_right]
    }
}

/// Crop quad for a detection.
///
/// `bounds` use the detector's top-left origin; the quad is flipped into a
/// bottom-left origin using `frame_height`, then rotated by `roll_degrees`
/// around the box centre so the face comes out upright.
pub fn crop_quad(bounds: &Bounds, roll_degrees: f32, frame_height: f32) -> CropQuad {
    let x = bounds.left;
    let y = frame_height - (bounds.top + bounds.height);
    let (w, h) = (bounds.width, bounds.height);

    let cx = x + w / 2.0;
    let cy = y + h / 2.0;
    let (sin, cos) = roll_degrees.to_radians().sin_cos();
    let rotate = |px: f32, py: f32| {
        let (dx, dy) = (px - cx, py - cy);
        Point::new(cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
    };

    CropQuad {
        top_left: rotate(x, y + h),
        top_right: rotate(x + w, y + h),
        bottom_left: rotate(x, y),
        bottom_right: rotate(x + w, y),
    }
}

/// Resampling factor that brings the crop width to `input_size`.
///
/// Returns `None` for empty boxes.
pub fn crop_scale(bounds: &Bounds, input_size: u32) -> Option<f32> {
    if bounds.width > 0.0 && bounds.width.is_finite() {
        Some(input_size as f32 / bounds.width)
    } else {
        None
    }
}

/// Standardise pixels in place to zero mean and unit variance.
///
/// The deviation is floored at `1/sqrt(n)` so flat crops don't blow up.
pub fn prewhiten(pixels: &mut [f32]) {
    if pixels.is_empty() {
        return;
    }
    let n = pixels.len() as f32;
    let mean = pixels.iter().sum::<f32>() / n;
    let variance = pixels.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt());
    for p in pixels.iter_mut() {
        *p = (*p - mean) / std;
    }
}
