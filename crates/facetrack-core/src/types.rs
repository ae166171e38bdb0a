use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detector-assigned face identifier. Opaque: may be reused, reordered or sparse.
pub type TrackingId = i64;

/// Face bounds in sensor space, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    /// Centre of the box in sensor space.
    pub fn center(&self) -> (f32, f32) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

/// One face reported by the detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub tracking_id: TrackingId,
    pub bounds: Bounds,
    /// Head roll in degrees.
    #[serde(default)]
    pub roll_angle: f32,
    #[serde(default)]
    pub pitch_angle: f32,
    #[serde(default)]
    pub yaw_angle: f32,
}

/// A captured camera frame handed to the detector and extractor.
///
/// Pixel layout is whatever the capabilities agree on; the pipeline itself
/// only reads the dimensions and timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in milliseconds.
    pub timestamp_ms: i64,
    pub sequence: u64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("embedding has zero norm")]
    DegenerateVector,
}

/// Face embedding vector (128-dimensional for FaceNet-style models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        cosine_similarity(&self.values, &other.values)
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Cosine similarity between two equal-length vectors.
///
/// Fails instead of dividing by zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return Err(SimilarityError::DegenerateVector);
    }

    // Rounding can push |cos| a hair past 1.
    Ok((dot / denom).clamp(-1.0, 1.0))
}
