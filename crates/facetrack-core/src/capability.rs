//! Opaque capabilities the pipeline calls into.
//!
//! Face detection and embedding inference live outside this crate (ONNX,
//! TFLite, a platform vision framework...). The pipeline only relies on the
//! contracts below.

use crate::types::{Detection, Embedding, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Per-frame face detector. Called once per frame on the frame path.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, CapabilityError>;
}

/// Batch embedding extractor. Called at most once per recognition cycle,
/// on the recognizer thread.
///
/// Returns one entry per input face, positionally aligned; `None` marks a
/// face that could not be cropped or processed.
pub trait EmbeddingExtractor: Send + 'static {
    fn extract(
        &mut self,
        frame: &Frame,
        faces: &[Detection],
    ) -> Result<Vec<Option<Embedding>>, CapabilityError>;
}

impl<F> FaceDetector for F
where
    F: FnMut(&Frame) -> Result<Vec<Detection>, CapabilityError>,
{
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, CapabilityError> {
        self(frame)
    }
}
