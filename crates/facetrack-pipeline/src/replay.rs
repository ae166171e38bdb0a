//! Recorded-session capabilities.
//!
//! A session file is JSON lines, one [`RecordedFrame`] per captured frame:
//! the detector output for that frame and, optionally, the embeddings the
//! extractor produced for some of its faces. Replaying a session drives the
//! pipeline exactly as a live capture would, without camera or models.

use facetrack_core::{CapabilityError, Detection, Embedding, EmbeddingExtractor, FaceDetector, Frame, TrackingId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read session {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// One line of a session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Embedding per tracking id; `null` records an extraction failure.
    #[serde(default)]
    pub embeddings: HashMap<TrackingId, Option<Vec<f32>>>,
}

impl RecordedFrame {
    /// Pixel-less frame carrying this record's metadata.
    pub fn to_frame(&self) -> Frame {
        Frame {
            data: Vec::new(),
            width: self.width,
            height: self.height,
            timestamp_ms: self.timestamp_ms,
            sequence: self.sequence,
        }
    }
}

/// A loaded session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    frames: Vec<RecordedFrame>,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(|err| match err {
            ReplayError::Io { source, .. } => ReplayError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse JSON lines. Blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
        let mut frames = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: PathBuf::new(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: RecordedFrame = serde_json::from_str(&line).map_err(|source| ReplayError::Parse {
                line: idx + 1,
                source,
            })?;
            frames.push(frame);
        }
        tracing::debug!(frames = frames.len(), "session parsed");
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    /// Detector and extractor that answer from this session.
    pub fn capabilities(&self) -> (ReplayDetector, ReplayExtractor) {
        let detections = self
            .frames
            .iter()
            .map(|f| (f.sequence, f.detections.clone()))
            .collect();
        let embeddings = self
            .frames
            .iter()
            .flat_map(|f| {
                f.embeddings
                    .iter()
                    .map(move |(id, values)| ((f.sequence, *id), values.clone()))
            })
            .collect();
        (
            ReplayDetector { detections },
            ReplayExtractor {
                embeddings: Arc::new(embeddings),
            },
        )
    }
}

/// Answers `detect` with the detections recorded for the frame's sequence.
pub struct ReplayDetector {
    detections: HashMap<u64, Vec<Detection>>,
}

impl FaceDetector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, CapabilityError> {
        self.detections
            .get(&frame.sequence)
            .cloned()
            .ok_or_else(|| CapabilityError::Unavailable(format!("no recording for frame {}", frame.sequence)))
    }
}

/// Answers `extract` with the embeddings recorded for the frame's sequence.
/// Faces without a recorded embedding come back as failures.
pub struct ReplayExtractor {
    embeddings: Arc<HashMap<(u64, TrackingId), Option<Vec<f32>>>>,
}

impl EmbeddingExtractor for ReplayExtractor {
    fn extract(
        &mut self,
        frame: &Frame,
        faces: &[Detection],
    ) -> Result<Vec<Option<Embedding>>, CapabilityError> {
        Ok(faces
            .iter()
            .map(|face| {
                self.embeddings
                    .get(&(frame.sequence, face.tracking_id))
                    .cloned()
                    .flatten()
                    .map(Embedding::new)
            })
            .collect())
    }
}
