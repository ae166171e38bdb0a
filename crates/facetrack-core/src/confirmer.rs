//! Identity confirmation against a single reference embedding.

use crate::types::{Embedding, TrackingId};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.65;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfirmerError {
    #[error("reference embedding is empty")]
    EmptyReference,
    #[error("reference embedding has zero norm")]
    DegenerateReference,
    #[error("threshold must be finite and within [-1, 1], got {0}")]
    InvalidThreshold(f32),
}

/// Outcome of comparing one extracted embedding to the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub tracking_id: TrackingId,
    /// `None` when the embedding could not be compared.
    pub similarity: Option<f32>,
    pub confirmed: bool,
}

/// Compares embeddings to the reference vector with a fixed threshold.
///
/// Stateless: confirmation is recorded on the tracked face, and the face
/// tracker enforces that it never reverts.
#[derive(Debug, Clone)]
pub struct IdentityConfirmer {
    reference: Embedding,
    threshold: f32,
}

impl IdentityConfirmer {
    pub fn new(reference: Embedding, threshold: f32) -> Result<Self, ConfirmerError> {
        if reference.values.is_empty() {
            return Err(ConfirmerError::EmptyReference);
        }
        let norm = reference.norm();
        if norm <= 0.0 || !norm.is_finite() {
            return Err(ConfirmerError::DegenerateReference);
        }
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfirmerError::InvalidThreshold(threshold));
        }
        Ok(Self { reference, threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reference(&self) -> &Embedding {
        &self.reference
    }

    /// Compare `embedding` to the reference. Matches when similarity is
    /// strictly above the threshold; malformed embeddings never match.
    pub fn evaluate(&self, tracking_id: TrackingId, embedding: &Embedding) -> Verdict {
        match embedding.similarity(&self.reference) {
            Ok(similarity) => {
                let confirmed = similarity > self.threshold;
                tracing::debug!(tracking_id, similarity, confirmed, "identity evaluated");
                Verdict {
                    tracking_id,
                    similarity: Some(similarity),
                    confirmed,
                }
            }
            Err(err) => {
                tracing::warn!(tracking_id, error = %err, "embedding not comparable, treating as non-match");
                Verdict {
                    tracking_id,
                    similarity: None,
                    confirmed: false,
                }
            }
        }
    }
}
