//! facetrack-core — Detection-to-identity building blocks.
//!
//! Maps sensor-space detections into display space, tracks faces across
//! frames with smoothed geometry, schedules rate-limited recognition over
//! the tracked set, and confirms identity against a fixed reference embedding.
//! Face detection and embedding extraction are consumed through the traits in
//! [`capability`].

pub mod capability;
pub mod confirmer;
pub mod crop;
pub mod geometry;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use capability::{CapabilityError, EmbeddingExtractor, FaceDetector};
pub use confirmer::{ConfirmerError, IdentityConfirmer, Verdict};
pub use geometry::{CoordinateMapper, Dimensions, GeometryError, Point, Size};
pub use scheduler::{Clock, ManualClock, RecognitionScheduler, SchedulerConfig, SystemClock};
pub use tracker::{FaceTracker, IdentityState, TrackedFace, TrackingPolicy};
pub use types::{cosine_similarity, Bounds, Detection, Embedding, Frame, SimilarityError, TrackingId};
