//! facetrack-pipeline — Per-frame orchestration.
//!
//! [`FramePipeline`] is the entry point a capture loop calls once per frame.
//! Detection and tracking run inline; recognition runs on a dedicated
//! thread so a slow extractor never stalls the frame path.

pub mod config;
pub mod pipeline;
pub mod replay;

pub use config::{Config, ConfigError};
pub use pipeline::{ConfirmationEvent, FaceView, FrameOutput, FramePipeline, PipelineConfig, PipelineError};
