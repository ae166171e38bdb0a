use crate::pipeline::PipelineConfig;
use facetrack_core::confirmer::DEFAULT_THRESHOLD;
use facetrack_core::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL_MS};
use facetrack_core::{Dimensions, Embedding, SchedulerConfig, TrackingPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid reference embedding {path}: {source}")]
    Reference {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("reference embedding has {actual} dimensions, expected {expected}")]
    ReferenceDimension { expected: usize, actual: usize },
}

/// Pipeline configuration: defaults, then an optional TOML file, then
/// `FACETRACK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum faces per recognition batch.
    pub batch_size: usize,
    /// Cosine similarity a face must exceed to be confirmed.
    pub identity_threshold: f32,
    /// Minimum milliseconds between recognition cycles.
    pub recognition_interval_ms: i64,
    /// Expected embedding length.
    pub embedding_dim: usize,
    /// JSON file holding the reference embedding.
    pub reference_path: PathBuf,
    /// Per-frame fraction of the remaining distance a face moves toward its target.
    pub smoothing: f32,
    /// Per-frame fraction of the remaining confirmation animation covered.
    pub confirm_rate: f32,
    /// Frames a face may go undetected before it is dropped.
    pub grace_frames: u32,
    /// Display size faces are mapped into.
    pub view_width: f32,
    pub view_height: f32,
}

impl Default for Config {
    fn default() -> Self {
        let policy = TrackingPolicy::default();
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            identity_threshold: DEFAULT_THRESHOLD,
            recognition_interval_ms: DEFAULT_INTERVAL_MS,
            embedding_dim: 128,
            reference_path: default_data_dir().join("reference.json"),
            smoothing: policy.smoothing,
            confirm_rate: policy.confirm_rate,
            grace_frames: policy.grace_frames,
            view_width: 1080.0,
            view_height: 1920.0,
        }
    }
}

impl Config {
    /// Defaults overridden by `FACETRACK_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load `path` (if given) over the defaults, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        self.batch_size = env_usize("FACETRACK_BATCH_SIZE", self.batch_size);
        self.identity_threshold = env_f32("FACETRACK_IDENTITY_THRESHOLD", self.identity_threshold);
        self.recognition_interval_ms = env_i64("FACETRACK_RECOGNITION_INTERVAL_MS", self.recognition_interval_ms);
        self.embedding_dim = env_usize("FACETRACK_EMBEDDING_DIM", self.embedding_dim);
        if let Ok(path) = std::env::var("FACETRACK_REFERENCE_PATH") {
            self.reference_path = PathBuf::from(path);
        }
        self.smoothing = env_f32("FACETRACK_SMOOTHING", self.smoothing);
        self.confirm_rate = env_f32("FACETRACK_CONFIRM_RATE", self.confirm_rate);
        self.grace_frames = env_u32("FACETRACK_GRACE_FRAMES", self.grace_frames);
    }

    pub fn view(&self) -> Dimensions {
        Dimensions::new(self.view_width, self.view_height)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            scheduler: SchedulerConfig {
                batch_size: self.batch_size,
                interval_ms: self.recognition_interval_ms,
            },
            tracking: TrackingPolicy {
                smoothing: self.smoothing,
                confirm_rate: self.confirm_rate,
                grace_frames: self.grace_frames,
            },
            wait_for_recognition: false,
        }
    }

    /// Read the reference embedding and check its length.
    pub fn load_reference(&self) -> Result<Embedding, ConfigError> {
        let embedding = read_embedding(&self.reference_path)?;
        if embedding.dim() != self.embedding_dim {
            return Err(ConfigError::ReferenceDimension {
                expected: self.embedding_dim,
                actual: embedding.dim(),
            });
        }
        tracing::info!(
            path = %self.reference_path.display(),
            dim = embedding.dim(),
            "reference embedding loaded"
        );
        Ok(embedding)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Embedding files are either `{"values": [...]}` or a bare JSON array.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Full(Embedding),
    Bare(Vec<f32>),
}

/// Read an embedding JSON file.
pub fn read_embedding(path: &Path) -> Result<Embedding, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: EmbeddingFile = serde_json::from_str(&text).map_err(|source| ConfigError::Reference {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match file {
        EmbeddingFile::Full(embedding) => embedding,
        EmbeddingFile::Bare(values) => Embedding::new(values),
    })
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetrack")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facetrack-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch_size, 3);
        assert!((config.identity_threshold - 0.65).abs() < 1e-6);
        assert_eq!(config.recognition_interval_ms, 1000);
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.grace_frames, 0);
        assert!(config.reference_path.ends_with("facetrack/reference.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("batch_size = 5\ngrace_frames = 2\n").unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.grace_frames, 2);
        assert_eq!(config.recognition_interval_ms, 1000);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config {
            batch_size: 4,
            reference_path: PathBuf::from("/srv/ref.json"),
            ..Config::default()
        };
        let text = config.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_load_without_file_uses_env_layer() {
        assert_eq!(Config::load(None).unwrap(), Config::from_env());
    }

    #[test]
    fn test_load_file_over_defaults() {
        let path = scratch("facetrack.toml");
        std::fs::write(&path, "batch_size = 6
view_width = 720.0
").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.batch_size, 6);
        assert_eq!(config.view_width, 720.0);
        assert_eq!(config.view_height, 1920.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/facetrack.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_pipeline_config_mapping() {
        let config = Config {
            batch_size: 2,
            recognition_interval_ms: 250,
            smoothing: 0.5,
            ..Config::default()
        };
        let pc = config.pipeline_config();
        assert_eq!(pc.scheduler.batch_size, 2);
        assert_eq!(pc.scheduler.interval_ms, 250);
        assert_eq!(pc.tracking.smoothing, 0.5);
        assert!(!pc.wait_for_recognition);
    }

    #[test]
    fn test_load_reference_formats() {
        let bare = scratch("bare.json");
        std::fs::write(&bare, "[0.5, 0.5, 0.0]").unwrap();
        let full = scratch("full.json");
        std::fs::write(&full, r#"{"values": [1.0, 0.0, 0.0], "model_version": "facenet"}"#).unwrap();

        let config = Config {
            embedding_dim: 3,
            reference_path: bare,
            ..Config::default()
        };
        assert_eq!(config.load_reference().unwrap().values, vec![0.5, 0.5, 0.0]);

        let config = Config { reference_path: full, ..config };
        let reference = config.load_reference().unwrap();
        assert_eq!(reference.model_version.as_deref(), Some("facenet"));
    }

    #[test]
    fn test_load_reference_wrong_dimension() {
        let path = scratch("short.json");
        std::fs::write(&path, "[1.0, 2.0]").unwrap();
        let config = Config {
            reference_path: path,
            ..Config::default()
        };
        assert!(matches!(
            config.load_reference(),
            Err(ConfigError::ReferenceDimension { expected: 128, actual: 2 })
        ));
    }

    #[test]
    fn test_load_reference_malformed() {
        let path = scratch("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = Config {
            reference_path: path,
            ..Config::default()
        };
        assert!(matches!(config.load_reference(), Err(ConfigError::Reference { .. })));
    }
}
