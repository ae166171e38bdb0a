use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facetrack_core::{cosine_similarity, CoordinateMapper, Dimensions, ManualClock, Point, Size};
use facetrack_pipeline::config::read_embedding;
use facetrack_pipeline::replay::Session;
use facetrack_pipeline::{Config, FramePipeline};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facetrack", about = "facetrack face tracking and identity pipeline")]
struct Cli {
    /// TOML config file (FACETRACK_* environment variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a recorded session, printing one JSON line per frame
    Replay {
        /// JSON-lines session recording
        session: PathBuf,
        /// Reference embedding (overrides the configured path)
        #[arg(short, long)]
        reference: Option<PathBuf>,
        /// Display size, e.g. 1080x1920
        #[arg(long, value_parser = parse_dimensions)]
        view: Option<Dimensions>,
        /// Let recognition run asynchronously instead of settling each frame
        #[arg(long)]
        no_settle: bool,
    },
    /// Cosine similarity between two embedding files
    Similarity { a: PathBuf, b: PathBuf },
    /// Map a sensor-space point (and optional size) into display space
    Map {
        /// Sensor size, e.g. 1920x1080
        #[arg(long, value_parser = parse_dimensions)]
        frame: Dimensions,
        /// Display size, e.g. 1080x1920
        #[arg(long, value_parser = parse_dimensions)]
        view: Dimensions,
        #[arg(long)]
        x: f32,
        #[arg(long)]
        y: f32,
        #[arg(long)]
        width: Option<f32>,
        #[arg(long)]
        height: Option<f32>,
    },
    /// Print the effective configuration
    Config,
}

fn parse_dimensions(s: &str) -> Result<Dimensions, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width: f32 = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
    let height: f32 = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
    Ok(Dimensions::new(width, height))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            session,
            reference,
            view,
            no_settle,
        } => {
            if let Some(reference) = reference {
                config.reference_path = reference;
            }
            if let Some(view) = view {
                config.view_width = view.width;
                config.view_height = view.height;
            }
            replay(&config, &session, !no_settle)?;
        }
        Commands::Similarity { a, b } => {
            let a = read_embedding(&a)?;
            let b = read_embedding(&b)?;
            let similarity = cosine_similarity(&a.values, &b.values)?;
            println!("{similarity:.6}");
        }
        Commands::Map {
            frame,
            view,
            x,
            y,
            width,
            height,
        } => {
            let mapper = CoordinateMapper::new(frame, view)?;
            let point = mapper.adjust_point(Point::new(x, y));
            let mut out = serde_json::json!({ "position": point });
            if let (Some(width), Some(height)) = (width, height) {
                out["size"] = serde_json::to_value(mapper.adjust_size(Size::new(width, height)))?;
            }
            println!("{out}");
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn replay(config: &Config, path: &std::path::Path, settle: bool) -> Result<()> {
    let session = Session::load(path).with_context(|| format!("loading session {}", path.display()))?;
    let (detector, extractor) = session.capabilities();
    let clock = Arc::new(ManualClock::new(0));

    let mut pipeline = FramePipeline::from_config(config, detector, extractor, clock.clone())?;
    pipeline.set_wait_for_recognition(settle);

    tracing::info!(
        session = %path.display(),
        frames = session.frames().len(),
        settle,
        "replaying session"
    );

    let mut confirmed = 0usize;
    for recorded in session.frames() {
        clock.set(recorded.timestamp_ms);
        let output = pipeline.process_frame(recorded.to_frame());
        confirmed += output.confirmations.len();
        println!("{}", serde_json::to_string(&output)?);
    }

    let late = pipeline.settle();
    for event in &late {
        tracing::info!(tracking_id = event.tracking_id, similarity = event.similarity, "confirmed after last frame");
    }
    confirmed += late.len();

    tracing::info!(
        frames = session.frames().len(),
        confirmed,
        cycles = pipeline.scheduler().cycles(),
        "replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1080x1920").unwrap(), Dimensions::new(1080.0, 1920.0));
        assert_eq!(parse_dimensions("640X480").unwrap(), Dimensions::new(640.0, 480.0));
        assert!(parse_dimensions("1080").is_err());
        assert!(parse_dimensions("axb").is_err());
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "facetrack",
            "--config",
            "/etc/facetrack.toml",
            "replay",
            "session.jsonl",
            "--view",
            "720x1280",
            "--no-settle",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/facetrack.toml")));
        match cli.command {
            Commands::Replay { view, no_settle, reference, .. } => {
                assert_eq!(view, Some(Dimensions::new(720.0, 1280.0)));
                assert!(no_settle);
                assert!(reference.is_none());
            }
            _ => panic!("expected replay"),
        }
    }
}
