//! detect_once - capture one frame and print what the model sees
//!
//! Like `watchd`, real models need the `backend-tract` feature.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use object_watch::{DetectionSet, WatchConfig, DEFAULT_MIN_SCORE};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "OBJECT_WATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Detect on this image instead of the configured camera.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Minimum score for a detection to be printed.
    #[arg(long, default_value_t = DEFAULT_MIN_SCORE)]
    min_score: f32,
    /// Print the detections as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.min_score) {
        anyhow::bail!("--min-score must be between 0 and 1");
    }
    let mut cfg = match &args.config {
        Some(path) => WatchConfig::load_from(path)?,
        None => WatchConfig::load()?,
    };
    if let Some(image) = &args.image {
        cfg.camera.device = image.display().to_string();
    }

    let detector = cfg.build_detector().context("failed to load detection model")?;
    let mut source = cfg.open_source().context("failed to set up camera")?;
    let frame = source
        .capture()
        .with_context(|| format!("failed to capture from {}", source.name()))?;
    let detections = detector.detect(&frame, args.min_score)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
    } else {
        print_table(&detections);
    }
    Ok(())
}

fn print_table(detections: &DetectionSet) {
    if detections.is_empty() {
        println!("no detections above {:.2}", detections.min_score());
        return;
    }
    for detection in detections {
        let b = detection.bbox;
        println!(
            "{:<16} {:.2}  [{:.0} {:.0} {:.0} {:.0}]",
            detection.label, detection.score, b.ymin, b.xmin, b.ymax, b.xmax
        );
    }
}
