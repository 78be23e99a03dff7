use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{Detector, InferenceEngine, StubEngine, DEFAULT_MIN_SCORE};
use crate::error::DetectError;
use crate::ingest::FrameSource;
use crate::labels::LabelMap;
use crate::watch::LoopSettings;

const DEFAULT_MODEL_PATH: &str = "model.onnx";
const DEFAULT_LABELS_PATH: &str = "labelmap.txt";
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_INPUT_SIZE: u32 = 320;
const DEFAULT_POLL_INTERVAL_MS: u64 = 0;

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    backend: Option<String>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    listeners: Option<Vec<ListenerConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_score: Option<f32>,
    poll_interval_ms: Option<u64>,
}

/// Inference backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Real model through tract (feature `backend-tract`).
    Tract,
    /// Fixed empty output; for dry runs without a model.
    Stub,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!(
                "unknown backend '{}'; expected 'tract' or 'stub'",
                other
            )),
        }
    }
}

/// A label to watch for. Without a command, hits are only logged.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    pub label: String,
    /// Program and arguments run on every hit.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub backend: BackendKind,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_score: f32,
    pub poll_interval: Duration,
}

impl WatchConfig {
    /// Load from `OBJECT_WATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OBJECT_WATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Result<Self> {
        let backend = match file.backend.as_deref() {
            Some(value) => BackendKind::parse(value)?,
            None => BackendKind::parse(DEFAULT_BACKEND)?,
        };
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_INPUT_SIZE),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_INPUT_SIZE),
        };
        let detection = DetectionSettings {
            min_score: file
                .detection
                .as_ref()
                .and_then(|detection| detection.min_score)
                .unwrap_or(DEFAULT_MIN_SCORE),
            poll_interval: Duration::from_millis(
                file.detection
                    .and_then(|detection| detection.poll_interval_ms)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        };
        Ok(Self {
            model_path: file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels_path: file
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            backend,
            camera,
            detection,
            listeners: file.listeners.unwrap_or_default(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("OBJECT_WATCH_MODEL") {
            if !path.trim().is_empty() {
                self.model_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("OBJECT_WATCH_LABELS") {
            if !path.trim().is_empty() {
                self.labels_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("OBJECT_WATCH_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(device) = std::env::var("OBJECT_WATCH_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(score) = std::env::var("OBJECT_WATCH_MIN_SCORE") {
            self.detection.min_score = score
                .trim()
                .parse()
                .map_err(|_| anyhow!("OBJECT_WATCH_MIN_SCORE must be a number between 0 and 1"))?;
        }
        if let Ok(interval) = std::env::var("OBJECT_WATCH_POLL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("OBJECT_WATCH_POLL_MS must be an integer number of milliseconds")
            })?;
            self.detection.poll_interval = Duration::from_millis(millis);
        }
        if let Ok(labels) = std::env::var("OBJECT_WATCH_LISTEN") {
            for label in split_csv(&labels) {
                if !self.listeners.iter().any(|l| l.label == label) {
                    self.listeners.push(ListenerConfig {
                        label,
                        command: None,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.min_score) {
            return Err(anyhow!(
                "min_score must be between 0 and 1, got {}",
                self.detection.min_score
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        for listener in &self.listeners {
            if listener.label.trim().is_empty() {
                return Err(anyhow!("listener labels must not be empty"));
            }
            if listener.command.as_ref().is_some_and(|cmd| cmd.is_empty()) {
                return Err(anyhow!(
                    "listener '{}' has an empty command",
                    listener.label
                ));
            }
        }
        Ok(())
    }
}

impl WatchConfig {
    /// Load the label table and model. Failures here abort startup.
    pub fn build_detector(&self) -> std::result::Result<Detector, DetectError> {
        let labels = Arc::new(LabelMap::load(&self.labels_path)?);
        let engine: Arc<dyn InferenceEngine> = match self.backend {
            BackendKind::Stub => {
                log::warn!("using stub inference backend; nothing will be detected");
                Arc::new(StubEngine::new(self.camera.width, self.camera.height))
            }
            #[cfg(feature = "backend-tract")]
            BackendKind::Tract => Arc::new(crate::detect::TractEngine::load(
                &self.model_path,
                self.camera.width,
                self.camera.height,
            )?),
            #[cfg(not(feature = "backend-tract"))]
            BackendKind::Tract => {
                return Err(DetectError::resource(format!(
                    "cannot load {}: built without the backend-tract feature \
                     (rebuild with --features backend-tract, or set backend to stub)",
                    self.model_path.display()
                )))
            }
        };
        Ok(Detector::new(engine, labels))
    }

    pub fn open_source(&self) -> std::result::Result<Box<dyn FrameSource>, DetectError> {
        crate::ingest::open_source(&self.camera.device, self.camera.width, self.camera.height)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            min_score: self.detection.min_score,
            poll_interval: self.detection.poll_interval,
        }
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pi_setup() -> Result<()> {
        let cfg = WatchConfig::from_file(WatchConfigFile::default())?;
        assert_eq!(cfg.model_path, PathBuf::from("model.onnx"));
        assert_eq!(cfg.labels_path, PathBuf::from("labelmap.txt"));
        assert_eq!(cfg.backend, BackendKind::Tract);
        assert_eq!((cfg.camera.width, cfg.camera.height), (320, 320));
        assert_eq!(cfg.detection.min_score, 0.2);
        assert!(cfg.detection.poll_interval.is_zero());
        assert!(cfg.listeners.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(BackendKind::parse("tflite").is_err());
        assert_eq!(BackendKind::parse(" Stub ").unwrap(), BackendKind::Stub);
    }

    #[test]
    fn validate_rejects_out_of_range_scores() -> Result<()> {
        let mut cfg = WatchConfig::from_file(WatchConfigFile::default())?;
        cfg.detection.min_score = 1.5;
        assert!(cfg.validate().is_err());
        cfg.detection.min_score = 0.0;
        assert!(cfg.validate().is_ok());
        Ok(())
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv("person, ,dog,"), vec!["person", "dog"]);
    }
}
