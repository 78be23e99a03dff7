//! Object Watch
//!
//! Continuous object detection for a single camera. A background loop captures
//! still frames, runs a quantized detection model on them, and calls the
//! listeners registered for the labels it finds.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames handed from a source to the detector
//! - `ingest`: Frame sources (synthetic, still image, V4L2) with scoped acquisition
//! - `labels`: Class index to label resolution
//! - `detect`: Inference engines, `Detector`, `DetectionSet`
//! - `listeners`: Label to callback registry shared with the loop
//! - `watch`: `DetectionLoop` start/stop state machine
//! - `config`: File and environment configuration for the binaries

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod listeners;
pub mod watch;

pub use config::{BackendKind, ListenerConfig, WatchConfig};
pub use detect::{
    BoundingBox, Detection, DetectionSet, Detector, InferenceEngine, RawDetections, StubEngine,
    DEFAULT_MIN_SCORE,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractEngine;
pub use error::{DetectError, Result};
pub use frame::Frame;
#[cfg(feature = "ingest-image")]
pub use ingest::StillImageSource;
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use ingest::{open_source, FrameSource, SourceGuard, SourceStats, SyntheticSource};
pub use labels::LabelMap;
pub use listeners::{Callback, ListenerRegistry};
pub use watch::{CancelToken, DetectionLoop, LoopEvent, LoopSettings, LoopState, LoopStats};
