//! Object detection: inference engines, the detector, and its results.

mod backend;
pub mod backends;
mod detector;
mod result;

pub use backend::{InferenceEngine, RawDetections};
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use detector::{Detector, DEFAULT_MIN_SCORE};
pub use result::{BoundingBox, Detection, DetectionSet};
