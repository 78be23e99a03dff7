use std::sync::Arc;

use crate::detect::backend::InferenceEngine;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::error::{DetectError, Result};
use crate::frame::Frame;
use crate::labels::LabelMap;

/// Threshold used by the detection loop and the one-shot tools.
pub const DEFAULT_MIN_SCORE: f32 = 0.2;

/// Runs one detection pass: infer, rescale, threshold, resolve labels.
///
/// Both collaborators are immutable after load, so a `Detector` is cheap to
/// clone and safe to share between the controller and the loop.
#[derive(Clone)]
pub struct Detector {
    engine: Arc<dyn InferenceEngine>,
    labels: Arc<LabelMap>,
}

impl Detector {
    pub fn new(engine: Arc<dyn InferenceEngine>, labels: Arc<LabelMap>) -> Self {
        Self { engine, labels }
    }

    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Detect objects in `frame`, keeping detections with `score > min_score`.
    pub fn detect(&self, frame: &Frame, min_score: f32) -> Result<DetectionSet> {
        let (width, height) = frame.dimensions();
        let expected = self.engine.input_size();
        if (width, height) != expected {
            return Err(DetectError::inference(format!(
                "frame size {}x{} does not match model input {}x{}",
                width, height, expected.0, expected.1
            )));
        }

        let raw = self.engine.infer(frame.pixels(), width, height)?;
        if raw.classes.len() != raw.boxes.len() || raw.scores.len() != raw.boxes.len() {
            return Err(DetectError::inference(format!(
                "{} engine returned misaligned outputs ({} boxes, {} classes, {} scores)",
                self.engine.name(),
                raw.boxes.len(),
                raw.classes.len(),
                raw.scores.len()
            )));
        }

        let mut detections = Vec::new();
        for ((bbox, class), score) in raw.boxes.iter().zip(&raw.classes).zip(&raw.scores) {
            if score.is_nan() || *score <= min_score {
                continue;
            }
            let label = self.labels.resolve(*class)?;
            detections.push(Detection {
                bbox: BoundingBox::from_normalized(*bbox, width, height),
                label: label.to_string(),
                score: *score,
            });
        }

        log::debug!(
            "Detector: {} of {} raw detections above {:.2}",
            detections.len(),
            raw.len(),
            min_score
        );
        Ok(DetectionSet::new(detections, min_score))
    }
}
