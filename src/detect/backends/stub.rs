use crate::detect::backend::{InferenceEngine, RawDetections};
use crate::error::{DetectError, Result};

/// Engine that returns a fixed set of raw detections.
///
/// Used by tests and by the `stub` backend of the binaries. It still checks
/// the input shape like a real model would.
pub struct StubEngine {
    width: u32,
    height: u32,
    output: RawDetections,
}

impl StubEngine {
    /// An engine that never detects anything.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_output(width, height, RawDetections::default())
    }

    pub fn with_output(width: u32, height: u32, output: RawDetections) -> Self {
        Self {
            width,
            height,
            output,
        }
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections> {
        if (width, height) != (self.width, self.height) {
            return Err(DetectError::inference(format!(
                "frame size {}x{} does not match model input {}x{}",
                width, height, self.width, self.height
            )));
        }
        let expected = crate::frame::rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(DetectError::inference(format!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            )));
        }
        Ok(self.output.clone())
    }
}
