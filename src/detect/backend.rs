use crate::error::Result;

/// Raw model outputs for one frame, before thresholding.
///
/// The three sequences are index-aligned. Boxes are normalized
/// `[ymin, xmin, ymax, xmax]` in `0..=1`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
    /// Detection count reported by the model. Not used for filtering.
    pub count: usize,
}

impl RawDetections {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// A loaded detection model.
///
/// Engines are loaded once and are read-only afterwards, so `infer` takes
/// `&self` and engines can be shared across threads without locking.
pub trait InferenceEngine: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Expected input `(width, height)` in pixels.
    fn input_size(&self) -> (u32, u32);

    /// Run the model on an RGB24 buffer of exactly `input_size()`.
    fn infer(&self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections>;
}
