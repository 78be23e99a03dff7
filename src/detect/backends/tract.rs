#![cfg(feature = "backend-tract")]

use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceEngine, RawDetections};
use crate::error::{DetectError, Result};

/// Tract-based engine for quantized SSD-style detection models.
///
/// The model takes one `u8 [1, H, W, 3]` image tensor and produces four
/// outputs in fixed order: boxes `[1, N, 4]`, classes `[1, N]`,
/// scores `[1, N]` and a detection count `[1]`.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    width: u32,
    height: u32,
}

impl TractEngine {
    /// Load a model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let resource = |what: &str, err: TractError| {
            DetectError::resource(format!("{} {}: {}", what, model_path.display(), err))
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| resource("failed to load model", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .map_err(|e| resource("failed to set input fact for", e))?
            .into_optimized()
            .map_err(|e| resource("failed to optimize", e))?
            .into_runnable()
            .map_err(|e| resource("failed to build runnable", e))?;

        log::info!(
            "TractEngine: loaded {} ({}x{})",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(DetectError::inference(format!(
                "frame size {}x{} does not match model input {}x{}",
                width, height, self.width, self.height
            )));
        }
        let expected_len = crate::frame::rgb_len(width, height)?;
        if pixels.len() != expected_len {
            return Err(DetectError::inference(format!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            )));
        }

        let input = tract_ndarray::Array4::from_shape_vec(
            (1, height as usize, width as usize, 3),
            pixels.to_vec(),
        )
        .map_err(|e| DetectError::inference(format!("failed to shape input tensor: {}", e)))?;
        Ok(input.into_tensor())
    }
}

fn output_f32(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>> {
    let output = outputs
        .get(index)
        .ok_or_else(|| DetectError::inference(format!("model produced no output {}", index)))?;
    let values = output
        .cast_to::<f32>()
        .map_err(|e| DetectError::inference(format!("output {} is not numeric: {}", index, e)))?;
    let view = values
        .to_array_view::<f32>()
        .map_err(|e| DetectError::inference(format!("output {} unreadable: {}", index, e)))?;
    Ok(view.iter().copied().collect())
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::inference(format!("inference failed: {}", e)))?;

        let flat_boxes = output_f32(&outputs, 0)?;
        let classes = output_f32(&outputs, 1)?;
        let scores = output_f32(&outputs, 2)?;
        let count = output_f32(&outputs, 3)?
            .first()
            .map(|c| c.max(0.0) as usize)
            .unwrap_or(0);

        if flat_boxes.len() % 4 != 0
            || flat_boxes.len() / 4 != classes.len()
            || classes.len() != scores.len()
        {
            return Err(DetectError::inference(format!(
                "inconsistent output lengths: {} box values, {} classes, {} scores",
                flat_boxes.len(),
                classes.len(),
                scores.len()
            )));
        }

        let boxes = flat_boxes
            .chunks_exact(4)
            .map(|b| [b[0], b[1], b[2], b[3]])
            .collect();

        Ok(RawDetections {
            boxes,
            classes,
            scores,
            count,
        })
    }
}
