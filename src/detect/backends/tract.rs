#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Tract-based backend for ONNX object detection.
///
/// Loads a local SSD-style model (outputs: normalized boxes, class ids,
/// scores) and performs inference on RGB frames. Score thresholding and
/// label filtering happen in the caller; this backend reports everything the
/// model emits above a floor that merely trims noise.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    width: u32,
    height: u32,
    score_floor: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            score_floor: 0.05,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;

        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode_outputs(
        &self,
        outputs: TVec<TValue>,
        width: u32,
        height: u32,
    ) -> Result<Vec<RawDetection>> {
        let boxes: Vec<f32> = tensor_values(&outputs, 0, "boxes")?;
        let classes: Vec<f32> = tensor_values(&outputs, 1, "classes")?;
        let scores: Vec<f32> = tensor_values(&outputs, 2, "scores")?;

        if boxes.len() != scores.len() * 4 || classes.len() != scores.len() {
            return Err(anyhow!(
                "inconsistent model outputs: {} box values, {} classes, {} scores",
                boxes.len(),
                classes.len(),
                scores.len()
            ));
        }

        let fw = width as f32;
        let fh = height as f32;
        let mut detections = Vec::new();
        for (i, &score) in scores.iter().enumerate() {
            if !score.is_finite() || score < self.score_floor {
                continue;
            }
            // SSD convention: [y_min, x_min, y_max, x_max], normalized
            let y_min = boxes[i * 4].clamp(0.0, 1.0);
            let x_min = boxes[i * 4 + 1].clamp(0.0, 1.0);
            let y_max = boxes[i * 4 + 2].clamp(0.0, 1.0);
            let x_max = boxes[i * 4 + 3].clamp(0.0, 1.0);
            if x_max <= x_min || y_max <= y_min {
                continue;
            }
            detections.push(RawDetection {
                label: coco_label(classes[i] as u32),
                score,
                x: x_min * fw,
                y: y_min * fh,
                w: (x_max - x_min) * fw,
                h: (y_max - y_min) * fh,
            });
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_outputs(outputs, width, height)
    }
}

fn tensor_values(outputs: &TVec<TValue>, index: usize, name: &str) -> Result<Vec<f32>> {
    let tensor = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model produced no '{}' output", name))?;
    let view = tensor
        .to_array_view::<f32>()
        .with_context(|| format!("model '{}' output tensor was not f32", name))?;
    Ok(view.iter().cloned().collect())
}

/// COCO class ids for the labels this pipeline cares about; everything else
/// keeps a `class:<id>` placeholder and is dropped by the label filter.
fn coco_label(class_id: u32) -> String {
    match class_id {
        44 => "bottle".to_string(),
        46 => "wine glass".to_string(),
        47 => "cup".to_string(),
        51 => "bowl".to_string(),
        other => format!("class:{}", other),
    }
}
