#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawCandidate;
use crate::frame::Frame;
use crate::geometry::BBox;

/// Scores below this are discarded during decoding, before the pipeline's own gate.
const DECODE_FLOOR: f32 = 0.05;

/// Tract-based backend for YOLO-family ONNX models.
///
/// Supports the two common output layouts:
/// - `[1, 4 + C, N]`: raw YOLOv8 heads (`cx, cy, w, h` then per-class scores)
/// - `[1, N, 6]`: end-to-end exports (`x, y, w, h, score, class`), as YOLOv10
///
/// Frames are resampled to the model input size with nearest-neighbour sampling
/// and boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.is_empty() {
            return Err(anyhow!(
                "frame {}x{} carries no usable pixels",
                frame.width,
                frame.height
            ));
        }

        let (in_w, in_h) = (self.input_width as usize, self.input_height as usize);
        let sx = frame.width as f32 / in_w as f32;
        let sy = frame.height as f32 / in_h as f32;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, in_h, in_w), |(_, channel, y, x)| {
            let fx = ((x as f32 * sx) as u32).min(frame.width - 1);
            let fy = ((y as f32 * sy) as u32).min(frame.height - 1);
            frame.rgb_at(fx, fy)[channel] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawCandidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unsupported model output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        let scale_x = frame.width as f32 / self.input_width as f32;
        let scale_y = frame.height as f32 / self.input_height as f32;
        let to_frame = |cx: f32, cy: f32, w: f32, h: f32| {
            BBox::from_center(cx * scale_x, cy * scale_y, w * scale_x, h * scale_y)
        };

        let mut candidates = Vec::new();
        if shape[2] == 6 {
            // [1, N, 6]
            for i in 0..shape[1] {
                let score = view[[0, i, 4]];
                if score < DECODE_FLOOR {
                    continue;
                }
                let bbox = to_frame(
                    view[[0, i, 0]],
                    view[[0, i, 1]],
                    view[[0, i, 2]],
                    view[[0, i, 3]],
                );
                let class_id = view[[0, i, 5]].max(0.0) as u32;
                candidates.push(RawCandidate::new(bbox, score, class_id));
            }
        } else if shape[1] > 4 {
            // [1, 4 + C, N]
            let classes = shape[1] - 4;
            for i in 0..shape[2] {
                let (class_id, score) = (0..classes)
                    .map(|c| (c, view[[0, 4 + c, i]]))
                    .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                        if cur.1 > best.1 {
                            cur
                        } else {
                            best
                        }
                    });
                if !score.is_finite() || score < DECODE_FLOOR {
                    continue;
                }
                let bbox = to_frame(
                    view[[0, 0, i]],
                    view[[0, 1, i]],
                    view[[0, 2, i]],
                    view[[0, 3, i]],
                );
                candidates.push(RawCandidate::new(bbox, score, class_id as u32));
            }
        } else {
            return Err(anyhow!("unsupported model output shape {:?}", shape));
        }

        Ok(candidates)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawCandidate>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; (self.input_width * self.input_height * 3) as usize],
            self.input_width,
            self.input_height,
        );
        self.detect(&blank).map(|_| ())
    }
}
