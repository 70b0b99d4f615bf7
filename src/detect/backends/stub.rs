use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawCandidate;
use crate::frame::Frame;
use crate::geometry::BBox;

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_CLASS_ID: u32 = 2;
/// Sample every Nth pixel in both directions.
const SAMPLE_STEP: u32 = 2;

/// Stub backend for hardware-free runs.
///
/// Reports the bounding box of bright pixels as a single candidate. Paired with
/// the synthetic frame source, whose scenes contain one bright "vehicle" block,
/// this exercises the whole pipeline without a model.
pub struct StubBackend {
    luma_threshold: u8,
    class_id: u32,
}

impl StubBackend {
    pub fn new(class_id: u32) -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            class_id,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CLASS_ID)
    }
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawCandidate>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut bright = 0u32;
        for y in (0..frame.height).step_by(SAMPLE_STEP as usize) {
            for x in (0..frame.width).step_by(SAMPLE_STEP as usize) {
                if luma(frame.rgb_at(x, y)) < self.luma_threshold {
                    continue;
                }
                bright += 1;
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }

        let Some((x1, y1, x2, y2)) = bounds else {
            return Ok(Vec::new());
        };

        let bbox = BBox::new(
            x1 as f32,
            y1 as f32,
            (x2 + SAMPLE_STEP).min(frame.width) as f32,
            (y2 + SAMPLE_STEP).min(frame.height) as f32,
        );
        let sampled_area = (bbox.area() / (SAMPLE_STEP * SAMPLE_STEP) as f32).max(1.0);
        let fill = (bright as f32 / sampled_area).min(1.0);
        // A solid block scores close to 1, scattered highlights score low.
        let confidence = 0.5 + 0.5 * fill;

        Ok(vec![RawCandidate::new(bbox, confidence, self.class_id)])
    }
}
