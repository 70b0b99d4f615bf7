//! Geometry helpers shared by the detection filter and the zone classifier.
//!
//! Boxes are axis-aligned and expressed in frame pixel space (`BBox`).
//! Zone rectangles are expressed in normalized frame space (`NormRect`).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a center point and size (YOLO-style `cx, cy, w, h`).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area, or 0 when the box is degenerate.
    pub fn area(&self) -> f32 {
        let (w, h) = (self.width(), self.height());
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    pub fn has_positive_size(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clip(&self, width: u32, height: u32) -> BBox {
        let (w, h) = (width as f32, height as f32);
        BBox {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Rectangle in normalized `[0, 1]` frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormRect {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl NormRect {
    pub fn new(x_min: f32, x_max: f32, y_min: f32, y_max: f32) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Bounds must be ordered and inside the unit square.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if ![self.x_min, self.x_max, self.y_min, self.y_max]
            .into_iter()
            .all(in_unit)
        {
            return Err(anyhow!("zone rectangle bounds must lie in [0, 1]: {:?}", self));
        }
        if self.x_min >= self.x_max || self.y_min >= self.y_max {
            return Err(anyhow!(
                "zone rectangle requires x_min < x_max and y_min < y_max: {:?}",
                self
            ));
        }
        Ok(())
    }
}

/// Intersection over union of two boxes.
///
/// Returns 0 for disjoint boxes or when either box has non-positive area.
pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let area_a = a.area();
    let area_b = b.area();
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }

    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    if inter <= 0.0 {
        return 0.0;
    }

    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Box center divided by frame size. Fails on a zero-sized frame.
pub fn normalized_center(bbox: &BBox, frame_width: u32, frame_height: u32) -> Result<(f32, f32)> {
    if frame_width == 0 || frame_height == 0 {
        return Err(anyhow!(
            "cannot normalize against a {}x{} frame",
            frame_width,
            frame_height
        ));
    }
    let (cx, cy) = bbox.center();
    Ok((cx / frame_width as f32, cy / frame_height as f32))
}

/// Inclusive membership test on all four edges.
pub fn rect_contains(point: (f32, f32), rect: &NormRect) -> bool {
    let (x, y) = point;
    rect.x_min <= x && x <= rect.x_max && rect.y_min <= y && y <= rect.y_max
}
