use serde::{Serialize, Serializer};

use crate::geometry::BBox;

/// Unfiltered detector output for a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawCandidate {
    /// Pixel-space box.
    pub bbox: BBox,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    pub class_id: u32,
}

impl RawCandidate {
    pub fn new(bbox: BBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Coarse 3D position of a detection relative to the vehicle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub zone: String,
}

/// Classified detection, ready for publishing.
///
/// Immutable once built by the zone classifier. `in_blind_spot` drives the
/// alert decision and is not part of the published payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(serialize_with = "serialize_bbox")]
    pub bbox: BBox,
    pub confidence: f32,
    pub object: String,
    pub class_id: u32,
    pub position: Position,
    pub camera_zone: String,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(skip)]
    pub in_blind_spot: bool,
}

fn serialize_bbox<S: Serializer>(bbox: &BBox, serializer: S) -> Result<S::Ok, S::Error> {
    bbox.to_array().serialize(serializer)
}
