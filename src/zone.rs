//! Zone classification.
//!
//! Maps a retained candidate to a normalized position relative to the vehicle
//! and decides whether it sits inside its camera's blind-spot rectangle.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use anyhow::{anyhow, Result};

use crate::detect::{Detection, Position, RawCandidate};
use crate::geometry::{normalized_center, rect_contains, NormRect};

pub const UNKNOWN_LABEL: &str = "unknown";

/// Zone ids are short lowercase slugs: `^[a-z0-9_-]{1,32}$`.
pub fn validate_zone_id(zone: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_-]{1,32}$").expect("zone id pattern is valid")
    });
    if !re.is_match(zone) {
        return Err(anyhow!(
            "zone id '{}' must match ^[a-z0-9_-]{{1,32}}$",
            zone
        ));
    }
    Ok(())
}

/// Static per-zone geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneRectangle {
    pub zone: String,
    pub rect: NormRect,
    /// Fixed lateral offset used as the detection's `z` coordinate.
    pub z_offset: f32,
}

#[derive(Clone, Debug)]
pub struct ZoneClassifier {
    zones: HashMap<String, ZoneRectangle>,
    labels: BTreeMap<u32, String>,
    scale_x: f32,
    scale_y: f32,
    default_z: f32,
}

impl ZoneClassifier {
    pub fn new(
        zones: impl IntoIterator<Item = ZoneRectangle>,
        labels: BTreeMap<u32, String>,
        scale_x: f32,
        scale_y: f32,
        default_z: f32,
    ) -> Self {
        Self {
            zones: zones.into_iter().map(|z| (z.zone.clone(), z)).collect(),
            labels,
            scale_x,
            scale_y,
            default_z,
        }
    }

    pub fn zone(&self, zone: &str) -> Option<&ZoneRectangle> {
        self.zones.get(zone)
    }

    pub fn label(&self, class_id: u32) -> &str {
        self.labels
            .get(&class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// Unknown zones are never in a blind spot.
    pub fn in_blind_spot(&self, center: (f32, f32), zone: &str) -> bool {
        self.zones
            .get(zone)
            .is_some_and(|z| rect_contains(center, &z.rect))
    }

    pub fn z_offset(&self, zone: &str) -> f32 {
        self.zones
            .get(zone)
            .map(|z| z.z_offset)
            .unwrap_or(self.default_z)
    }

    /// Build a `Detection` for a filtered candidate.
    ///
    /// Fails only when the frame has a zero dimension.
    pub fn classify(
        &self,
        candidate: &RawCandidate,
        frame_width: u32,
        frame_height: u32,
        zone: &str,
        timestamp: f64,
    ) -> Result<Detection> {
        let center = normalized_center(&candidate.bbox, frame_width, frame_height)?;
        let position = Position {
            x: center.0 * self.scale_x,
            y: center.1 * self.scale_y,
            z: self.z_offset(zone),
            zone: zone.to_string(),
        };

        Ok(Detection {
            bbox: candidate.bbox,
            confidence: candidate.confidence,
            object: self.label(candidate.class_id).to_string(),
            class_id: candidate.class_id,
            position,
            camera_zone: zone.to_string(),
            timestamp,
            in_blind_spot: self.in_blind_spot(center, zone),
        })
    }
}
