//! Candidate reduction: gating, non-maximum suppression and capping.
//!
//! The filter is pure. Given the same candidates and settings it always returns
//! the same ordered output, which is what makes top-K selection reproducible.

use std::collections::BTreeSet;

use crate::detect::result::RawCandidate;
use crate::geometry::iou;

pub const DEFAULT_MIN_AREA: f32 = 10_000.0;
pub const DEFAULT_MAX_RESULTS: usize = 1;

#[derive(Clone, Debug)]
pub struct FilterSettings {
    pub confidence_threshold: f32,
    pub allowed_classes: BTreeSet<u32>,
    /// Same-class candidates overlapping an accepted one above this IoU are suppressed.
    pub iou_threshold: f32,
    /// Maximum detections kept per camera per cycle.
    pub max_results: usize,
    /// Minimum box area in px² after clipping to the frame.
    pub min_area: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            allowed_classes: [0, 2, 3].into_iter().collect(),
            iou_threshold: 0.5,
            max_results: DEFAULT_MAX_RESULTS,
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectionFilter {
    settings: FilterSettings,
}

impl DetectionFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self { settings }
    }

    /// Reduce raw candidates for one frame to a deduplicated, ranked, capped list.
    ///
    /// Retained candidates carry boxes clipped to the frame.
    pub fn apply(
        &self,
        candidates: &[RawCandidate],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<RawCandidate> {
        let s = &self.settings;

        let mut ranked: Vec<RawCandidate> = candidates
            .iter()
            .filter(|c| c.confidence >= s.confidence_threshold)
            .filter(|c| s.allowed_classes.contains(&c.class_id))
            .filter(|c| c.bbox.has_positive_size())
            .filter_map(|c| {
                let clipped = c.bbox.clip(frame_width, frame_height);
                if !clipped.has_positive_size() || clipped.area() < s.min_area {
                    return None;
                }
                Some(RawCandidate {
                    bbox: clipped,
                    ..*c
                })
            })
            .collect();

        // `sort_by` is stable: equal scores keep discovery order.
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut accepted: Vec<RawCandidate> = Vec::with_capacity(s.max_results.min(ranked.len()));
        for cand in ranked {
            if accepted.len() >= s.max_results {
                break;
            }
            let suppressed = accepted.iter().any(|kept| {
                kept.class_id == cand.class_id && iou(&kept.bbox, &cand.bbox) > s.iou_threshold
            });
            if !suppressed {
                accepted.push(cand);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> RawCandidate {
        RawCandidate::new(BBox::new(x1, y1, x2, y2), confidence, class_id)
    }

    fn filter(max_results: usize) -> DetectionFilter {
        DetectionFilter::new(FilterSettings {
            confidence_threshold: 0.25,
            allowed_classes: [0, 2, 3].into_iter().collect(),
            iou_threshold: 0.5,
            max_results,
            min_area: 100.0,
        })
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(filter(1).apply(&[], 640, 480).is_empty());
    }

    #[test]
    fn overlapping_same_class_keeps_highest() {
        let input = [
            cand(0.0, 0.0, 100.0, 100.0, 0.9, 0),
            cand(5.0, 5.0, 105.0, 105.0, 0.8, 0),
        ];
        let out = filter(5).apply(&input, 640, 480);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn different_classes_survive_suppression_but_cap_applies() {
        let input = [
            cand(0.0, 0.0, 100.0, 100.0, 0.8, 2),
            cand(0.0, 0.0, 100.0, 100.0, 0.9, 0),
        ];
        let uncapped = filter(5).apply(&input, 640, 480);
        assert_eq!(uncapped.len(), 2);
        assert_eq!(uncapped[0].class_id, 0);
        assert_eq!(uncapped[1].class_id, 2);

        let capped = filter(1).apply(&input, 640, 480);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].confidence, 0.9);
    }

    #[test]
    fn gates_drop_low_confidence_unknown_class_and_small_boxes() {
        let input = [
            cand(0.0, 0.0, 100.0, 100.0, 0.1, 0),
            cand(0.0, 0.0, 100.0, 100.0, 0.9, 7),
            cand(0.0, 0.0, 5.0, 5.0, 0.9, 0),
            cand(50.0, 50.0, 40.0, 90.0, 0.9, 0),
        ];
        assert!(filter(5).apply(&input, 640, 480).is_empty());
    }

    #[test]
    fn min_area_is_measured_after_clipping() {
        let f = DetectionFilter::new(FilterSettings {
            min_area: 1000.0,
            ..filter(1).settings
        });
        // 80x20 = 1600 raw, but only 20x20 = 400 lies inside the frame.
        let input = [cand(620.0, 0.0, 700.0, 20.0, 0.9, 2)];
        assert!(f.apply(&input, 640, 480).is_empty());

        // 60x20 = 1200 after clipping clears the floor.
        let out = f.apply(&[cand(580.0, 0.0, 700.0, 20.0, 0.9, 2)], 640, 480);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BBox::new(580.0, 0.0, 640.0, 20.0));
    }

    #[test]
    fn ties_keep_discovery_order() {
        let input = [
            cand(0.0, 0.0, 50.0, 50.0, 0.7, 0),
            cand(300.0, 300.0, 350.0, 350.0, 0.7, 2),
            cand(100.0, 100.0, 150.0, 150.0, 0.7, 3),
        ];
        let out = filter(3).apply(&input, 640, 480);
        let classes: Vec<u32> = out.iter().map(|c| c.class_id).collect();
        assert_eq!(classes, vec![0, 2, 3]);
    }

    #[test]
    fn output_never_exceeds_cap_and_is_idempotent() {
        let mut input = Vec::new();
        for i in 0..40u32 {
            let off = (i * 37 % 500) as f32;
            let confidence = 0.3 + (i % 7) as f32 * 0.1;
            let class_id = [0, 2, 3][(i % 3) as usize];
            input.push(cand(off, off / 2.0, off + 60.0, off / 2.0 + 60.0, confidence, class_id));
        }
        for cap in [1usize, 2, 5, 100] {
            let f = filter(cap);
            let once = f.apply(&input, 640, 480);
            assert!(once.len() <= cap);
            let twice = f.apply(&once, 640, 480);
            assert_eq!(once, twice);
        }
    }
}
