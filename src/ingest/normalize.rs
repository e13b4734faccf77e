//! Detection normalization: raw detector output -> the internal object map.
//!
//! Confidence filtering happens here, before the change detector ever sees
//! a detection. Ids are positional (`"{label}_{index}"` over the detector's
//! output order), so matching across frames compares same-position objects;
//! a reordering of equal objects can pair unrelated boxes.

use crate::detect::RawDetection;
use crate::{Detection, ObjectMap};

/// Filter and normalize one frame's raw detections.
///
/// Detections below `confidence_threshold` are dropped. Detections with
/// degenerate boxes are skipped with a warning rather than failing the
/// frame; the producer loop must keep running on malformed detector
/// output.
pub fn normalize_detections(
    raw: &[RawDetection],
    confidence_threshold: f64,
    frame_number: u64,
) -> ObjectMap {
    let mut objects = ObjectMap::with_capacity(raw.len());
    for (index, det) in raw.iter().enumerate() {
        if f64::from(det.confidence) < confidence_threshold {
            continue;
        }
        if det.bbox.x1 >= det.bbox.x2 || det.bbox.y1 >= det.bbox.y2 {
            log::warn!(
                "frame {}: skipping degenerate box for '{}': ({}, {}, {}, {})",
                frame_number,
                det.label,
                det.bbox.x1,
                det.bbox.y1,
                det.bbox.x2,
                det.bbox.y2
            );
            continue;
        }
        let object_id = format!("{}_{}", det.label, index);
        objects.insert(
            object_id,
            Detection {
                label: det.label.clone(),
                class_id: det.class_id,
                bbox: det.bbox,
                confidence: det.confidence,
            },
        );
    }
    objects
}
