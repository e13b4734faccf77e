//! Change detection: decides whether a frame's detections differ enough
//! from the last persisted frame to warrant saving.
//!
//! Matching between frames is by synthetic object id, which the ingest
//! layer assigns positionally. Two equal objects swapping positions across
//! frames can therefore compare under mismatched ids and spuriously read as
//! significant. This is intentional source behavior, not a tracker.

use crate::settings::Settings;
use crate::{BoundingBox, ObjectMap};

/// Intersection over Union of two boxes, in [0, 1].
///
/// Returns 0 when the boxes do not overlap and when the union is empty
/// (degenerate zero-area boxes never divide by zero).
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let left = a.x1.max(b.x1);
    let top = a.y1.max(b.y1);
    let right = a.x2.min(b.x2);
    let bottom = a.y2.min(b.y2);

    if right < left || bottom < top {
        return 0.0;
    }

    let intersection = (right - left) as i64 * (bottom - top) as i64;
    let union = a.area() + b.area() - intersection;
    if union <= 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Euclidean distance between integer box centers, in pixels.
pub fn center_distance(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    let dx = (ax - bx) as f64;
    let dy = (ay - by) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Whether `current` differs significantly from the last persisted object
/// set. Rules are evaluated in order; the first match wins:
///
/// 1. no previous set (first frame, or reset after pause/source switch)
/// 2. object count changed
/// 3. distinct label set changed
/// 4. any id present in both sets moved: IoU below threshold, or center
///    displaced beyond the position threshold
pub fn is_significant(
    current: &ObjectMap,
    previous: Option<&ObjectMap>,
    settings: &Settings,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if current.len() != previous.len() {
        return true;
    }

    let current_labels: std::collections::BTreeSet<&str> =
        current.values().map(|det| det.label.as_str()).collect();
    let prev_labels: std::collections::BTreeSet<&str> =
        previous.values().map(|det| det.label.as_str()).collect();
    if current_labels != prev_labels {
        return true;
    }

    for (obj_id, curr) in current {
        let Some(prev) = previous.get(obj_id) else {
            continue;
        };
        if iou(&curr.bbox, &prev.bbox) < settings.iou_threshold {
            return true;
        }
        if center_distance(&curr.bbox, &prev.bbox) > settings.position_threshold {
            return true;
        }
    }

    false
}
