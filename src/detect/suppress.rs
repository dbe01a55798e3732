//! Greedy non-maximum suppression with a containment override.

use crate::detect::result::{BoundingBox, Detection};

/// Share of the lower-ranked box that must lie in the overlap for it to be
/// suppressed regardless of IoU.
pub const CONTAINMENT_RATIO: f32 = 0.8;

/// Suppress overlapping candidates.
///
/// Candidates are ranked by descending confidence (stable for equal
/// scores). Each surviving box suppresses every lower-ranked box that either
/// overlaps it with IoU above `iou_threshold` or lies more than
/// [`CONTAINMENT_RATIO`] inside it. Suppression ignores class ids. Fewer
/// than two candidates are returned untouched.
pub fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if candidates.len() < 2 {
        return candidates;
    }

    candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut suppressed = vec![false; candidates.len()];
    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        let keep = *candidates[i].bbox();
        for j in (i + 1)..candidates.len() {
            if suppressed[j] {
                continue;
            }
            if overlaps(&keep, candidates[j].bbox(), iou_threshold) {
                suppressed[j] = true;
            }
        }
    }

    let before = candidates.len();
    let kept: Vec<Detection> = candidates
        .into_iter()
        .zip(suppressed)
        .filter_map(|(det, gone)| (!gone).then_some(det))
        .collect();
    log::debug!("suppress: kept {} of {} candidate(s)", kept.len(), before);
    kept
}

fn overlaps(higher: &BoundingBox, lower: &BoundingBox, iou_threshold: f32) -> bool {
    let inter = higher.intersection_area(lower);
    if inter <= 0.0 {
        return false;
    }
    let lower_area = lower.area();
    if lower_area > 0.0 && inter / lower_area > CONTAINMENT_RATIO {
        return true;
    }
    higher.iou(lower) > iou_threshold
}
