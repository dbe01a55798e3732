use crate::detect::result::Detection;

/// Reference point at the center of a square decoder frame.
pub fn frame_center(frame_size: f32) -> (f32, f32) {
    (frame_size / 2.0, frame_size / 2.0)
}

/// Pick the detection whose box contains `reference`.
///
/// With several matches the box whose centroid is nearest to the reference
/// wins; exact ties keep the earliest detection in `detections`.
pub fn select_center_target(detections: &[Detection], reference: (f32, f32)) -> Option<Detection> {
    let (rx, ry) = reference;
    let mut best: Option<(f32, Detection)> = None;
    for det in detections {
        if !det.bbox().contains(rx, ry) {
            continue;
        }
        let (cx, cy) = det.bbox().center();
        let dist = ((cx - rx).powi(2) + (cy - ry).powi(2)).sqrt();
        match best {
            Some((best_dist, _)) if dist >= best_dist => {}
            _ => best = Some((dist, *det)),
        }
    }
    best.map(|(_, det)| det)
}
