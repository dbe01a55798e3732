//! Raw tensor to candidate detections.
//!
//! The model emits a channel-major `[1, F, N]` buffer: four geometry
//! channels (`cx`, `cy`, `w`, `h`) followed by per-class scores. The decoder
//! walks a transposed view of it, one row per candidate slot.

use ndarray::{ArrayView2, ArrayViewD, Axis};

use crate::detect::result::{BoundingBox, Detection};

/// Position of the class-score window inside the feature channels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassWindow {
    /// First class-score channel (the four geometry channels precede it).
    pub offset: usize,
    /// Number of scored classes.
    pub count: usize,
}

impl Default for ClassWindow {
    fn default() -> Self {
        Self {
            offset: 4,
            count: 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecoderConfig {
    pub confidence_threshold: f32,
    /// Side of the square decoder reference frame, in pixels.
    pub frame_size: f32,
    pub classes: ClassWindow,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            frame_size: 640.0,
            classes: ClassWindow::default(),
        }
    }
}

/// Decode a `[1, F, N]` output tensor into candidates.
///
/// Malformed tensors are logged and produce no candidates.
pub fn decode(output: ArrayViewD<'_, f32>, config: &DecoderConfig) -> Vec<Detection> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
        log::warn!("decode: expected output shape [1, F, N], got {:?}", shape);
        return Vec::new();
    }
    let channels: ArrayView2<'_, f32> = match output.index_axis(Axis(0), 0).into_dimensionality() {
        Ok(view) => view,
        Err(e) => {
            log::warn!("decode: cannot view output as [F, N]: {}", e);
            return Vec::new();
        }
    };
    decode_channels(channels, config)
}

/// Decode a channel-major `[F, N]` view.
pub fn decode_channels(channels: ArrayView2<'_, f32>, config: &DecoderConfig) -> Vec<Detection> {
    let features = channels.nrows();
    let window = config.classes;
    let class_end = window.offset.saturating_add(window.count);
    if window.count == 0 || window.offset < 4 || class_end > features {
        log::warn!(
            "decode: class window {}..{} does not fit {} feature channels",
            window.offset,
            class_end,
            features
        );
        return Vec::new();
    }

    // [N, F] view, no copy.
    let slots = channels.t();
    let mut candidates = Vec::new();
    let mut over_unit = 0usize;
    let mut bad_geometry = 0usize;

    for row in slots.outer_iter() {
        let mut class_id = 0usize;
        let mut confidence = f32::NEG_INFINITY;
        for (idx, &score) in row.slice(ndarray::s![window.offset..class_end]).iter().enumerate() {
            if score > confidence {
                confidence = score;
                class_id = idx;
            }
        }
        // NaN never passes this comparison.
        if !(confidence >= config.confidence_threshold) {
            continue;
        }
        if confidence > 1.0 {
            over_unit += 1;
        }

        let cx = row[0];
        let cy = config.frame_size - row[1];
        let w = row[2];
        let h = row[3];
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite())
            || w < 0.0
            || h < 0.0
        {
            bad_geometry += 1;
            continue;
        }

        candidates.push(Detection::candidate(
            class_id,
            confidence,
            BoundingBox::from_center(cx, cy, w, h),
        ));
    }

    if over_unit > 0 {
        log::warn!(
            "decode: {} candidate(s) with confidence above 1.0; upstream score contract violated",
            over_unit
        );
    }
    if bad_geometry > 0 {
        log::warn!(
            "decode: dropped {} candidate(s) with non-finite or negative geometry",
            bad_geometry
        );
    }
    log::debug!(
        "decode: {} candidate(s) from {} slot(s)",
        candidates.len(),
        slots.nrows()
    );
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    const F: usize = 11;

    fn tensor(slots: &[[f32; F]]) -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((1, F, slots.len()));
        for (n, slot) in slots.iter().enumerate() {
            for (f, v) in slot.iter().enumerate() {
                out[[0, f, n]] = *v;
            }
        }
        out
    }

    fn slot(cx: f32, raw_y: f32, w: f32, h: f32, class: usize, conf: f32) -> [f32; F] {
        let mut s = [0.0; F];
        s[0] = cx;
        s[1] = raw_y;
        s[2] = w;
        s[3] = h;
        s[4 + class] = conf;
        s
    }

    #[test]
    fn below_threshold_slots_are_dropped() {
        let t = tensor(&[
            slot(100.0, 100.0, 10.0, 10.0, 0, 0.49),
            slot(200.0, 200.0, 10.0, 10.0, 3, 0.5),
        ]);
        let out = decode(t.view().into_dyn(), &DecoderConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id(), 3);
        assert_eq!(out[0].confidence(), 0.5);
    }

    #[test]
    fn box_is_rebuilt_with_vertical_flip() {
        let t = tensor(&[slot(320.0, 220.0, 40.0, 20.0, 2, 0.9)]);
        let out = decode(t.view().into_dyn(), &DecoderConfig::default());
        assert_eq!(out.len(), 1);
        let b = out[0].bbox();
        assert_eq!(*b, BoundingBox::new(300.0, 410.0, 40.0, 20.0));
        assert!(out[0].projection().is_none());
    }

    #[test]
    fn over_unit_confidence_is_kept_unclamped() {
        let t = tensor(&[slot(50.0, 50.0, 4.0, 4.0, 6, 1.7)]);
        let out = decode(t.view().into_dyn(), &DecoderConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence(), 1.7);
        assert_eq!(out[0].class_id(), 6);
    }

    #[test]
    fn argmax_ties_go_to_lowest_class() {
        let mut s = slot(10.0, 10.0, 2.0, 2.0, 1, 0.8);
        s[4 + 5] = 0.8;
        let out = decode(tensor(&[s]).view().into_dyn(), &DecoderConfig::default());
        assert_eq!(out[0].class_id(), 1);
    }

    #[test]
    fn malformed_tensors_yield_no_candidates() {
        let cfg = DecoderConfig::default();
        let flat = ndarray::Array1::<f32>::zeros(22);
        assert!(decode(flat.view().into_dyn(), &cfg).is_empty());

        let batched = ndarray::Array3::<f32>::ones((2, F, 3));
        assert!(decode(batched.view().into_dyn(), &cfg).is_empty());

        // class window runs past the feature channels
        let narrow = Array2::<f32>::ones((8, 3));
        assert!(decode_channels(narrow.view(), &cfg).is_empty());

        let empty = ndarray::Array3::<f32>::zeros((1, F, 0));
        assert!(decode(empty.view().into_dyn(), &cfg).is_empty());
    }

    #[test]
    fn nan_scores_and_negative_sizes_are_skipped() {
        let mut nan = slot(10.0, 10.0, 2.0, 2.0, 0, 0.0);
        for c in 4..F {
            nan[c] = f32::NAN;
        }
        let negative = slot(10.0, 10.0, -2.0, 2.0, 0, 0.9);
        let out = decode(tensor(&[nan, negative]).view().into_dyn(), &DecoderConfig::default());
        assert!(out.is_empty());
    }
}
