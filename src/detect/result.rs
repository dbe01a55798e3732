use std::collections::hash_map::Entry;
use std::collections::HashMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in decoder-space pixels (origin bottom-left, y up).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from its center point and size.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Half-open containment: `[x, xmax) x [y, ymax)`.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.xmax() && py >= self.y && py < self.ymax()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let l = self.x.max(other.x);
        let r = self.xmax().min(other.xmax());
        let b = self.y.max(other.y);
        let t = self.ymax().min(other.ymax());
        (r - l).max(0.0) * (t - b).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Projected geometry for a detection.
///
/// `position` is camera-local or world-space depending on the configured
/// projection mode; `extent` is the projected width or height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub position: Vector3<f32>,
    pub extent: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            extent: 0.0,
        }
    }
}

/// One detected object for one cycle.
///
/// Values are copied, never mutated in place: projection produces a new
/// `Detection` via [`Detection::with_projection`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    class_id: usize,
    confidence: f32,
    bbox: BoundingBox,
    projection: Option<Projection>,
}

impl Detection {
    /// A decoded candidate without projection.
    pub fn candidate(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
            projection: None,
        }
    }

    pub fn with_projection(self, projection: Projection) -> Self {
        Self {
            projection: Some(projection),
            ..self
        }
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Projected position, zero when the detection was never projected.
    pub fn projected_position(&self) -> Vector3<f32> {
        self.projection
            .map(|p| p.position)
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn projected_extent(&self) -> f32 {
        self.projection.map(|p| p.extent).unwrap_or(0.0)
    }

    /// Synthetic identity: class plus quantized projected x and y.
    ///
    /// Collides for same-class detections at nearby positions.
    pub fn key(&self) -> DetectionKey {
        let p = self.projected_position();
        DetectionKey(
            self.class_id as i64 * 1000
                + (p.x * 100.0).round() as i64
                + (p.y * 100.0).round() as i64,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionKey(pub i64);

/// Final detections of one inference cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    /// Monotonic cycle counter of the driver that produced this set.
    pub cycle: u64,
    /// Post-suppression detections in confidence order.
    pub detections: Vec<Detection>,
    /// Detection containing the reference point, if any.
    pub center_target: Option<Detection>,
}

impl DetectionSet {
    pub fn empty(cycle: u64) -> Self {
        Self {
            cycle,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Detections keyed by [`Detection::key`].
    ///
    /// On collision the later detection wins but keeps the slot of the first.
    pub fn keyed(&self) -> Vec<(DetectionKey, Detection)> {
        let mut out: Vec<(DetectionKey, Detection)> = Vec::with_capacity(self.detections.len());
        let mut slots: HashMap<DetectionKey, usize> = HashMap::with_capacity(self.detections.len());
        for det in &self.detections {
            let key = det.key();
            match slots.entry(key) {
                Entry::Occupied(slot) => out[*slot.get()].1 = *det,
                Entry::Vacant(slot) => {
                    slot.insert(out.len());
                    out.push((key, *det));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_nested_boxes_is_small() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let b = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert_eq!(a.intersection_area(&b), 400.0);
        assert!((a.iou(&b) - 0.04).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(BoundingBox::default().iou(&BoundingBox::default()), 0.0);
    }

    #[test]
    fn containment_is_half_open() {
        let b = BoundingBox::new(300.0, 300.0, 40.0, 40.0);
        assert!(b.contains(300.0, 300.0));
        assert!(b.contains(320.0, 320.0));
        assert!(!b.contains(340.0, 320.0));
    }

    #[test]
    fn keyed_collisions_keep_last_value() {
        let first = Detection::candidate(1, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .with_projection(Projection {
                position: Vector3::new(0.10, 0.20, 1.0),
                extent: 0.1,
            });
        // x and y swapped: same quantized sum, same class
        let second = Detection::candidate(1, 0.7, BoundingBox::new(5.0, 5.0, 1.0, 1.0))
            .with_projection(Projection {
                position: Vector3::new(0.20, 0.10, 1.0),
                extent: 0.2,
            });
        let other = Detection::candidate(2, 0.6, BoundingBox::new(9.0, 9.0, 1.0, 1.0));
        let set = DetectionSet {
            cycle: 1,
            detections: vec![first, other, second],
            center_target: None,
        };

        let keyed = set.keyed();
        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed[0].0, DetectionKey(1030));
        assert_eq!(keyed[0].1, second);
        assert_eq!(keyed[1].1, other);
    }

    #[test]
    fn keyed_keeps_first_insertion_order_for_many_keys() {
        let detections: Vec<_> = (0..500)
            .map(|i| {
                Detection::candidate(i % 3, 0.5, BoundingBox::new(i as f32, 0.0, 1.0, 1.0))
                    .with_projection(Projection {
                        position: Vector3::new((i % 50) as f32 * 0.01, 0.0, 1.0),
                        extent: i as f32,
                    })
            })
            .collect();
        let set = DetectionSet {
            cycle: 3,
            detections: detections.clone(),
            center_target: None,
        };

        let keyed = set.keyed();
        // class and x both repeat every 150 detections
        assert_eq!(keyed.len(), 150);
        for (slot, (key, det)) in keyed.iter().enumerate() {
            assert_eq!(*key, detections[slot].key());
            // the last of detections slot, slot + 150, ... wins
            let last = (slot..500).step_by(150).last().unwrap();
            assert_eq!(det.projected_extent(), last as f32);
        }
    }
}
