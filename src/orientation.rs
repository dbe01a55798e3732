use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

/// How bound handles follow the camera orientation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum OrientationPolicy {
    /// Copy the camera rotation every cycle.
    Snap,
    /// Slerp toward the camera rotation over `smooth_time` seconds, only on
    /// cycles where the camera turned more than `threshold_degrees` or every
    /// `update_interval` cycles.
    Smooth {
        smooth_time: f32,
        threshold_degrees: f32,
        update_interval: u32,
    },
}

impl Default for OrientationPolicy {
    fn default() -> Self {
        Self::Smooth {
            smooth_time: 0.1,
            threshold_degrees: 0.5,
            update_interval: 2,
        }
    }
}

/// Per-cycle decision on whether handle rotations are refreshed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientationStep {
    target: UnitQuaternion<f32>,
    t: f32,
    update: bool,
}

impl OrientationStep {
    pub fn updates(&self) -> bool {
        self.update
    }

    /// Rotation for a handle currently at `current`.
    pub fn apply(&self, current: UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        if !self.update {
            return current;
        }
        if self.t >= 1.0 {
            return self.target;
        }
        // slerp is undefined for opposite rotations; snap in that case
        current
            .try_slerp(&self.target, self.t, 1.0e-6)
            .unwrap_or(self.target)
    }
}

pub struct OrientationTracker {
    policy: OrientationPolicy,
    reference: Option<UnitQuaternion<f32>>,
    cycles: u64,
}

impl OrientationTracker {
    pub fn new(policy: OrientationPolicy) -> Self {
        Self {
            policy,
            reference: None,
            cycles: 0,
        }
    }

    /// Forget the reference rotation (after a session reset).
    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// Advance one cycle and decide how handles rotate toward `camera`.
    pub fn step(&mut self, camera: UnitQuaternion<f32>, dt: f32) -> OrientationStep {
        self.cycles += 1;
        match self.policy {
            OrientationPolicy::Snap => {
                self.reference = Some(camera);
                OrientationStep {
                    target: camera,
                    t: 1.0,
                    update: true,
                }
            }
            OrientationPolicy::Smooth {
                smooth_time,
                threshold_degrees,
                update_interval,
            } => {
                let turned = self
                    .reference
                    .map(|r| r.angle_to(&camera).to_degrees())
                    .unwrap_or(f32::INFINITY);
                let interval = u64::from(update_interval.max(1));
                let update = turned > threshold_degrees || self.cycles % interval == 0;
                if update {
                    self.reference = Some(camera);
                }
                let t = if smooth_time > 0.0 {
                    (dt / smooth_time).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                OrientationStep {
                    target: camera,
                    t,
                    update,
                }
            }
        }
    }
}
