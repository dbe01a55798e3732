use std::fmt;

use crate::config::ClassAsset;
use crate::detect::{DetectionKey, DetectionSet};
use crate::orientation::{OrientationPolicy, OrientationTracker};
use crate::pool::{HandleBinding, HandleId, HandlePool, HandleRenderer};
use crate::projection::{CameraPose, ProjectionSpace};

/// Tracking state reported by the AR session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotReady,
    Initializing,
    Tracking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::NotReady => "not-ready",
            SessionState::Initializing => "initializing",
            SessionState::Tracking => "tracking",
        };
        f.write_str(name)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub bound: usize,
    pub skipped: usize,
}

/// Presents each cycle's detections through pooled handles.
pub struct Reconciler {
    pool: HandlePool,
    classes: Vec<ClassAsset>,
    space: ProjectionSpace,
    orientation: OrientationTracker,
    session: SessionState,
    active: Vec<(DetectionKey, HandleId)>,
}

impl Reconciler {
    pub fn new(
        classes: Vec<ClassAsset>,
        space: ProjectionSpace,
        policy: OrientationPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            pool: HandlePool::new(batch_size),
            classes,
            space,
            orientation: OrientationTracker::new(policy),
            session: SessionState::Tracking,
            active: Vec::new(),
        }
    }

    pub fn pool(&self) -> &HandlePool {
        &self.pool
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    /// Handles bound in the latest pass, keyed by detection.
    pub fn active(&self) -> &[(DetectionKey, HandleId)] {
        &self.active
    }

    /// Apply a session change. Returns true when tracking was just lost, so
    /// the host can also cancel focus (see [`crate::FocusController::interrupt`]).
    pub fn set_session_state(
        &mut self,
        state: SessionState,
        renderer: &mut dyn HandleRenderer,
    ) -> bool {
        if state == self.session {
            return false;
        }
        log::info!("reconciler: session {} -> {}", self.session, state);
        let lost = self.session == SessionState::Tracking;
        if lost {
            self.pool.release_all(renderer);
            self.active.clear();
        }
        if state == SessionState::Tracking {
            self.orientation.reset();
        }
        self.session = state;
        lost
    }

    /// Hide last cycle's handles and bind one handle per valid detection.
    ///
    /// Detections with an unmapped class, a non-positive native width, no
    /// projection, or a failing renderer bind are logged and skipped.
    pub fn reconcile(
        &mut self,
        set: &DetectionSet,
        pose: &CameraPose,
        dt: f32,
        renderer: &mut dyn HandleRenderer,
    ) -> ReconcileReport {
        self.pool.release_all(renderer);
        self.active.clear();

        let mut report = ReconcileReport::default();
        if self.session != SessionState::Tracking {
            report.skipped = set.len();
            return report;
        }

        let step = self.orientation.step(pose.rotation, dt);
        for (key, detection) in set.keyed() {
            let class_id = detection.class_id();
            let Some(asset) = self.classes.get(class_id) else {
                log::warn!("reconciler: class {} has no asset, skipping", class_id);
                report.skipped += 1;
                continue;
            };
            if !(asset.native_width > 0.0) {
                log::warn!(
                    "reconciler: class {} ({}) has native width {}, skipping",
                    class_id,
                    asset.name,
                    asset.native_width
                );
                report.skipped += 1;
                continue;
            }
            let Some(projection) = detection.projection() else {
                log::warn!("reconciler: detection {:?} was never projected, skipping", key);
                report.skipped += 1;
                continue;
            };

            let id = match self.pool.acquire(renderer) {
                Ok(id) => id,
                Err(err) => {
                    log::warn!("reconciler: no handle for class {}: {:#}", class_id, err);
                    report.skipped += 1;
                    continue;
                }
            };

            let position = match self.space {
                ProjectionSpace::Camera => pose.to_world(&projection.position),
                ProjectionSpace::World => projection.position,
            };
            let current = self.pool.rotation(id).unwrap_or(pose.rotation);
            let rotation = step.apply(current);
            let binding = HandleBinding {
                key,
                class_id,
                sprite: &asset.sprite,
                position,
                rotation,
                scale: projection.extent / asset.native_width,
            };
            if let Err(err) = renderer.bind(id, &binding) {
                log::warn!("reconciler: bind failed for class {}: {:#}", class_id, err);
                self.pool.release(id, renderer);
                report.skipped += 1;
                continue;
            }
            self.pool.set_rotation(id, rotation);
            renderer.set_visible(id, true);
            self.active.push((key, id));
            report.bound += 1;
        }

        log::debug!(
            "reconciler: cycle {} bound {} skipped {} (pool {})",
            set.cycle,
            report.bound,
            report.skipped,
            self.pool.capacity()
        );
        report
    }

    /// Destroy every pooled handle.
    pub fn teardown(&mut self, renderer: &mut dyn HandleRenderer) {
        self.active.clear();
        self.pool.teardown(renderer);
    }
}
