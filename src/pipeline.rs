//! Frame-driven decode loop.
//!
//! One call to [`Pipeline::on_frame`] runs at most one full cycle
//! (infer, decode, suppress, project, select, emit) on the caller's thread.
//! Frames are skipped when the shared [`DetectionGate`] is closed, when the
//! frame falls between `frame_skip` boundaries, or after shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ndarray::ArrayViewD;

use crate::config::PipelineConfig;
use crate::detect::backends;
use crate::detect::{
    decode, frame_center, select_center_target, suppress, DecoderConfig, Detection, DetectionSet,
    InferenceBackend,
};
use crate::frame::{frame_to_tensor, CameraFrame};
use crate::projection::{CameraPose, Projector};

/// Shared "detection enabled" flag.
///
/// Cloned into every component that may take exclusive focus. Closing the
/// gate makes the pipeline skip decoding until it is reopened or the
/// watchdog forces it open.
#[derive(Clone, Debug)]
pub struct DetectionGate {
    open: Arc<AtomicBool>,
}

impl DetectionGate {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_detecting(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn set_detecting(&self, detecting: bool) {
        self.open.store(detecting, Ordering::Relaxed);
    }
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Reopens a gate that has been closed for too long.
#[derive(Debug)]
pub struct Watchdog {
    ceiling: Duration,
    closed_for: f64,
    resets: u64,
}

impl Watchdog {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            ceiling,
            closed_for: 0.0,
            resets: 0,
        }
    }

    /// Account `dt` seconds of frame time. Returns true when the gate was
    /// forced open on this check.
    pub fn check(&mut self, gate: &DetectionGate, dt: f32) -> bool {
        if gate.is_detecting() {
            self.closed_for = 0.0;
            return false;
        }
        if dt.is_finite() && dt > 0.0 {
            self.closed_for += f64::from(dt);
        }
        if self.closed_for >= self.ceiling.as_secs_f64() {
            log::warn!(
                "watchdog: detection disabled for {:.1}s, forcing it back on",
                self.closed_for
            );
            gate.set_detecting(true);
            self.closed_for = 0.0;
            self.resets += 1;
            return true;
        }
        false
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Gated,
    FrameSkip,
    ShutDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Decoded { cycle: u64, detections: usize },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub gated: u64,
    pub frame_skipped: u64,
    pub watchdog_resets: u64,
}

type Subscriber = Box<dyn FnMut(&DetectionSet)>;

pub struct Pipeline {
    backend: Option<Box<dyn InferenceBackend>>,
    decoder: DecoderConfig,
    iou_threshold: f32,
    input_size: usize,
    projector: Projector,
    frame_skip: u64,
    gate: DetectionGate,
    watchdog: Watchdog,
    frame_index: u64,
    cycle: u64,
    latest: Option<DetectionSet>,
    center_target: Option<Detection>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build the configured backend and warm it up.
    pub fn from_config(config: &PipelineConfig, gate: DetectionGate) -> Result<Self> {
        let mut backend = backends::from_config(config)?;
        backend.warm_up()?;
        log::info!("pipeline: backend {} ready", backend.name());
        Ok(Self::new(backend, config, gate))
    }

    pub fn new(backend: Box<dyn InferenceBackend>, config: &PipelineConfig, gate: DetectionGate) -> Self {
        let projection = &config.projection;
        Self {
            backend: Some(backend),
            decoder: config.decoder,
            iou_threshold: config.iou_threshold,
            input_size: config.tensor.input_size,
            projector: Projector::new(projection.calibration, projection.space, projection.extent_axis),
            frame_skip: u64::from(config.driver.frame_skip.max(1)),
            gate,
            watchdog: Watchdog::new(config.driver.watchdog),
            frame_index: 0,
            cycle: 0,
            latest: None,
            center_target: None,
            subscribers: Vec::new(),
            next_subscription: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn gate(&self) -> &DetectionGate {
        &self.gate
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            watchdog_resets: self.watchdog.resets(),
            ..self.stats
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.backend.is_none()
    }

    /// Register a callback that receives every emitted set.
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&DetectionSet) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// The most recent emitted set; survives skipped frames.
    pub fn latest(&self) -> Option<&DetectionSet> {
        self.latest.as_ref()
    }

    /// Center target of the latest decoded cycle.
    pub fn try_get_center_target(&self) -> Option<Detection> {
        self.center_target
    }

    /// Drive one frame. `dt` is the frame time in seconds since the previous
    /// call and feeds the watchdog.
    pub fn on_frame(&mut self, frame: &CameraFrame, dt: f32) -> FrameOutcome {
        if self.is_shut_down() {
            return FrameOutcome::Skipped(SkipReason::ShutDown);
        }
        self.stats.frames += 1;

        self.watchdog.check(&self.gate, dt);
        if !self.gate.is_detecting() {
            self.stats.gated += 1;
            return FrameOutcome::Skipped(SkipReason::Gated);
        }

        let index = self.frame_index;
        self.frame_index += 1;
        if index % self.frame_skip != 0 {
            self.stats.frame_skipped += 1;
            return FrameOutcome::Skipped(SkipReason::FrameSkip);
        }

        let result = self.infer(frame);
        let detections = match result {
            Ok(output) => self.process_output(output.view(), &frame.pose).len(),
            Err(err) => {
                log::error!("pipeline: cycle {} failed: {:#}", self.cycle + 1, err);
                self.stats.failed_cycles += 1;
                self.emit(DetectionSet::empty(self.cycle + 1));
                0
            }
        };
        FrameOutcome::Decoded {
            cycle: self.cycle,
            detections,
        }
    }

    /// Run decode, suppression, projection and selection on a raw `[1, F, N]`
    /// output and emit the result.
    pub fn process_output(&mut self, output: ArrayViewD<'_, f32>, pose: &CameraPose) -> &DetectionSet {
        let candidates = decode(output, &self.decoder);
        let candidate_count = candidates.len();
        let kept = suppress(candidates, self.iou_threshold);
        let detections: Vec<Detection> = kept
            .into_iter()
            .map(|det| self.projector.project_detection(det, pose))
            .collect();
        let center_target = select_center_target(&detections, frame_center(self.decoder.frame_size));

        let set = DetectionSet {
            cycle: self.cycle + 1,
            detections,
            center_target,
        };
        log::debug!(
            "pipeline: cycle {} kept {} of {} candidates, center target {}",
            set.cycle,
            set.len(),
            candidate_count,
            if set.center_target.is_some() { "found" } else { "none" }
        );
        self.emit(set)
    }

    /// Release the backend and subscribers. Later frames are skipped.
    pub fn shutdown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
            log::info!(
                "pipeline: shut down after {} cycles ({} backend released)",
                self.cycle,
                backend.name()
            );
        }
        self.latest = None;
        self.center_target = None;
        self.subscribers.clear();
    }

    fn infer(&mut self, frame: &CameraFrame) -> Result<ndarray::ArrayD<f32>> {
        let input = frame_to_tensor(frame, self.input_size)?;
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("pipeline backend already released"))?;
        backend.infer(&input)
    }

    fn emit(&mut self, set: DetectionSet) -> &DetectionSet {
        self.cycle = set.cycle;
        self.stats.cycles += 1;
        self.center_target = set.center_target;
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&set);
        }
        self.latest.insert(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{synthetic_output, SyntheticBackend, SyntheticObject};
    use crate::detect::BoundingBox;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn small_config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.tensor.slots = 16;
        cfg.tensor.input_size = 8;
        cfg
    }

    fn object(class_id: usize, confidence: f32, bbox: BoundingBox) -> SyntheticObject {
        SyntheticObject {
            class_id,
            confidence,
            bbox,
        }
    }

    fn pipeline_with(objects: Vec<SyntheticObject>) -> Pipeline {
        let cfg = small_config();
        let backend = SyntheticBackend::new(cfg.tensor.features, cfg.tensor.slots, cfg.decoder)
            .with_objects(objects)
            .unwrap();
        Pipeline::new(Box::new(backend), &cfg, DetectionGate::new())
    }

    fn frame() -> CameraFrame {
        CameraFrame::new(vec![128; 8 * 8 * 3], 8, 8, CameraPose::identity(), 0.0).unwrap()
    }

    #[test]
    fn decodes_every_third_frame() {
        let mut p = pipeline_with(vec![]);
        let outcomes: Vec<_> = (0..6).map(|_| p.on_frame(&frame(), 0.016)).collect();
        assert!(matches!(outcomes[0], FrameOutcome::Decoded { cycle: 1, .. }));
        assert_eq!(outcomes[1], FrameOutcome::Skipped(SkipReason::FrameSkip));
        assert_eq!(outcomes[2], FrameOutcome::Skipped(SkipReason::FrameSkip));
        assert!(matches!(outcomes[3], FrameOutcome::Decoded { cycle: 2, .. }));
        assert_eq!(p.stats().cycles, 2);
    }

    #[test]
    fn nested_box_is_suppressed_in_cycle() {
        let mut p = pipeline_with(vec![
            object(0, 0.9, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
            object(1, 0.8, BoundingBox::new(10.0, 10.0, 20.0, 20.0)),
        ]);
        p.on_frame(&frame(), 0.016);
        let set = p.latest().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.detections[0].class_id(), 0);
        assert!(set.detections[0].projection().is_some());
    }

    #[test]
    fn center_target_is_not_sticky() {
        let cfg = small_config();
        let mut p = pipeline_with(vec![]);
        let centered = vec![object(2, 0.9, BoundingBox::new(300.0, 300.0, 40.0, 40.0))];
        let out = synthetic_output(cfg.tensor.features, 16, &cfg.decoder, &centered).unwrap();
        p.process_output(out.view(), &CameraPose::identity());
        assert_eq!(p.try_get_center_target().map(|d| d.class_id()), Some(2));

        let off_center = vec![object(2, 0.9, BoundingBox::new(0.0, 0.0, 40.0, 40.0))];
        let out = synthetic_output(cfg.tensor.features, 16, &cfg.decoder, &off_center).unwrap();
        p.process_output(out.view(), &CameraPose::identity());
        assert!(p.try_get_center_target().is_none());
        assert_eq!(p.latest().unwrap().len(), 1);
    }

    #[test]
    fn closed_gate_skips_and_watchdog_reopens() {
        let mut cfg = small_config();
        cfg.driver.frame_skip = 1;
        cfg.driver.watchdog = Duration::from_secs(1);
        let backend = SyntheticBackend::new(cfg.tensor.features, cfg.tensor.slots, cfg.decoder);
        let gate = DetectionGate::new();
        let mut p = Pipeline::new(Box::new(backend), &cfg, gate.clone());

        gate.set_detecting(false);
        for _ in 0..3 {
            assert_eq!(p.on_frame(&frame(), 0.25), FrameOutcome::Skipped(SkipReason::Gated));
        }
        // fourth check reaches the one second ceiling
        assert!(matches!(p.on_frame(&frame(), 0.25), FrameOutcome::Decoded { .. }));
        assert!(gate.is_detecting());
        assert_eq!(p.stats().watchdog_resets, 1);
    }

    #[test]
    fn watchdog_resets_when_gate_reopens() {
        let gate = DetectionGate::new();
        let mut dog = Watchdog::new(Duration::from_secs(10));
        gate.set_detecting(false);
        assert!(!dog.check(&gate, 9.0));
        gate.set_detecting(true);
        assert!(!dog.check(&gate, 0.1));
        gate.set_detecting(false);
        assert!(!dog.check(&gate, 9.0));
        assert!(!gate.is_detecting());
        assert!(dog.check(&gate, 1.0));
        assert!(gate.is_detecting());
    }

    #[test]
    fn subscribers_receive_each_emitted_set() {
        let mut p = pipeline_with(vec![object(0, 0.9, BoundingBox::new(5.0, 5.0, 10.0, 10.0))]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = p.subscribe(move |set| sink.borrow_mut().push((set.cycle, set.len())));

        p.on_frame(&frame(), 0.016);
        assert_eq!(*seen.borrow(), vec![(1, 1)]);

        assert!(p.unsubscribe(id));
        assert!(!p.unsubscribe(id));
        for _ in 0..3 {
            p.on_frame(&frame(), 0.016);
        }
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn failed_cycle_emits_empty_set() {
        let cfg = small_config();
        let mut p = pipeline_with(vec![object(0, 0.9, BoundingBox::new(5.0, 5.0, 10.0, 10.0))]);
        p.on_frame(&frame(), 0.016);
        assert_eq!(p.latest().unwrap().len(), 1);

        // a zero input size makes preprocessing fail
        let bad = CameraFrame::new(vec![0; 3], 1, 1, CameraPose::identity(), 0.0).unwrap();
        let mut wrong = Pipeline::new(
            Box::new(SyntheticBackend::new(cfg.tensor.features, 1, cfg.decoder)),
            &PipelineConfig {
                tensor: crate::config::TensorSettings {
                    input_size: 0,
                    ..cfg.tensor
                },
                ..cfg.clone()
            },
            DetectionGate::new(),
        );
        assert!(matches!(
            wrong.on_frame(&bad, 0.016),
            FrameOutcome::Decoded { cycle: 1, detections: 0 }
        ));
        assert!(wrong.latest().unwrap().is_empty());
        assert_eq!(wrong.stats().failed_cycles, 1);
    }

    #[test]
    fn shutdown_skips_later_frames() {
        let mut p = pipeline_with(vec![]);
        p.subscribe(|_| {});
        p.on_frame(&frame(), 0.016);
        p.shutdown();
        assert!(p.is_shut_down());
        assert!(p.latest().is_none());
        assert_eq!(
            p.on_frame(&frame(), 0.016),
            FrameOutcome::Skipped(SkipReason::ShutDown)
        );
    }
}
