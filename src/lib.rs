//! Overlay Kernel
//!
//! Real-time detection decode and tracking for an AR overlay.
//!
//! # Architecture
//!
//! Each decoded frame runs one synchronous cycle:
//!
//! 1. **Decode**: the raw `[1, F, N]` model output becomes candidate detections.
//! 2. **Suppress**: greedy NMS with an asymmetric containment override.
//! 3. **Project**: decoder-space boxes map to camera or world coordinates.
//! 4. **Select**: the detection covering the frame center becomes the center target.
//! 5. **Emit**: the final `DetectionSet` goes to subscribers and the latest-value slot.
//!
//! The `Reconciler` then presents the set through a batch-grown pool of
//! reusable handles. A shared `DetectionGate` lets a consumer pause decoding
//! while it holds focus; the pipeline watchdog reopens a gate left closed.
//!
//! # Module Structure
//!
//! - `detect`: decoder, suppressor, center selection, inference backends
//! - `projection`: plane calibration and camera pose
//! - `pipeline`: frame driver, gate, watchdog, subscribers
//! - `pool` / `reconcile` / `orientation`: handle presentation
//! - `focus`: center-target focus and cue playback
//! - `frame`: camera frames, preprocessing, frame sources
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod focus;
pub mod frame;
pub mod orientation;
pub mod pipeline;
pub mod pool;
pub mod projection;
pub mod reconcile;

pub use config::{BackendKind, ClassAsset, PipelineConfig};
pub use detect::{
    BoundingBox, DecoderConfig, Detection, DetectionKey, DetectionSet, InferenceBackend,
    Projection,
};
pub use focus::{CuePlayer, FocusController, FocusOutcome};
pub use frame::{frame_to_tensor, open_source, CameraFrame, FrameSource, SyntheticSource};
pub use orientation::{OrientationPolicy, OrientationTracker};
pub use pipeline::{
    DetectionGate, FrameOutcome, Pipeline, PipelineStats, SkipReason, SubscriptionId, Watchdog,
};
pub use pool::{HandleBinding, HandleId, HandlePool, HandleRenderer};
pub use projection::{CameraPose, ExtentAxis, PlaneCalibration, ProjectionSpace, Projector};
pub use reconcile::{ReconcileReport, Reconciler, SessionState};
