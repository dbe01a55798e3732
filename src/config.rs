use anyhow::{anyhow, Result};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::backends::SyntheticObject;
use crate::detect::{ClassWindow, DecoderConfig};
use crate::orientation::OrientationPolicy;
use crate::projection::{ExtentAxis, PlaneCalibration, ProjectionSpace};

const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.6;
const DEFAULT_FRAME_SIZE: usize = 640;
const DEFAULT_FEATURES: usize = 62;
const DEFAULT_SLOTS: usize = 8400;
const DEFAULT_CLASS_OFFSET: usize = 4;
const DEFAULT_CLASS_COUNT: usize = 7;
const DEFAULT_FRAME_SKIP: u32 = 3;
const DEFAULT_WATCHDOG_SECS: f64 = 10.0;
const DEFAULT_POOL_BATCH: usize = 5;
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    backend: Option<BackendConfigFile>,
    tensor: Option<TensorConfigFile>,
    decoder: Option<DecoderConfigFile>,
    suppression: Option<SuppressionConfigFile>,
    driver: Option<DriverConfigFile>,
    projection: Option<ProjectionConfigFile>,
    pool: Option<PoolConfigFile>,
    orientation: Option<OrientationPolicy>,
    classes: Option<Vec<ClassAsset>>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    kind: Option<BackendKind>,
    model_path: Option<PathBuf>,
    synthetic_objects: Option<Vec<SyntheticObject>>,
    jitter: Option<f32>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TensorConfigFile {
    features: Option<usize>,
    slots: Option<usize>,
    input_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DecoderConfigFile {
    confidence_threshold: Option<f32>,
    frame_size: Option<usize>,
    class_offset: Option<usize>,
    class_count: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SuppressionConfigFile {
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DriverConfigFile {
    frame_skip: Option<u32>,
    watchdog_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProjectionConfigFile {
    space: Option<ProjectionSpace>,
    extent_axis: Option<ExtentAxis>,
    plane_size: Option<f32>,
    plane_distance: Option<f32>,
    offset: Option<[f32; 2]>,
}

#[derive(Debug, Deserialize, Default)]
struct PoolConfigFile {
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Synthetic,
    Tract,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(Self::Synthetic),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown backend {:?} (expected \"synthetic\" or \"tract\")",
                other
            )),
        }
    }
}

/// Visual asset bound to handles showing one class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassAsset {
    pub name: String,
    pub sprite: String,
    /// Width of the sprite at scale 1, in world units.
    pub native_width: f32,
    /// Audio cue played when this class is focused.
    #[serde(default)]
    pub cue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub backend: BackendSettings,
    pub tensor: TensorSettings,
    pub decoder: DecoderConfig,
    pub iou_threshold: f32,
    pub driver: DriverSettings,
    pub projection: ProjectionSettings,
    pub pool_batch: usize,
    pub orientation: OrientationPolicy,
    /// Indexed by class id.
    pub classes: Vec<ClassAsset>,
    pub source: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub model_path: Option<PathBuf>,
    pub synthetic_objects: Vec<SyntheticObject>,
    /// Per-axis jitter of synthetic object centers, in pixels.
    pub jitter: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TensorSettings {
    pub features: usize,
    pub slots: usize,
    /// Side of the square model input.
    pub input_size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// Decode on every `frame_skip`-th frame.
    pub frame_skip: u32,
    pub watchdog: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectionSettings {
    pub space: ProjectionSpace,
    pub extent_axis: ExtentAxis,
    pub calibration: PlaneCalibration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let decoder = DecoderConfig {
            confidence_threshold: DEFAULT_CONF_THRESHOLD,
            frame_size: DEFAULT_FRAME_SIZE as f32,
            classes: ClassWindow {
                offset: DEFAULT_CLASS_OFFSET,
                count: DEFAULT_CLASS_COUNT,
            },
        };
        Self {
            backend: BackendSettings {
                kind: BackendKind::default(),
                model_path: None,
                synthetic_objects: Vec::new(),
                jitter: 0.0,
                seed: 0,
            },
            tensor: TensorSettings {
                features: DEFAULT_FEATURES,
                slots: DEFAULT_SLOTS,
                input_size: DEFAULT_FRAME_SIZE,
            },
            decoder,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            driver: DriverSettings {
                frame_skip: DEFAULT_FRAME_SKIP,
                watchdog: Duration::from_secs_f64(DEFAULT_WATCHDOG_SECS),
            },
            projection: ProjectionSettings {
                space: ProjectionSpace::default(),
                extent_axis: ExtentAxis::default(),
                calibration: PlaneCalibration {
                    frame_size: DEFAULT_FRAME_SIZE as f32,
                    ..PlaneCalibration::default()
                },
            },
            pool_batch: DEFAULT_POOL_BATCH,
            orientation: OrientationPolicy::default(),
            classes: default_classes(DEFAULT_CLASS_COUNT),
            source: SourceSettings {
                url: DEFAULT_SOURCE_URL.to_string(),
                target_fps: DEFAULT_SOURCE_FPS,
                width: DEFAULT_SOURCE_WIDTH,
                height: DEFAULT_SOURCE_HEIGHT,
            },
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the file named by `OVERLAY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        Self::load_with(config_path.as_deref().map(Path::new))
    }

    /// Like [`PipelineConfig::load`] with an explicit file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::load_with(Some(path))
    }

    fn load_with(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let backend = {
            let b = file.backend.unwrap_or_default();
            BackendSettings {
                kind: b.kind.unwrap_or_default(),
                model_path: b.model_path,
                synthetic_objects: b.synthetic_objects.unwrap_or_default(),
                jitter: b.jitter.unwrap_or(0.0),
                seed: b.seed.unwrap_or(0),
            }
        };

        let decoder_file = file.decoder.unwrap_or_default();
        let frame_size = decoder_file.frame_size.unwrap_or(DEFAULT_FRAME_SIZE);
        let decoder = DecoderConfig {
            confidence_threshold: decoder_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONF_THRESHOLD),
            frame_size: frame_size as f32,
            classes: ClassWindow {
                offset: decoder_file.class_offset.unwrap_or(DEFAULT_CLASS_OFFSET),
                count: decoder_file.class_count.unwrap_or(DEFAULT_CLASS_COUNT),
            },
        };

        let tensor = {
            let t = file.tensor.unwrap_or_default();
            TensorSettings {
                features: t.features.unwrap_or(DEFAULT_FEATURES),
                slots: t.slots.unwrap_or(DEFAULT_SLOTS),
                input_size: t.input_size.unwrap_or(frame_size),
            }
        };

        let iou_threshold = file
            .suppression
            .and_then(|s| s.iou_threshold)
            .unwrap_or(DEFAULT_IOU_THRESHOLD);

        let driver = {
            let d = file.driver.unwrap_or_default();
            DriverSettings {
                frame_skip: d.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
                watchdog: secs_to_duration(
                    d.watchdog_secs.unwrap_or(DEFAULT_WATCHDOG_SECS),
                    "driver.watchdog_secs",
                )?,
            }
        };

        let projection = {
            let p = file.projection.unwrap_or_default();
            let defaults = PlaneCalibration::default();
            ProjectionSettings {
                space: p.space.unwrap_or_default(),
                extent_axis: p.extent_axis.unwrap_or_default(),
                calibration: PlaneCalibration {
                    frame_size: frame_size as f32,
                    plane_size: p.plane_size.unwrap_or(defaults.plane_size),
                    plane_distance: p.plane_distance.unwrap_or(defaults.plane_distance),
                    offset: p
                        .offset
                        .map(|[x, y]| Vector2::new(x, y))
                        .unwrap_or(defaults.offset),
                },
            }
        };

        let pool_batch = file
            .pool
            .and_then(|p| p.batch_size)
            .unwrap_or(DEFAULT_POOL_BATCH);

        let classes = file
            .classes
            .unwrap_or_else(|| default_classes(decoder.classes.count));

        let source = {
            let s = file.source.unwrap_or_default();
            SourceSettings {
                url: s.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: s.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: s.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: s.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            }
        };

        Ok(Self {
            backend,
            tensor,
            decoder,
            iou_threshold,
            driver,
            projection,
            pool_batch,
            orientation: file.orientation.unwrap_or_default(),
            classes,
            source,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(kind) = std::env::var("OVERLAY_BACKEND") {
            if !kind.trim().is_empty() {
                self.backend.kind = BackendKind::parse(&kind)?;
            }
        }
        if let Ok(path) = std::env::var("OVERLAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.backend.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("OVERLAY_CONF_THRESHOLD") {
            self.decoder.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_CONF_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("OVERLAY_IOU_THRESHOLD") {
            self.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_IOU_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("OVERLAY_FRAME_SKIP") {
            self.driver.frame_skip = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_FRAME_SKIP must be a positive integer"))?;
        }
        if let Ok(value) = std::env::var("OVERLAY_WATCHDOG_SECS") {
            let secs: f64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_WATCHDOG_SECS must be a number of seconds"))?;
            self.driver.watchdog = secs_to_duration(secs, "OVERLAY_WATCHDOG_SECS")?;
        }
        if let Ok(url) = std::env::var("OVERLAY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        Ok(())
    }

    /// Check ranges and cross-field constraints; `load` runs this last.
    pub fn validate(&self) -> Result<()> {
        let conf = self.decoder.confidence_threshold;
        if !(0.0..=1.0).contains(&conf) {
            return Err(anyhow!("confidence threshold {} must be within [0, 1]", conf));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!(
                "IoU threshold {} must be within [0, 1]",
                self.iou_threshold
            ));
        }
        if self.decoder.frame_size <= 0.0 {
            return Err(anyhow!("frame size must be greater than zero"));
        }
        if self.tensor.input_size == 0 {
            return Err(anyhow!("tensor input size must be greater than zero"));
        }
        let window = self.decoder.classes;
        if window.offset < 4 || window.count == 0 || window.offset + window.count > self.tensor.features {
            return Err(anyhow!(
                "class window {}..{} must start at or after channel 4 and fit {} features",
                window.offset,
                window.offset + window.count,
                self.tensor.features
            ));
        }
        if self.tensor.slots == 0 {
            return Err(anyhow!("tensor slot count must be greater than zero"));
        }
        if self.driver.frame_skip == 0 {
            return Err(anyhow!("frame skip must be at least 1"));
        }
        if self.pool_batch == 0 {
            return Err(anyhow!("pool batch size must be at least 1"));
        }
        let calibration = &self.projection.calibration;
        if !(calibration.plane_size > 0.0) {
            return Err(anyhow!("plane size must be greater than zero"));
        }
        if let OrientationPolicy::Smooth {
            smooth_time,
            update_interval,
            ..
        } = self.orientation
        {
            if !(smooth_time > 0.0) {
                return Err(anyhow!("orientation smooth time must be greater than zero"));
            }
            if update_interval == 0 {
                return Err(anyhow!("orientation update interval must be at least 1"));
            }
        }
        for (class_id, asset) in self.classes.iter().enumerate() {
            if !(asset.native_width > 0.0) {
                return Err(anyhow!(
                    "class {} ({}) native width must be positive",
                    class_id,
                    asset.name
                ));
            }
        }
        if !(self.backend.jitter >= 0.0) || !self.backend.jitter.is_finite() {
            return Err(anyhow!(
                "synthetic jitter {} must be a finite non-negative pixel count",
                self.backend.jitter
            ));
        }
        if self.backend.kind == BackendKind::Tract && self.backend.model_path.is_none() {
            return Err(anyhow!("tract backend requires a model path"));
        }
        Ok(())
    }
}

fn default_classes(count: usize) -> Vec<ClassAsset> {
    (0..count)
        .map(|class_id| ClassAsset {
            name: format!("class{}", class_id),
            sprite: format!("sprites/class{}.png", class_id),
            native_width: 1.0,
            cue: Some(format!("cues/class{}.wav", class_id)),
        })
        .collect()
}

fn secs_to_duration(secs: f64, field: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", field));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
