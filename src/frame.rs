//! Camera frames and model input preparation.
//!
//! - `CameraFrame`: RGB24 pixels plus the camera pose they were captured at.
//! - `frame_to_tensor`: centre-crop, nearest-neighbour resize, CHW `[0, 1]`.
//! - `FrameSource`: frame delivery seam. `stub://` URLs open a synthetic
//!   source that pans slowly so the overlay sees orientation changes.

use anyhow::{anyhow, Result};
use nalgebra::{UnitQuaternion, Vector3};
use ndarray::Array4;

use crate::config::SourceSettings;
use crate::projection::CameraPose;

/// Degrees per second the synthetic camera turns about its vertical axis.
const SYNTHETIC_PAN_DEG_PER_SEC: f32 = 6.0;

pub struct CameraFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pose: CameraPose,
    /// Seconds since the source started.
    pub timestamp: f64,
}

impl CameraFrame {
    /// Wrap an RGB24 buffer. The length must be `width * height * 3`.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        pose: CameraPose,
        timestamp: f64,
    ) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            pose,
            timestamp,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

/// Build a `[1, 3, size, size]` model input from the centred square of `frame`.
pub fn frame_to_tensor(frame: &CameraFrame, size: usize) -> Result<Array4<f32>> {
    if size == 0 {
        return Err(anyhow!("tensor size must be greater than zero"));
    }
    let w = frame.width as usize;
    let h = frame.height as usize;
    if w == 0 || h == 0 {
        return Err(anyhow!("cannot preprocess an empty {}x{} frame", w, h));
    }
    if frame.pixels.len() != w * h * 3 {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            w * h * 3,
            frame.pixels.len()
        ));
    }

    let side = w.min(h);
    let x0 = (w - side) / 2;
    let y0 = (h - side) / 2;
    // nearest source index for each output column/row
    let lookup: Vec<usize> = (0..size)
        .map(|i| (((2 * i + 1) * side) / (2 * size)).min(side - 1))
        .collect();

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (oy, &sy) in lookup.iter().enumerate() {
        let row = (y0 + sy) * w;
        for (ox, &sx) in lookup.iter().enumerate() {
            let base = (row + x0 + sx) * 3;
            for c in 0..3 {
                tensor[[0, c, oy, ox]] = f32::from(frame.pixels[base + c]) / 255.0;
            }
        }
    }
    Ok(tensor)
}

/// Delivers camera frames to the driver loop.
pub trait FrameSource {
    /// Next frame, or `None` once the source is closed or exhausted.
    fn next_frame(&mut self) -> Result<Option<CameraFrame>>;

    /// Stop delivering frames. Idempotent.
    fn close(&mut self);
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())?));
    }
    Err(anyhow!(
        "unsupported frame source {:?}; only stub:// sources are available",
        settings.url
    ))
}

pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-empty frame, got {}x{}",
                settings.width,
                settings.height
            ));
        }
        if settings.target_fps == 0 {
            return Err(anyhow!("synthetic source target_fps must be greater than zero"));
        }
        rgb_len(settings.width, settings.height)?;
        log::info!(
            "SyntheticSource: {} at {}x{} {} fps",
            settings.url,
            settings.width,
            settings.height,
            settings.target_fps
        );
        Ok(Self {
            settings,
            frame_count: 0,
            closed: false,
        })
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.settings.width * self.settings.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        if self.closed {
            return Ok(None);
        }
        let timestamp = self.frame_count as f64 / f64::from(self.settings.target_fps);
        let yaw = (timestamp as f32 * SYNTHETIC_PAN_DEG_PER_SEC).to_radians();
        let pose = CameraPose {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::from_euler_angles(0.0, yaw, 0.0),
        };
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        CameraFrame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            pose,
            timestamp,
        )
        .map(Some)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!(
                "SyntheticSource: closed {} after {} frames",
                self.settings.url,
                self.frame_count
            );
        }
    }
}
