//! Image-space geometry to display/world geometry.
//!
//! A detection box lives in the decoder's square reference frame. The mapper
//! places it on a virtual plane of `plane_size` world units standing
//! `plane_distance` in front of the camera:
//!
//! ```text
//! n      = (pixel / frame_size) * 2 - 1          // [-1, 1]
//! output = n * (plane_size / 2) + offset
//! extent = pixel_extent / frame_size * plane_size
//! ```
//!
//! In [`ProjectionSpace::Camera`] mode the result is a camera-local vector
//! the consumer transforms with its camera pose. In
//! [`ProjectionSpace::World`] mode the mapper bakes the pose in itself.

use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection, Projection};

/// Camera pose for the frame being processed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl CameraPose {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Transform a camera-local point into world space.
    pub fn to_world(&self, local: &Vector3<f32>) -> Vector3<f32> {
        self.position + self.rotation * local
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Which box dimension drives the projected extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtentAxis {
    #[default]
    Width,
    Height,
}

/// Coordinate frame of projected positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionSpace {
    #[default]
    Camera,
    World,
}

/// Static plane calibration constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneCalibration {
    /// Side of the decoder reference frame, in pixels.
    pub frame_size: f32,
    /// Side of the virtual plane, in world units.
    pub plane_size: f32,
    /// Distance of the plane in front of the camera.
    pub plane_distance: f32,
    /// In-plane offset added after scaling.
    pub offset: Vector2<f32>,
}

impl Default for PlaneCalibration {
    fn default() -> Self {
        Self {
            frame_size: 640.0,
            plane_size: 2.0,
            plane_distance: 2.0,
            offset: Vector2::zeros(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projector {
    calibration: PlaneCalibration,
    space: ProjectionSpace,
    extent_axis: ExtentAxis,
}

impl Projector {
    pub fn new(calibration: PlaneCalibration, space: ProjectionSpace, extent_axis: ExtentAxis) -> Self {
        Self {
            calibration,
            space,
            extent_axis,
        }
    }

    /// Map one pixel coordinate to `[-1, 1]`.
    pub fn normalize(&self, pixel: f32) -> f32 {
        (pixel / self.calibration.frame_size) * 2.0 - 1.0
    }

    /// Map a pixel point to in-plane coordinates.
    pub fn map_point(&self, px: f32, py: f32) -> Vector2<f32> {
        let half = self.calibration.plane_size / 2.0;
        Vector2::new(self.normalize(px), self.normalize(py)) * half + self.calibration.offset
    }

    pub fn map_extent(&self, pixel_extent: f32) -> f32 {
        pixel_extent / self.calibration.frame_size * self.calibration.plane_size
    }

    /// Project a box. `pose` is only read in world mode.
    pub fn project(&self, bbox: &BoundingBox, pose: &CameraPose) -> Projection {
        let (cx, cy) = bbox.center();
        let on_plane = self.map_point(cx, cy);
        let local = Vector3::new(on_plane.x, on_plane.y, self.calibration.plane_distance);
        let position = match self.space {
            ProjectionSpace::Camera => local,
            ProjectionSpace::World => pose.to_world(&local),
        };
        let extent = match self.extent_axis {
            ExtentAxis::Width => self.map_extent(bbox.width),
            ExtentAxis::Height => self.map_extent(bbox.height),
        };
        Projection { position, extent }
    }

    pub fn project_detection(&self, detection: Detection, pose: &CameraPose) -> Detection {
        let projection = self.project(detection.bbox(), pose);
        detection.with_projection(projection)
    }
}
