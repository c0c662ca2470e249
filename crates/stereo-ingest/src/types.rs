use std::fmt;

use anyhow::Error;
use image::RgbaImage;
use thiserror::Error;

/// Width and height of an image or measure, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Integer-halved resolution used for the preview and point cloud.
    pub fn halved(self) -> Self {
        Self {
            width: self.width / 2,
            height: self.height / 2,
        }
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixel coordinate of the image center, rounding halves to even.
    pub fn center(self) -> (u32, u32) {
        let x = (f64::from(self.width) / 2.0).round_ties_even() as u32;
        let y = (f64::from(self.height) / 2.0).round_ties_even() as u32;
        (x, y)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One point-cloud value: X, Y, Z in the configured unit plus a packed RGBA word.
///
/// X, Y and Z are NaN or infinite wherever depth could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rgba: f32,
}

impl PointSample {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, rgba: 0.0 }
    }

    pub fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN, f32::NAN)
    }
}

impl From<[f32; 4]> for PointSample {
    fn from(v: [f32; 4]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            z: v[2],
            rgba: v[3],
        }
    }
}

/// Row-major grid of `[X, Y, Z, rgba]` values registered to the left image.
#[derive(Clone, Debug)]
pub struct PointCloud {
    resolution: Resolution,
    data: Vec<[f32; 4]>,
}

impl PointCloud {
    pub fn new(resolution: Resolution, data: Vec<[f32; 4]>) -> Option<Self> {
        (data.len() == resolution.pixel_count()).then_some(Self { resolution, data })
    }

    pub fn filled(resolution: Resolution, value: [f32; 4]) -> Self {
        Self {
            resolution,
            data: vec![value; resolution.pixel_count()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn value_at(&self, x: u32, y: u32) -> Option<PointSample> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let idx = y as usize * self.resolution.width as usize + x as usize;
        self.data.get(idx).copied().map(PointSample::from)
    }

    pub fn as_slice(&self) -> &[[f32; 4]] {
        &self.data
    }
}

/// Per-pixel Z measure in the configured unit; NaN where unknown.
#[derive(Clone, Debug)]
pub struct DepthMap {
    resolution: Resolution,
    data: Vec<f32>,
}

impl DepthMap {
    pub fn new(resolution: Resolution, data: Vec<f32>) -> Option<Self> {
        (data.len() == resolution.pixel_count()).then_some(Self { resolution, data })
    }

    /// Extract the Z channel from a point cloud.
    pub fn from_point_cloud(cloud: &PointCloud) -> Self {
        Self {
            resolution: cloud.resolution(),
            data: cloud.as_slice().iter().map(|p| p[2]).collect(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn value_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        self.data
            .get(y as usize * self.resolution.width as usize + x as usize)
            .copied()
    }
}

/// Everything retrieved after one successful grab.
pub struct FrameSet {
    pub left: RgbaImage,
    pub right: RgbaImage,
    pub depth: DepthMap,
    pub point_cloud: PointCloud,
    pub timestamp_ms: i64,
}

impl FrameSet {
    /// Image resolution the set was retrieved at.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.left.width(), self.left.height())
    }
}

/// Read the point-cloud value under the center pixel of the left image.
///
/// Returns an all-NaN sample when the point cloud does not cover that pixel.
pub fn center_point_sample(frames: &FrameSet) -> PointSample {
    let (x, y) = frames.resolution().center();
    frames
        .point_cloud
        .value_at(x, y)
        .unwrap_or_else(PointSample::invalid)
}

/// Status codes reported when a camera cannot be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    CameraNotDetected,
    InvalidRecording,
    InvalidCalibration,
    BackendUnavailable,
}

#[derive(Debug, Error)]
#[error("{code:?}: {detail}")]
pub struct OpenError {
    pub code: ErrorCode,
    pub detail: String,
}

impl OpenError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("no frame available")]
    NoFrame,
    #[error("end of recording reached")]
    EndOfRecording,
    #[error("camera backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Other(#[from] Error),
}
