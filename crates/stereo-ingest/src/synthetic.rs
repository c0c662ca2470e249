//! Rendered stereo source: a textured fronto-parallel plane at a fixed depth.

use chrono::Utc;
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::{
    StereoSource,
    calibration::StereoCalibration,
    params::{DepthMode, RuntimeParameters, Unit},
    reconstruction::reproject,
    types::{DepthMap, FrameSet, GrabError, Resolution},
};

/// Texture period in pixels along each axis.
const TILE: u32 = 16;

pub struct SyntheticStereoSource {
    calibration: StereoCalibration,
    depth_mm: f32,
    depth_mode: DepthMode,
    unit: Unit,
    frame_index: u64,
    closed: bool,
}

impl SyntheticStereoSource {
    pub fn new(
        calibration: StereoCalibration,
        depth_mm: f32,
        depth_mode: DepthMode,
        unit: Unit,
    ) -> Self {
        Self {
            calibration,
            depth_mm,
            depth_mode,
            unit,
            frame_index: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Disparity the plane produces at `size`, or `None` when it is outside
    /// the matcher's search range (plane too close).
    fn plane_disparity(&self, calibration: &StereoCalibration) -> Option<f32> {
        let d = calibration.disparity_for_depth(self.depth_mm);
        (d.is_finite() && d > 0.0 && d < self.depth_mode.num_disparities() as f32).then_some(d)
    }

    fn render(&self, size: Resolution, shift: f32) -> RgbaImage {
        let scroll = (self.frame_index % u64::from(TILE)) as f32;
        RgbaImage::from_fn(size.width, size.height, |u, v| {
            texel(u as f32 + shift + scroll, v as f32)
        })
    }
}

fn texel(u: f32, v: f32) -> Rgba<u8> {
    let cu = (u.floor() as i64).div_euclid(i64::from(TILE));
    let cv = (v.floor() as i64).div_euclid(i64::from(TILE));
    let hash = (cu.wrapping_mul(73_856_093) ^ cv.wrapping_mul(19_349_663)) as u64;
    let shade = (hash % 200) as u8 + 40;
    Rgba([shade, shade / 2 + 60, 255 - shade, 255])
}

impl StereoSource for SyntheticStereoSource {
    fn camera_resolution(&self) -> Resolution {
        self.calibration.resolution()
    }

    fn grab(
        &mut self,
        runtime: &RuntimeParameters,
        size: Resolution,
    ) -> Result<FrameSet, GrabError> {
        if self.closed {
            return Err(GrabError::Backend("source closed".into()));
        }
        if size.width == 0 || size.height == 0 {
            return Err(GrabError::Backend(format!("invalid retrieve size {size}")));
        }

        let calibration = self.calibration.scaled_to(size);
        let disparity = self.plane_disparity(&calibration);
        let left = self.render(size, 0.0);
        let right = self.render(size, disparity.unwrap_or(0.0));

        // Left pixels whose match falls off the right image stay unmatched.
        let disparity_map: Vec<f32> = (0..size.pixel_count())
            .map(|idx| {
                let u = (idx % size.width as usize) as f32;
                match disparity {
                    Some(d) if u >= d => d,
                    _ => f32::NAN,
                }
            })
            .collect();

        let point_cloud = reproject(
            &disparity_map,
            size,
            &calibration,
            self.unit,
            runtime.sensing_mode,
            &left,
        );
        let depth = DepthMap::from_point_cloud(&point_cloud);
        self.frame_index = self.frame_index.wrapping_add(1);
        debug!(frame = self.frame_index, ?disparity, "synthetic grab");

        Ok(FrameSet {
            left,
            right,
            depth,
            point_cloud,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
