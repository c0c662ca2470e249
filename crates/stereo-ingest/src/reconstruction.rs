//! Disparity post-processing and point-cloud reprojection.

use image::RgbaImage;

use crate::{
    calibration::StereoCalibration,
    params::{SensingMode, Unit},
    types::{PointCloud, Resolution},
};

/// Pack an RGBA pixel into the fourth point-cloud channel.
pub fn pack_rgba(pixel: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_le_bytes(pixel))
}

/// Replace unmatched disparities with the nearest valid value on the same row.
///
/// Rows without any valid disparity are left untouched.
pub fn fill_disparity_rows(disparity: &mut [f32], width: usize) {
    if width == 0 {
        return;
    }
    for row in disparity.chunks_mut(width) {
        let mut last_valid: Option<f32> = None;
        let mut pending = 0usize;
        for idx in 0..row.len() {
            let value = row[idx];
            if value.is_finite() && value > 0.0 {
                if pending > 0 {
                    // Leading gaps take this value; inner gaps take the nearer neighbour.
                    let start = idx - pending;
                    for (offset, slot) in row[start..idx].iter_mut().enumerate() {
                        *slot = match last_valid {
                            Some(prev) if offset < pending.div_ceil(2) => prev,
                            _ => value,
                        };
                    }
                    pending = 0;
                }
                last_valid = Some(value);
            } else {
                pending += 1;
            }
        }
        if let Some(prev) = last_valid {
            let len = row.len();
            for slot in &mut row[len - pending..] {
                *slot = prev;
            }
        }
    }
}

/// Triangulate a dense disparity map into a point cloud registered to `left`.
///
/// `disparity` is row-major at `resolution`; `calibration` must already be
/// scaled to that resolution.
pub fn reproject(
    disparity: &[f32],
    resolution: Resolution,
    calibration: &StereoCalibration,
    unit: Unit,
    sensing_mode: SensingMode,
    left: &RgbaImage,
) -> PointCloud {
    let width = resolution.width as usize;
    let mut disparity = disparity.to_vec();
    disparity.resize(resolution.pixel_count(), f32::NAN);
    if sensing_mode == SensingMode::Fill {
        fill_disparity_rows(&mut disparity, width);
    }

    let scale = unit.scale_from_mm();
    let data = disparity
        .iter()
        .enumerate()
        .map(|(idx, &d)| {
            let u = (idx % width.max(1)) as u32;
            let v = (idx / width.max(1)) as u32;
            let [x, y, z] = calibration.triangulate(u as f32, v as f32, d);
            let color = left
                .get_pixel_checked(u, v)
                .map(|p| pack_rgba(p.0))
                .unwrap_or(0.0);
            [x * scale, y * scale, z * scale, color]
        })
        .collect();

    PointCloud::new(resolution, data)
        .unwrap_or_else(|| PointCloud::filled(resolution, [f32::NAN; 4]))
}
