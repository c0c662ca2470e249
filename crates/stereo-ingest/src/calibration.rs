//! Pinhole stereo calibration for a rectified camera pair.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{params::CameraResolution, types::Resolution};

/// Distance between the two optical centers of the default rig, in millimeters.
pub const DEFAULT_BASELINE_MM: f32 = 120.0;

/// Horizontal focal length of the default rig as a fraction of image width.
const DEFAULT_FOCAL_RATIO: f32 = 0.73;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse calibration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid calibration: {0}")]
    Invalid(&'static str),
}

/// Intrinsics of the rectified left camera plus the stereo baseline.
///
/// `width`/`height` record the image size the intrinsics were measured at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    /// Millimeters.
    pub baseline: f32,
    pub width: u32,
    pub height: u32,
}

impl StereoCalibration {
    /// Nominal calibration for a sensor resolution class.
    pub fn for_resolution(resolution: CameraResolution) -> Self {
        let size = resolution.size();
        let focal = size.width as f32 * DEFAULT_FOCAL_RATIO;
        Self {
            fx: focal,
            fy: focal,
            cx: size.width as f32 / 2.0,
            cy: size.height as f32 / 2.0,
            baseline: DEFAULT_BASELINE_MM,
            width: size.width,
            height: size.height,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let calibration: Self =
            serde_json::from_str(&raw).map_err(|source| CalibrationError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(self.fx.is_finite() && self.fx > 0.0 && self.fy.is_finite() && self.fy > 0.0) {
            return Err(CalibrationError::Invalid("focal lengths must be positive"));
        }
        if !(self.baseline.is_finite() && self.baseline > 0.0) {
            return Err(CalibrationError::Invalid("baseline must be positive"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CalibrationError::Invalid("image size must be non-zero"));
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(CalibrationError::Invalid("principal point must be finite"));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Rescale the intrinsics to another image size. The baseline is unchanged.
    pub fn scaled_to(&self, target: Resolution) -> Self {
        let sx = target.width as f32 / self.width as f32;
        let sy = target.height as f32 / self.height as f32;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            baseline: self.baseline,
            width: target.width,
            height: target.height,
        }
    }

    /// Disparity in pixels observed for a point at `depth_mm`.
    pub fn disparity_for_depth(&self, depth_mm: f32) -> f32 {
        self.fx * self.baseline / depth_mm
    }

    /// Back-project pixel `(u, v)` with `disparity` to millimeter X, Y, Z.
    ///
    /// Non-positive or non-finite disparities yield NaN on every axis.
    pub fn triangulate(&self, u: f32, v: f32, disparity: f32) -> [f32; 3] {
        if !(disparity.is_finite() && disparity > 0.0) {
            return [f32::NAN; 3];
        }
        let z = self.fx * self.baseline / disparity;
        let x = (u - self.cx) * z / self.fx;
        let y = (v - self.cy) * z / self.fy;
        [x, y, z]
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn rig() -> StereoCalibration {
        StereoCalibration {
            fx: 700.0,
            fy: 700.0,
            cx: 480.0,
            cy: 270.0,
            baseline: 120.0,
            width: 960,
            height: 540,
        }
    }

    #[test]
    fn triangulates_principal_point_onto_optical_axis() {
        let [x, y, z] = rig().triangulate(480.0, 270.0, 56.0);
        assert_eq!(x, 0.0);
        assert_eq!(y, 0.0);
        assert!((z - 1500.0).abs() < 1e-3);
    }

    #[test]
    fn triangulation_offsets_follow_pinhole_model() {
        let calib = rig();
        let [x, y, z] = calib.triangulate(550.0, 200.0, 84.0);
        assert!((z - 1000.0).abs() < 1e-3);
        assert!((x - 100.0).abs() < 1e-3);
        assert!((y + 100.0).abs() < 1e-3);
    }

    #[test]
    fn invalid_disparity_is_nan() {
        let calib = rig();
        for d in [0.0, -3.0, f32::NAN, f32::INFINITY] {
            assert!(calib.triangulate(10.0, 10.0, d).iter().all(|v| v.is_nan()));
        }
    }

    #[test]
    fn disparity_and_depth_are_inverse() {
        let calib = rig();
        let d = calib.disparity_for_depth(2400.0);
        assert!((calib.triangulate(480.0, 270.0, d)[2] - 2400.0).abs() < 1e-2);
    }

    #[test]
    fn scaling_halves_intrinsics() {
        let full = StereoCalibration::for_resolution(CameraResolution::Hd1080);
        let half = full.scaled_to(full.resolution().halved());
        assert_eq!(half.width, 960);
        assert_eq!(half.height, 540);
        assert!((half.fx - full.fx / 2.0).abs() < 1e-4);
        assert!((half.cy - 270.0).abs() < 1e-4);
        assert_eq!(half.baseline, full.baseline);
    }

    #[test]
    fn load_reads_json_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"fx":700.0,"fy":700.0,"cx":480.0,"cy":270.0,"baseline":120.0,"width":960,"height":540}}"#
        )
        .unwrap();
        assert_eq!(StereoCalibration::load(file.path()).unwrap(), rig());

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(
            bad,
            r#"{{"fx":700.0,"fy":700.0,"cx":480.0,"cy":270.0,"baseline":0.0,"width":960,"height":540}}"#
        )
        .unwrap();
        assert!(matches!(
            StereoCalibration::load(bad.path()),
            Err(CalibrationError::Invalid(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = StereoCalibration::load(Path::new("/nonexistent/calib.json")).unwrap_err();
        assert!(matches!(err, CalibrationError::Io { .. }));
    }
}
