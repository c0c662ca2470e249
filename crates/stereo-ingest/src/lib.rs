//! Stereo depth camera ingest.
//!
//! Sources deliver a left/right image pair plus a registered point cloud per
//! grab. The OpenCV-backed camera is available with the `with-opencv` feature;
//! the synthetic source is always built.

pub mod calibration;
#[cfg(feature = "with-opencv")]
pub mod camera;
pub mod params;
pub mod reconstruction;
pub mod synthetic;
pub mod types;

pub use calibration::{CalibrationError, StereoCalibration};
pub use params::{
    CameraResolution, DepthMode, InitParameters, InputType, RuntimeParameters, SensingMode, Unit,
    parse_device_index,
};
pub use synthetic::SyntheticStereoSource;
pub use types::{
    DepthMap, ErrorCode, FrameSet, GrabError, OpenError, PointCloud, PointSample, Resolution,
    center_point_sample,
};

/// An opened stereo camera.
pub trait StereoSource {
    /// Native per-eye resolution of the sensor.
    fn camera_resolution(&self) -> Resolution;

    /// Capture one stereo pair and retrieve images, depth and point cloud at `size`.
    fn grab(&mut self, runtime: &RuntimeParameters, size: Resolution)
    -> Result<FrameSet, GrabError>;

    /// Release the device. Further grabs fail.
    fn close(&mut self);
}

impl<S: StereoSource + ?Sized> StereoSource for Box<S> {
    fn camera_resolution(&self) -> Resolution {
        (**self).camera_resolution()
    }

    fn grab(
        &mut self,
        runtime: &RuntimeParameters,
        size: Resolution,
    ) -> Result<FrameSet, GrabError> {
        (**self).grab(runtime, size)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Open the source described by `init`.
pub fn open(init: &InitParameters) -> Result<Box<dyn StereoSource>, OpenError> {
    let calibration = match init.calibration {
        Some(calibration) => calibration,
        None => StereoCalibration::for_resolution(init.camera_resolution),
    };
    calibration
        .validate()
        .map_err(|err| OpenError::new(ErrorCode::InvalidCalibration, err.to_string()))?;

    match &init.input {
        InputType::Synthetic { depth_mm } => Ok(Box::new(SyntheticStereoSource::new(
            calibration,
            *depth_mm,
            init.depth_mode,
            init.coordinate_units,
        ))),
        #[cfg(feature = "with-opencv")]
        InputType::Device(_) | InputType::Recording(_) => Ok(Box::new(
            camera::OpenCvStereoCamera::open(init, calibration)?,
        )),
        #[cfg(not(feature = "with-opencv"))]
        other => Err(OpenError::new(
            ErrorCode::BackendUnavailable,
            format!(
                "{} requires the `with-opencv` feature",
                other.describe()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_synthetic_source() {
        let init = InitParameters {
            input: InputType::Synthetic { depth_mm: 2000.0 },
            ..InitParameters::default()
        };
        let mut source = open(&init).unwrap();
        assert_eq!(source.camera_resolution(), Resolution::new(1920, 1080));
        let frames = source
            .grab(&RuntimeParameters::default(), Resolution::new(960, 540))
            .unwrap();
        let p = center_point_sample(&frames);
        assert!((p.z - 2000.0).abs() < 1.0);
    }

    #[test]
    fn rejects_invalid_calibration() {
        let mut calibration = StereoCalibration::for_resolution(CameraResolution::Hd720);
        calibration.baseline = -1.0;
        let init = InitParameters {
            input: InputType::Synthetic { depth_mm: 900.0 },
            calibration: Some(calibration),
            ..InitParameters::default()
        };
        let err = open(&init).err().unwrap();
        assert_eq!(err.code, ErrorCode::InvalidCalibration);
    }

    #[cfg(not(feature = "with-opencv"))]
    #[test]
    fn live_input_needs_opencv_backend() {
        let err = open(&InitParameters::default()).err().unwrap();
        assert_eq!(err.code, ErrorCode::BackendUnavailable);
    }
}
