//! OpenCV-backed side-by-side stereo camera.
//!
//! UVC stereo cameras deliver both eyes in one frame, left eye in the left
//! half. Recorded files use the same layout. Disparity comes from semi-global
//! block matching and is triangulated with the configured calibration.

use std::path::Path;

use chrono::Utc;
use image::RgbaImage;
use opencv::{
    calib3d::{self, StereoSGBM},
    core::{self, Mat, Ptr, Rect},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, info, warn};

use crate::{
    StereoSource,
    calibration::StereoCalibration,
    params::{DepthMode, InitParameters, InputType, RuntimeParameters, Unit},
    reconstruction::reproject,
    types::{DepthMap, ErrorCode, FrameSet, GrabError, OpenError, Resolution},
};

const CAPTURE_FPS: f64 = 30.0;

pub struct OpenCvStereoCamera {
    cap: Option<VideoCapture>,
    matcher: Ptr<StereoSGBM>,
    calibration: StereoCalibration,
    native: Resolution,
    unit: Unit,
    is_recording: bool,
    raw: Mat,
}

impl OpenCvStereoCamera {
    pub fn open(init: &InitParameters, calibration: StereoCalibration) -> Result<Self, OpenError> {
        let requested = init.camera_resolution.size();
        let (mut cap, is_recording) = match &init.input {
            InputType::Device(index) => (open_device(*index)?, false),
            InputType::Recording(path) => (open_recording(path)?, true),
            InputType::Synthetic { .. } => {
                return Err(OpenError::new(
                    ErrorCode::BackendUnavailable,
                    "synthetic input is not served by the OpenCV camera",
                ));
            }
        };

        if !is_recording {
            configure_camera(&mut cap, requested, CAPTURE_FPS);
        }
        let native = negotiated_resolution(&cap).unwrap_or(requested);
        if native != requested {
            warn!(%requested, %native, "camera negotiated a different per-eye resolution");
        }

        let matcher = create_matcher(init.depth_mode).map_err(|err| {
            OpenError::new(
                ErrorCode::BackendUnavailable,
                format!("failed to create stereo matcher: {err}"),
            )
        })?;

        info!(input = %init.input.describe(), %native, "stereo camera opened");

        Ok(Self {
            cap: Some(cap),
            matcher,
            calibration,
            native,
            unit: init.coordinate_units,
            is_recording,
            raw: Mat::default(),
        })
    }

    fn read_raw(&mut self) -> Result<(), GrabError> {
        let cap = self
            .cap
            .as_mut()
            .ok_or_else(|| GrabError::Backend("camera closed".into()))?;
        let ok = cap.read(&mut self.raw).map_err(backend)?;
        if ok && self.raw.cols() > 1 && self.raw.rows() > 0 {
            return Ok(());
        }
        if self.is_recording {
            debug!("recording exhausted; rewinding");
            let _ = cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0);
            return Err(GrabError::EndOfRecording);
        }
        Err(GrabError::NoFrame)
    }
}

impl StereoSource for OpenCvStereoCamera {
    fn camera_resolution(&self) -> Resolution {
        self.native
    }

    fn grab(
        &mut self,
        runtime: &RuntimeParameters,
        size: Resolution,
    ) -> Result<FrameSet, GrabError> {
        self.read_raw()?;

        let eye_width = self.raw.cols() / 2;
        let eye_height = self.raw.rows();
        let left_bgr = eye(&self.raw, 0, eye_width, eye_height, size)?;
        let right_bgr = eye(&self.raw, eye_width, eye_width, eye_height, size)?;

        let disparity = compute_disparity(&mut self.matcher, &left_bgr, &right_bgr)?;
        let left = to_rgba(&left_bgr, size)?;
        let right = to_rgba(&right_bgr, size)?;

        let calibration = self.calibration.scaled_to(size);
        let point_cloud = reproject(
            &disparity,
            size,
            &calibration,
            self.unit,
            runtime.sensing_mode,
            &left,
        );
        let depth = DepthMap::from_point_cloud(&point_cloud);

        Ok(FrameSet {
            left,
            right,
            depth,
            point_cloud,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    fn close(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(err) = cap.release() {
                warn!("failed to release capture: {err}");
            }
        }
    }
}

impl Drop for OpenCvStereoCamera {
    fn drop(&mut self) {
        self.close();
    }
}

fn backend(err: opencv::Error) -> GrabError {
    GrabError::Backend(err.to_string())
}

fn open_device(index: i32) -> Result<VideoCapture, OpenError> {
    for api in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, api) {
            Ok(cap) => {
                if cap.is_opened().unwrap_or(false) {
                    return Ok(cap);
                }
            }
            Err(err) => {
                debug!("failed to open device #{index} with backend {api}: {err}");
            }
        }
    }
    Err(OpenError::new(
        ErrorCode::CameraNotDetected,
        format!("no stereo camera at device #{index}"),
    ))
}

fn open_recording(path: &Path) -> Result<VideoCapture, OpenError> {
    if !path.is_file() {
        return Err(OpenError::new(
            ErrorCode::InvalidRecording,
            format!("{} does not exist", path.display()),
        ));
    }
    let uri = path.to_string_lossy();
    match VideoCapture::from_file(&uri, videoio::CAP_ANY) {
        Ok(cap) if cap.is_opened().unwrap_or(false) => Ok(cap),
        Ok(_) => Err(OpenError::new(
            ErrorCode::InvalidRecording,
            format!("{uri} could not be decoded"),
        )),
        Err(err) => Err(OpenError::new(
            ErrorCode::InvalidRecording,
            format!("{uri}: {err}"),
        )),
    }
}

/// Request a side-by-side mode wide enough for both eyes at `eye`.
fn configure_camera(cap: &mut VideoCapture, eye: Resolution, fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(eye.width * 2));
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(eye.height));
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

fn negotiated_resolution(cap: &VideoCapture) -> Option<Resolution> {
    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).ok()?;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()?;
    (width >= 2.0 && height >= 1.0).then(|| Resolution::new(width as u32 / 2, height as u32))
}

fn create_matcher(mode: DepthMode) -> opencv::Result<Ptr<StereoSGBM>> {
    let block = mode.block_size();
    let area = block * block;
    StereoSGBM::create(
        0,
        mode.num_disparities(),
        block,
        8 * area,
        32 * area,
        1,
        63,
        10,
        100,
        32,
        calib3d::StereoSGBM_MODE_SGBM,
    )
}

/// Crop one eye out of the side-by-side frame and resize it to `size`.
fn eye(raw: &Mat, x: i32, width: i32, height: i32, size: Resolution) -> Result<Mat, GrabError> {
    let roi = Mat::roi(raw, Rect::new(x, 0, width, height)).map_err(backend)?;
    let mut resized = Mat::default();
    imgproc::resize(
        &*roi,
        &mut resized,
        core::Size::new(size.width as i32, size.height as i32),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )
    .map_err(backend)?;
    Ok(resized)
}

fn compute_disparity(
    matcher: &mut Ptr<StereoSGBM>,
    left_bgr: &Mat,
    right_bgr: &Mat,
) -> Result<Vec<f32>, GrabError> {
    let mut left_gray = Mat::default();
    let mut right_gray = Mat::default();
    imgproc::cvt_color_def(left_bgr, &mut left_gray, imgproc::COLOR_BGR2GRAY).map_err(backend)?;
    imgproc::cvt_color_def(right_bgr, &mut right_gray, imgproc::COLOR_BGR2GRAY)
        .map_err(backend)?;

    let mut fixed = Mat::default();
    matcher
        .compute(&left_gray, &right_gray, &mut fixed)
        .map_err(backend)?;

    // SGBM emits 16-bit fixed point with four fractional bits.
    let mut disparity = Mat::default();
    fixed
        .convert_to(&mut disparity, core::CV_32F, 1.0 / 16.0, 0.0)
        .map_err(backend)?;
    Ok(disparity.data_typed::<f32>().map_err(backend)?.to_vec())
}

fn to_rgba(bgr: &Mat, size: Resolution) -> Result<RgbaImage, GrabError> {
    let mut rgba = Mat::default();
    imgproc::cvt_color_def(bgr, &mut rgba, imgproc::COLOR_BGR2RGBA).map_err(backend)?;
    let data = rgba.data_bytes().map_err(backend)?.to_vec();
    RgbaImage::from_raw(size.width, size.height, data)
        .ok_or_else(|| GrabError::Backend("retrieved image has unexpected size".into()))
}
