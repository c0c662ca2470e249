//! Camera open-time and per-grab parameters.

use std::path::PathBuf;

use crate::{calibration::StereoCalibration, types::Resolution};

/// Plane depth used by `synthetic` inputs that do not name one, in millimeters.
pub const DEFAULT_SYNTHETIC_DEPTH_MM: f32 = 1500.0;

/// Where frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum InputType {
    /// Live side-by-side UVC device, by index.
    Device(i32),
    /// Pre-recorded side-by-side video file.
    Recording(PathBuf),
    /// Rendered textured plane at a fixed depth in millimeters.
    Synthetic { depth_mm: f32 },
}

impl Default for InputType {
    fn default() -> Self {
        InputType::Device(0)
    }
}

impl InputType {
    /// Interpret the optional positional input argument.
    pub fn from_arg(arg: Option<&str>) -> Self {
        let Some(arg) = arg else {
            return InputType::default();
        };
        if let Some(index) = parse_device_index(arg) {
            return InputType::Device(index);
        }
        if arg == "synthetic" {
            return InputType::Synthetic {
                depth_mm: DEFAULT_SYNTHETIC_DEPTH_MM,
            };
        }
        if let Some(depth) = arg.strip_prefix("synthetic://") {
            if let Ok(depth_mm) = depth.parse::<f32>() {
                if depth_mm.is_finite() && depth_mm > 0.0 {
                    return InputType::Synthetic { depth_mm };
                }
            }
        }
        InputType::Recording(PathBuf::from(arg))
    }

    pub fn describe(&self) -> String {
        match self {
            InputType::Device(index) => format!("device #{index}"),
            InputType::Recording(path) => format!("recording {}", path.display()),
            InputType::Synthetic { depth_mm } => format!("synthetic plane at {depth_mm} mm"),
        }
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

/// Native per-eye sensor resolution classes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraResolution {
    Hd2k,
    #[default]
    Hd1080,
    Hd720,
    Vga,
}

impl CameraResolution {
    pub fn size(self) -> Resolution {
        match self {
            CameraResolution::Hd2k => Resolution::new(2208, 1242),
            CameraResolution::Hd1080 => Resolution::new(1920, 1080),
            CameraResolution::Hd720 => Resolution::new(1280, 720),
            CameraResolution::Vga => Resolution::new(672, 376),
        }
    }
}

/// Depth computation tier; trades accuracy for speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthMode {
    #[default]
    Performance,
    Quality,
    Ultra,
}

impl DepthMode {
    /// Disparity search range in pixels. Always a multiple of 16.
    pub fn num_disparities(self) -> i32 {
        match self {
            DepthMode::Performance => 64,
            DepthMode::Quality => 96,
            DepthMode::Ultra => 128,
        }
    }

    /// Matching block size in pixels. Always odd.
    pub fn block_size(self) -> i32 {
        match self {
            DepthMode::Performance => 9,
            DepthMode::Quality => 7,
            DepthMode::Ultra => 5,
        }
    }
}

/// Unit of point-cloud and depth values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Unit {
    #[default]
    Millimeter,
    Centimeter,
    Meter,
}

impl Unit {
    /// Multiply a millimeter value by this to express it in `self`.
    pub fn scale_from_mm(self) -> f32 {
        match self {
            Unit::Millimeter => 1.0,
            Unit::Centimeter => 0.1,
            Unit::Meter => 0.001,
        }
    }
}

/// Post-processing policy applied to the disparity map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SensingMode {
    /// Leave unmatched pixels empty.
    #[default]
    Standard,
    /// Fill unmatched pixels from the nearest match on the same row.
    Fill,
}

/// Parameters fixed when the camera is opened.
#[derive(Clone, Debug, Default)]
pub struct InitParameters {
    pub input: InputType,
    pub camera_resolution: CameraResolution,
    pub depth_mode: DepthMode,
    pub coordinate_units: Unit,
    /// Overrides the built-in calibration for `camera_resolution`.
    pub calibration: Option<StereoCalibration>,
}

/// Parameters applied to every grab.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeParameters {
    pub sensing_mode: SensingMode,
}
