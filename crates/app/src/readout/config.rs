//! Configuration for the depth readout.
//!
//! Translates CLI arguments into a `ReadoutConfig`. The camera settings are
//! fixed: HD1080 capture, performance depth, millimeter units, standard
//! sensing.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use stereo_ingest::{
    CameraResolution, DepthMode, InitParameters, InputType, RuntimeParameters, SensingMode,
    StereoCalibration, Unit,
};

use crate::readout::telemetry::TelemetryOptions;

/// Where annotated frames are shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    /// "Image Left" / "Image Right" HighGUI windows.
    Windows,
    /// No windows; quits after `max_frames` when set.
    Headless { max_frames: Option<u64> },
}

#[derive(Clone, Debug)]
pub struct ReadoutConfig {
    pub init: InitParameters,
    pub runtime: RuntimeParameters,
    pub display: DisplayMode,
    /// Log every center reading.
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by `depth-sensing`.
#[derive(Debug, Args)]
pub struct ReadoutCliArgs {
    /// Recorded side-by-side video, device index or `/dev/videoN`, or
    /// `synthetic[://<mm>]`. Defaults to device 0.
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,
    /// Stereo calibration JSON (fx, fy, cx, cy, baseline, width, height).
    #[arg(long = "calibration", value_name = "PATH")]
    pub calibration: Option<PathBuf>,
    /// Log frames instead of opening windows.
    #[arg(long = "headless", action = clap::ArgAction::SetTrue)]
    pub headless: bool,
    /// Quit after this many frames (headless only).
    #[arg(long = "max-frames", value_name = "N", requires = "headless")]
    pub max_frames: Option<u64>,
    /// Log every center reading.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-listen", value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,
}

impl TryFrom<ReadoutCliArgs> for ReadoutConfig {
    type Error = anyhow::Error;

    fn try_from(args: ReadoutCliArgs) -> Result<Self> {
        let calibration = args
            .calibration
            .as_deref()
            .map(|path| {
                StereoCalibration::load(path)
                    .with_context(|| format!("failed to load calibration {}", path.display()))
            })
            .transpose()?;

        if args.max_frames == Some(0) {
            bail!("--max-frames must be at least 1");
        }
        let display = if args.headless {
            DisplayMode::Headless {
                max_frames: args.max_frames,
            }
        } else {
            DisplayMode::Windows
        };

        let init = InitParameters {
            input: InputType::from_arg(args.input.as_deref()),
            camera_resolution: CameraResolution::Hd1080,
            depth_mode: DepthMode::Performance,
            coordinate_units: Unit::Millimeter,
            calibration,
        };
        let runtime = RuntimeParameters {
            sensing_mode: SensingMode::Standard,
        };

        Ok(Self {
            init,
            runtime,
            display,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                metrics_listen: args.metrics_listen,
            },
        })
    }
}
