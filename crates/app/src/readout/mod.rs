//! Live stereo depth readout: grab a stereo pair, measure the distance at the
//! image center, print it on the left view and show both views.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: The grab → annotate → display state machine.
//! - `annotation`: Distance computation and text overlay.
//! - `display`: HighGUI and headless display sinks.
//! - `telemetry`: Tracing subscriber and Prometheus exporter.

pub use config::{DisplayMode, ReadoutCliArgs, ReadoutConfig};
/// Launch the readout with a ready-made configuration.
pub use pipeline::run;

mod annotation;
mod config;
mod display;
mod pipeline;
mod telemetry;
