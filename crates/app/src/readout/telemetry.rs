//! Telemetry helpers for tracing spans and Prometheus metrics.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

pub(crate) const FRAMES: &str = "depth_frames_total";
pub(crate) const GRAB_FAILURES: &str = "depth_grab_failures_total";
pub(crate) const DEPTH_UNAVAILABLE: &str = "depth_unavailable_total";
pub(crate) const CENTER_DISTANCE: &str = "depth_center_distance";
pub(crate) const LOOP_FPS: &str = "depth_loop_fps";

static METRICS_LISTENER: OnceLock<SocketAddr> = OnceLock::new();

/// Optional tracing and metrics sinks.
#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing loop spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_listen: Option<SocketAddr>,
}

/// Keeps the subscriber installed and the Chrome trace flushing until dropped.
pub(crate) struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

/// Install the tracing subscriber and, when requested, the metrics exporter.
pub(crate) fn enter_runtime(opts: &TelemetryOptions, verbose: bool) -> Result<TelemetryGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_deref() {
        Some(path) => match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                eprintln!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());
    let default_guard = tracing::subscriber::set_default(
        tracing_subscriber::registry()
            .with(chrome_layer.map(|layer| layer.with_filter(span_only_filter)))
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(fmt::time::uptime())
                    .with_filter(env_filter),
            )
            .with(tracing_error::ErrorLayer::default()),
    );

    if let Some(addr) = opts.metrics_listen {
        install_metrics_exporter(addr)?;
    }

    Ok(TelemetryGuard {
        _default_guard: default_guard,
        _chrome_guard: chrome_guard,
    })
}

/// Start the Prometheus HTTP listener. Later calls are no-ops.
fn install_metrics_exporter(addr: SocketAddr) -> Result<()> {
    if METRICS_LISTENER.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
    let _ = METRICS_LISTENER.set(addr);

    metrics::describe_counter!(FRAMES, "Frames annotated and displayed");
    metrics::describe_counter!(GRAB_FAILURES, "Grabs that returned no frame");
    metrics::describe_counter!(
        DEPTH_UNAVAILABLE,
        "Frames whose center pixel had no depth"
    );
    metrics::describe_gauge!(CENTER_DISTANCE, "Last valid center distance");
    metrics::describe_gauge!(LOOP_FPS, "Smoothed display rate");
    tracing::info!("metrics available at http://{addr}/metrics");
    Ok(())
}

fn build_chrome_layer(
    path: &Path,
) -> Result<
    (
        tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
        tracing_chrome::FlushGuard,
    ),
    std::io::Error,
> {
    let file = std::fs::File::create(path)?;
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}
