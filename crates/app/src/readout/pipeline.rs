//! Capture loop driving grab → annotate → display until the user quits.
//!
//! The loop is a two-state machine. `tick` performs one iteration and is the
//! only place the state can change; entering `Stopped` releases the display
//! and closes the camera exactly once.

use std::{
    io::{self, Write},
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use stereo_ingest::{
    FrameSet, GrabError, InitParameters, Resolution, RuntimeParameters, StereoSource,
    center_point_sample,
};
use tracing::{debug, error, info, warn};

use crate::readout::{
    DisplayMode, ReadoutConfig,
    annotation::{AnnotateOutcome, OVERLAY_ORIGIN, OVERLAY_STYLE, annotate, text_bounds},
    display::{DisplaySink, HeadlessDisplay, LEFT_WINDOW, RIGHT_WINDOW},
    telemetry,
};

/// ASCII `q`.
pub(crate) const QUIT_KEY: i32 = 113;
pub(crate) const KEY_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoopState {
    Running,
    Stopped,
}

/// Counters reported when the loop stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LoopSummary {
    pub(crate) ticks: u64,
    pub(crate) frames_shown: u64,
    pub(crate) grab_failures: u64,
    pub(crate) depth_unavailable: u64,
}

pub(crate) struct CaptureLoop<S: StereoSource, D: DisplaySink, W: Write> {
    source: S,
    display: D,
    diagnostics: W,
    runtime: RuntimeParameters,
    size: Resolution,
    shutdown: Arc<AtomicBool>,
    state: LoopState,
    summary: LoopSummary,
    failure_streak: u64,
    smoothed_fps: f32,
    last_frame: Option<Instant>,
    verbose: bool,
}

impl<S: StereoSource, D: DisplaySink, W: Write> CaptureLoop<S, D, W> {
    /// Build a running loop. Images and point cloud are retrieved at half the
    /// native camera resolution.
    pub(crate) fn new(
        source: S,
        display: D,
        diagnostics: W,
        runtime: RuntimeParameters,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let size = source.camera_resolution().halved();
        Self {
            source,
            display,
            diagnostics,
            runtime,
            size,
            shutdown,
            state: LoopState::Running,
            summary: LoopSummary::default(),
            failure_streak: 0,
            smoothed_fps: 0.0,
            last_frame: None,
            verbose: false,
        }
    }

    pub(crate) fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Tick until stopped.
    pub(crate) fn run(mut self) -> Result<LoopSummary> {
        info!(size = %self.size, "capture loop running; press 'q' to quit");
        while self.tick()? == LoopState::Running {}
        info!(
            ticks = self.summary.ticks,
            frames = self.summary.frames_shown,
            grab_failures = self.summary.grab_failures,
            depth_unavailable = self.summary.depth_unavailable,
            "capture loop stopped"
        );
        Ok(self.summary)
    }

    /// Run one iteration and return the resulting state.
    pub(crate) fn tick(&mut self) -> Result<LoopState> {
        if self.state == LoopState::Stopped {
            return Ok(LoopState::Stopped);
        }
        if self.shutdown.load(Ordering::SeqCst) {
            info!("shutdown requested");
            self.stop();
            return Ok(self.state);
        }

        self.summary.ticks += 1;
        let span = tracing::info_span!("readout.tick", tick = self.summary.ticks);
        let _guard = span.enter();

        let key = match self.source.grab(&self.runtime, self.size) {
            Ok(frames) => {
                self.recovered();
                self.present(frames)?
            }
            Err(err) => {
                self.grab_failed(&err);
                self.display.wait_key(KEY_POLL_DELAY)?
            }
        };

        if key == Some(QUIT_KEY) {
            debug!("quit key pressed");
            self.stop();
        }
        Ok(self.state)
    }

    fn present(&mut self, frames: FrameSet) -> Result<Option<i32>> {
        let sample = center_point_sample(&frames);
        let FrameSet {
            mut left, right, ..
        } = frames;

        match annotate(&mut left, &sample) {
            AnnotateOutcome::Annotated { distance, text } => {
                metrics::gauge!(telemetry::CENTER_DISTANCE).set(distance);
                if self.verbose {
                    let overlay = text_bounds(&text, OVERLAY_ORIGIN, &OVERLAY_STYLE);
                    debug!(distance = %text, ?overlay, "center distance");
                }
            }
            AnnotateOutcome::DepthUnavailable(diagnostic) => {
                self.summary.depth_unavailable += 1;
                metrics::counter!(telemetry::DEPTH_UNAVAILABLE).increment(1);
                write!(self.diagnostics, "{diagnostic}").context("write diagnostic")?;
            }
        }
        self.diagnostics.flush().context("flush diagnostics")?;

        self.display.show(LEFT_WINDOW, &left)?;
        self.display.show(RIGHT_WINDOW, &right)?;
        self.summary.frames_shown += 1;
        metrics::counter!(telemetry::FRAMES).increment(1);
        self.record_fps();

        self.display.wait_key(KEY_POLL_DELAY)
    }

    fn grab_failed(&mut self, err: &GrabError) {
        self.summary.grab_failures += 1;
        self.failure_streak += 1;
        metrics::counter!(telemetry::GRAB_FAILURES).increment(1);
        if self.failure_streak == 1 {
            warn!("grab failed, retrying: {err}");
        } else {
            debug!(streak = self.failure_streak, "grab failed: {err}");
        }
    }

    fn recovered(&mut self) {
        if self.failure_streak > 0 {
            info!(failed = self.failure_streak, "grabs recovered");
            self.failure_streak = 0;
        }
    }

    fn record_fps(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame.replace(now) {
            let elapsed = now.duration_since(last).as_secs_f32();
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                self.smoothed_fps = if self.smoothed_fps == 0.0 {
                    instant
                } else {
                    0.9 * self.smoothed_fps + 0.1 * instant
                };
                metrics::gauge!(telemetry::LOOP_FPS).set(self.smoothed_fps as f64);
            }
        }
        if self.summary.frames_shown % 30 == 0 {
            debug!(
                frame = self.summary.frames_shown,
                fps = self.smoothed_fps,
                "capture heartbeat"
            );
        }
    }

    fn stop(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopped;
        self.display.close();
        self.source.close();
    }
}

impl<S: StereoSource, D: DisplaySink, W: Write> Drop for CaptureLoop<S, D, W> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the configured camera, reporting the status code on `console` when it fails.
pub(crate) fn open_source(
    init: &InitParameters,
    console: &mut impl Write,
) -> Result<Box<dyn StereoSource>> {
    match stereo_ingest::open(init) {
        Ok(source) => Ok(source),
        Err(err) => {
            error!("failed to open {}: {err}", init.input.describe());
            if let Err(write_err) =
                writeln!(console, "{:?}", err.code).and_then(|()| console.flush())
            {
                warn!("failed to report camera status: {write_err}");
            }
            Err(anyhow::Error::new(err).context("failed to open camera"))
        }
    }
}

fn open_display(mode: DisplayMode) -> Result<Box<dyn DisplaySink>> {
    match mode {
        DisplayMode::Headless { max_frames } => Ok(Box::new(HeadlessDisplay::new(max_frames))),
        #[cfg(feature = "with-opencv")]
        DisplayMode::Windows => Ok(Box::new(crate::readout::display::HighGuiDisplay::new())),
        #[cfg(not(feature = "with-opencv"))]
        DisplayMode::Windows => {
            anyhow::bail!("window display requires the `with-opencv` feature; pass --headless")
        }
    }
}

fn install_ctrlc_handler(shutdown: &Arc<AtomicBool>) {
    static CTRL_HANDLER: Once = Once::new();
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
}

/// Run the depth readout until the quit key or Ctrl+C.
pub fn run(config: ReadoutConfig) -> Result<()> {
    let _telemetry = telemetry::enter_runtime(&config.telemetry, config.verbose)?;
    let span = tracing::info_span!(
        "readout",
        input = %config.init.input.describe(),
        resolution = ?config.init.camera_resolution,
        depth_mode = ?config.init.depth_mode,
        unit = ?config.init.coordinate_units,
    );
    let _span_guard = span.enter();

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(&shutdown);

    let source = open_source(&config.init, &mut io::stdout())?;
    info!(
        native = %source.camera_resolution(),
        output = %source.camera_resolution().halved(),
        "camera opened"
    );
    let display = open_display(config.display)?;

    let summary = CaptureLoop::new(source, display, io::stdout(), config.runtime, shutdown)
        .verbose(config.verbose)
        .run()?;
    if summary.frames_shown == 0 && summary.grab_failures > 0 {
        warn!("no frame was grabbed successfully");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    use image::{Rgba, RgbaImage};
    use stereo_ingest::{
        CameraResolution, DepthMap, DepthMode, ErrorCode, InputType, PointCloud, PointSample,
        StereoCalibration, SyntheticStereoSource, Unit,
    };

    use super::*;
    use crate::readout::annotation::Diagnostic;

    const BACKGROUND: Rgba<u8> = Rgba([0, 0, 64, 255]);

    #[derive(Default)]
    struct Log {
        grabs: u64,
        shown: Vec<(String, RgbaImage)>,
        key_polls: u64,
        display_closed: u32,
        source_closed: u32,
        diagnostics: Vec<u8>,
    }

    type Shared = Rc<RefCell<Log>>;

    /// Yields scripted grabs; each `Ok` carries the center sample to report.
    struct FakeSource {
        script: VecDeque<Result<PointSample, GrabError>>,
        log: Shared,
    }

    impl StereoSource for FakeSource {
        fn camera_resolution(&self) -> Resolution {
            Resolution::new(400, 200)
        }

        fn grab(
            &mut self,
            _runtime: &RuntimeParameters,
            size: Resolution,
        ) -> Result<FrameSet, GrabError> {
            self.log.borrow_mut().grabs += 1;
            let sample = self.script.pop_front().unwrap_or(Err(GrabError::NoFrame))?;
            let value = [sample.x, sample.y, sample.z, 0.0];
            let cloud = PointCloud::filled(size, value);
            Ok(FrameSet {
                left: RgbaImage::from_pixel(size.width, size.height, BACKGROUND),
                right: RgbaImage::from_pixel(size.width, size.height, BACKGROUND),
                depth: DepthMap::from_point_cloud(&cloud),
                point_cloud: cloud,
                timestamp_ms: 0,
            })
        }

        fn close(&mut self) {
            self.log.borrow_mut().source_closed += 1;
        }
    }

    /// Records shown frames and answers key polls from a script.
    struct FakeDisplay {
        keys: VecDeque<Option<i32>>,
        log: Shared,
    }

    impl DisplaySink for FakeDisplay {
        fn show(&mut self, title: &str, frame: &RgbaImage) -> Result<()> {
            self.log
                .borrow_mut()
                .shown
                .push((title.to_string(), frame.clone()));
            Ok(())
        }

        fn wait_key(&mut self, _delay: Duration) -> Result<Option<i32>> {
            self.log.borrow_mut().key_polls += 1;
            Ok(self.keys.pop_front().unwrap_or(Some(QUIT_KEY)))
        }

        fn close(&mut self) {
            self.log.borrow_mut().display_closed += 1;
        }
    }

    struct Console(Shared);

    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().diagnostics.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn build(
        script: Vec<Result<PointSample, GrabError>>,
        keys: Vec<Option<i32>>,
    ) -> (CaptureLoop<FakeSource, FakeDisplay, Console>, Shared) {
        let log = Shared::default();
        let source = FakeSource {
            script: script.into(),
            log: log.clone(),
        };
        let display = FakeDisplay {
            keys: keys.into(),
            log: log.clone(),
        };
        let capture = CaptureLoop::new(
            source,
            display,
            Console(log.clone()),
            RuntimeParameters::default(),
            Arc::new(AtomicBool::new(false)),
        );
        (capture, log)
    }

    fn diagnostic_text(log: &Shared) -> String {
        String::from_utf8(log.borrow().diagnostics.clone()).unwrap()
    }

    #[test]
    fn retrieves_at_half_native_resolution() {
        let (capture, _log) = build(vec![], vec![]);
        assert_eq!(capture.size, Resolution::new(200, 100));
    }

    #[test]
    fn valid_reading_is_drawn_without_diagnostic() {
        let (mut capture, log) = build(vec![Ok(PointSample::new(100.0, 0.0, 0.0))], vec![None]);
        assert_eq!(capture.tick().unwrap(), LoopState::Running);

        let log = log.borrow();
        assert!(log.diagnostics.is_empty());
        assert_eq!(log.shown.len(), 2);
        assert_eq!(log.shown[0].0, LEFT_WINDOW);
        assert_eq!(log.shown[1].0, RIGHT_WINDOW);
        assert!(log.shown[0].1.pixels().any(|p| *p != BACKGROUND));
        assert!(log.shown[1].1.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn missing_depth_prints_diagnostic_once_and_leaves_frame() {
        let (mut capture, log) = build(
            vec![Ok(PointSample::new(f32::NAN, 0.0, 0.0))],
            vec![None],
        );
        capture.tick().unwrap();

        assert_eq!(diagnostic_text(&log), Diagnostic.to_string());
        let log = log.borrow();
        assert!(log.shown[0].1.pixels().all(|p| *p == BACKGROUND));
        drop(log);
        assert_eq!(capture.summary.depth_unavailable, 1);
    }

    #[test]
    fn diagnostics_repeat_every_tick() {
        let (mut capture, log) = build(
            vec![Ok(PointSample::invalid()), Ok(PointSample::invalid())],
            vec![None, None],
        );
        capture.tick().unwrap();
        capture.tick().unwrap();
        assert_eq!(diagnostic_text(&log), Diagnostic.to_string().repeat(2));
    }

    #[test]
    fn failed_grab_is_a_no_op_tick() {
        let (mut capture, log) = build(
            vec![
                Err(GrabError::NoFrame),
                Ok(PointSample::new(0.0, 0.0, 500.0)),
            ],
            vec![None, None],
        );
        assert_eq!(capture.tick().unwrap(), LoopState::Running);
        {
            let log = log.borrow();
            assert!(log.shown.is_empty());
            assert!(log.diagnostics.is_empty());
            assert_eq!(log.key_polls, 1);
        }
        assert_eq!(capture.tick().unwrap(), LoopState::Running);
        assert_eq!(log.borrow().shown.len(), 2);
        assert_eq!(capture.summary.grab_failures, 1);
        assert_eq!(capture.summary.frames_shown, 1);
    }

    #[test]
    fn quit_key_stops_and_releases_once() {
        let (mut capture, log) = build(
            vec![
                Ok(PointSample::new(1.0, 2.0, 3.0)),
                Ok(PointSample::new(1.0, 2.0, 3.0)),
            ],
            vec![None, Some(QUIT_KEY)],
        );
        assert_eq!(capture.tick().unwrap(), LoopState::Running);
        assert_eq!(capture.tick().unwrap(), LoopState::Stopped);
        {
            let log = log.borrow();
            assert_eq!(log.display_closed, 1);
            assert_eq!(log.source_closed, 1);
        }

        // Stopped is terminal.
        assert_eq!(capture.tick().unwrap(), LoopState::Stopped);
        assert_eq!(log.borrow().grabs, 2);
        drop(capture);
        assert_eq!(log.borrow().display_closed, 1);
        assert_eq!(log.borrow().source_closed, 1);
    }

    #[test]
    fn other_keys_keep_running() {
        let (mut capture, _log) = build(
            vec![Ok(PointSample::new(1.0, 0.0, 0.0))],
            vec![Some(i32::from(b'w'))],
        );
        assert_eq!(capture.tick().unwrap(), LoopState::Running);
        assert_eq!(capture.state, LoopState::Running);
    }

    #[test]
    fn run_returns_summary_after_quit() {
        let (capture, log) = build(
            vec![
                Ok(PointSample::new(100.0, 0.0, 0.0)),
                Err(GrabError::EndOfRecording),
                Ok(PointSample::invalid()),
            ],
            vec![None, None, Some(QUIT_KEY)],
        );
        let summary = capture.run().unwrap();
        assert_eq!(
            summary,
            LoopSummary {
                ticks: 3,
                frames_shown: 2,
                grab_failures: 1,
                depth_unavailable: 1,
            }
        );
        assert_eq!(log.borrow().source_closed, 1);
    }

    #[test]
    fn shutdown_flag_stops_before_grabbing() {
        let (mut capture, log) = build(vec![Ok(PointSample::new(1.0, 0.0, 0.0))], vec![]);
        capture.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(capture.tick().unwrap(), LoopState::Stopped);
        let log = log.borrow();
        assert_eq!(log.grabs, 0);
        assert_eq!(log.display_closed, 1);
        assert_eq!(log.source_closed, 1);
    }

    #[test]
    fn dropping_a_running_loop_releases_resources() {
        let (capture, log) = build(vec![], vec![]);
        drop(capture);
        assert_eq!(log.borrow().display_closed, 1);
        assert_eq!(log.borrow().source_closed, 1);
    }

    #[test]
    fn synthetic_camera_runs_headless_to_frame_limit() {
        let source = SyntheticStereoSource::new(
            StereoCalibration::for_resolution(CameraResolution::Hd720),
            1200.0,
            DepthMode::Performance,
            Unit::Millimeter,
        );
        let mut out = Vec::new();
        let summary = CaptureLoop::new(
            source,
            HeadlessDisplay::new(Some(3)),
            &mut out,
            RuntimeParameters::default(),
            Arc::new(AtomicBool::new(false)),
        )
        .run()
        .unwrap();
        assert_eq!(summary.frames_shown, 3);
        assert_eq!(summary.depth_unavailable, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn camera_open_failure_reports_code() {
        let init = InitParameters {
            input: InputType::Recording("/nonexistent/capture.svo".into()),
            ..InitParameters::default()
        };
        let mut console = Vec::new();
        let err = open_source(&init, &mut console).err().unwrap();
        assert!(err.to_string().contains("failed to open camera"));
        let printed = String::from_utf8(console).unwrap();
        let expected = if cfg!(feature = "with-opencv") {
            ErrorCode::InvalidRecording
        } else {
            ErrorCode::BackendUnavailable
        };
        assert_eq!(printed, format!("{expected:?}\n"));
    }

    struct BrokenConsole;

    impl Write for BrokenConsole {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"))
        }
    }

    #[test]
    fn camera_open_failure_survives_closed_console() {
        let init = InitParameters {
            input: InputType::Recording("/nonexistent/capture.svo".into()),
            ..InitParameters::default()
        };
        let err = open_source(&init, &mut BrokenConsole).err().unwrap();
        assert!(err.to_string().contains("failed to open camera"));
        assert!(err.downcast_ref::<stereo_ingest::OpenError>().is_some());
    }
}
