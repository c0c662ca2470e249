//! Display sinks: OpenCV HighGUI windows or a headless logger.

use std::{thread, time::Duration};

use anyhow::Result;
use image::RgbaImage;
use tracing::{debug, info};

use crate::readout::pipeline::QUIT_KEY;

pub(crate) const LEFT_WINDOW: &str = "Image Left";
pub(crate) const RIGHT_WINDOW: &str = "Image Right";

/// Somewhere to show frames and read key presses from.
pub(crate) trait DisplaySink {
    fn show(&mut self, title: &str, frame: &RgbaImage) -> Result<()>;

    /// Wait up to `delay` for a key press and return its code.
    fn wait_key(&mut self, delay: Duration) -> Result<Option<i32>>;

    /// Tear down any windows. Called once when the loop stops.
    fn close(&mut self);
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(&mut self, title: &str, frame: &RgbaImage) -> Result<()> {
        (**self).show(title, frame)
    }

    fn wait_key(&mut self, delay: Duration) -> Result<Option<i32>> {
        (**self).wait_key(delay)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Logs frames instead of drawing them. Reports the quit key once
/// `max_frames` left frames have been shown.
pub(crate) struct HeadlessDisplay {
    max_frames: Option<u64>,
    shown: u64,
    closed: bool,
}

impl HeadlessDisplay {
    pub(crate) fn new(max_frames: Option<u64>) -> Self {
        Self {
            max_frames,
            shown: 0,
            closed: false,
        }
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, title: &str, frame: &RgbaImage) -> Result<()> {
        if title == LEFT_WINDOW {
            self.shown += 1;
        }
        debug!(
            window = title,
            width = frame.width(),
            height = frame.height(),
            frame = self.shown,
            "headless show"
        );
        Ok(())
    }

    fn wait_key(&mut self, delay: Duration) -> Result<Option<i32>> {
        if self.max_frames.is_some_and(|max| self.shown >= max) {
            return Ok(Some(QUIT_KEY));
        }
        thread::sleep(delay);
        Ok(None)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            info!(frames = self.shown, "headless display closed");
        }
    }
}

#[cfg(feature = "with-opencv")]
pub(crate) use highgui::HighGuiDisplay;

#[cfg(feature = "with-opencv")]
mod highgui {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use image::RgbaImage;
    use opencv::{core::Mat, highgui, imgproc, prelude::*};
    use tracing::warn;

    use super::DisplaySink;

    /// Native windows managed by OpenCV HighGUI.
    pub(crate) struct HighGuiDisplay {
        scratch: Mat,
        open: bool,
    }

    impl HighGuiDisplay {
        pub(crate) fn new() -> Self {
            Self {
                scratch: Mat::default(),
                open: false,
            }
        }
    }

    impl DisplaySink for HighGuiDisplay {
        fn show(&mut self, title: &str, frame: &RgbaImage) -> Result<()> {
            let flat = Mat::from_slice(frame.as_raw()).context("wrap frame buffer")?;
            let rgba = flat
                .reshape(4, frame.height() as i32)
                .context("reshape frame buffer")?;
            imgproc::cvt_color_def(&*rgba, &mut self.scratch, imgproc::COLOR_RGBA2BGRA)
                .context("convert frame to BGRA")?;
            highgui::imshow(title, &self.scratch)
                .with_context(|| format!("failed to show window {title:?}"))?;
            self.open = true;
            Ok(())
        }

        fn wait_key(&mut self, delay: Duration) -> Result<Option<i32>> {
            let key = highgui::wait_key(delay.as_millis() as i32).context("poll key")?;
            Ok((key >= 0).then_some(key))
        }

        fn close(&mut self) {
            if self.open {
                if let Err(err) = highgui::destroy_all_windows() {
                    warn!("failed to destroy windows: {err}");
                }
                self.open = false;
            }
        }
    }

    impl Drop for HighGuiDisplay {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_counts_left_frames_and_quits_at_limit() {
        let mut display = HeadlessDisplay::new(Some(2));
        let frame = RgbaImage::new(4, 4);
        for _ in 0..2 {
            assert_eq!(display.wait_key(Duration::ZERO).unwrap(), None);
            display.show(LEFT_WINDOW, &frame).unwrap();
            display.show(RIGHT_WINDOW, &frame).unwrap();
        }
        assert_eq!(display.shown, 2);
        assert_eq!(display.wait_key(Duration::ZERO).unwrap(), Some(QUIT_KEY));
    }

    #[test]
    fn unlimited_headless_never_quits() {
        let mut display = HeadlessDisplay::new(None);
        let frame = RgbaImage::new(4, 4);
        for _ in 0..5 {
            display.show(LEFT_WINDOW, &frame).unwrap();
            assert_eq!(display.wait_key(Duration::ZERO).unwrap(), None);
        }
    }
}
