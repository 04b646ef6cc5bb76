//! Preview display surfaces.
//!
//! - `HeadlessDisplay`: no windows, counts frames (CI, SSH sessions)
//! - `HighguiDisplay`: OpenCV highgui windows (feature: display-highgui)
//!
//! Windows are created lazily by `show` and must be closed by whoever showed into them.

#[cfg(feature = "display-highgui")]
pub mod highgui;

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "display-highgui")]
pub use highgui::HighguiDisplay;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display backend failed: {0}")]
    Backend(String),
}

pub trait Display {
    fn name(&self) -> &'static str;

    /// Show `frame` in `window`, creating the window if needed.
    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError>;

    /// Wait at most `delay` for a key press. `None` when no key was pressed.
    fn poll_key(&mut self, delay: Duration) -> Result<Option<i32>, DisplayError>;

    /// Close `window`. Closing an unknown window is a no-op.
    fn close(&mut self, window: &str);

    /// Windows currently open.
    fn open_windows(&self) -> usize;
}

/// Native windows when built with `display-highgui`, headless otherwise or when
/// `headless` is requested.
pub fn open_display(headless: bool) -> Box<dyn Display> {
    #[cfg(feature = "display-highgui")]
    if !headless {
        return Box::new(HighguiDisplay::new());
    }
    if !headless {
        log::warn!("built without display-highgui; previews run headless");
    }
    Box::new(HeadlessDisplay::new())
}

/// Display that renders nothing.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    windows: BTreeSet<String>,
    frames_shown: u64,
    last_size: Option<(u32, u32)>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.last_size
    }
}

impl Display for HeadlessDisplay {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError> {
        if self.windows.insert(window.to_string()) {
            log::debug!("HeadlessDisplay: opened '{}'", window);
        }
        self.frames_shown += 1;
        self.last_size = Some(frame.size());
        Ok(())
    }

    fn poll_key(&mut self, _delay: Duration) -> Result<Option<i32>, DisplayError> {
        Ok(None)
    }

    fn close(&mut self, window: &str) {
        self.windows.remove(window);
    }

    fn open_windows(&self) -> usize {
        self.windows.len()
    }
}
