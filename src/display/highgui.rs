//! OpenCV highgui preview windows.

use std::collections::BTreeSet;
use std::time::Duration;

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::{highgui, imgproc};

use super::{Display, DisplayError};
use crate::frame::Frame;

/// Native preview windows through OpenCV.
#[derive(Default)]
pub struct HighguiDisplay {
    windows: BTreeSet<String>,
}

impl HighguiDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for HighguiDisplay {
    fn name(&self) -> &'static str {
        "highgui"
    }

    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError> {
        if !self.windows.contains(window) {
            highgui::named_window(window, highgui::WINDOW_AUTOSIZE).map_err(backend)?;
            self.windows.insert(window.to_string());
        }
        let mat = rgb_frame_to_bgr_mat(frame)?;
        highgui::imshow(window, &mat).map_err(backend)
    }

    fn poll_key(&mut self, delay: Duration) -> Result<Option<i32>, DisplayError> {
        let delay_ms = delay.as_millis().clamp(1, i32::MAX as u128) as i32;
        let key = highgui::wait_key(delay_ms).map_err(backend)?;
        Ok((key >= 0).then_some(key & 0xFF))
    }

    fn close(&mut self, window: &str) {
        if self.windows.remove(window) {
            if let Err(err) = highgui::destroy_window(window) {
                log::warn!("HighguiDisplay: failed to close '{}': {}", window, err);
            }
        }
    }

    fn open_windows(&self) -> usize {
        self.windows.len()
    }
}

impl Drop for HighguiDisplay {
    fn drop(&mut self) {
        let open: Vec<String> = self.windows.iter().cloned().collect();
        for window in open {
            self.close(&window);
        }
    }
}

/// Packed RGB frame to an owned BGR `Mat` (what highgui expects).
fn rgb_frame_to_bgr_mat(frame: &Frame) -> Result<Mat, DisplayError> {
    let flat = Mat::from_slice(frame.as_rgb()).map_err(backend)?;
    let rgb = flat
        .reshape(3, frame.height() as i32)
        .map_err(backend)?
        .try_clone()
        .map_err(backend)?;
    let mut bgr = Mat::default();
    imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR).map_err(backend)?;
    Ok(bgr)
}

fn backend(err: opencv::Error) -> DisplayError {
    DisplayError::Backend(err.to_string())
}
