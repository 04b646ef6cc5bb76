//! Preview loop: read, transform, show, poll for cancel.
//!
//! A session owns its capture handles from start to finish. Whatever ends it
//! (cancel key, stop flag, frame limit, lost source, or a display/composition
//! error) the handles are released exactly once and the session's window is
//! closed before the call returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::display::{Display, DisplayError};
use crate::frame::{compose_horizontal, ComposeError, Frame, HeightMismatch};
use crate::ingest::{CaptureHandle, SessionHandle};
use crate::overlay::FrameStage;
use crate::ESC_KEY;

const POLL_DELAY: Duration = Duration::from_millis(1);

/// How many consecutive read failures a session tolerates, and the pause between
/// retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailurePolicy {
    pub max_consecutive_failures: u32,
    pub backoff: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Why a session ended normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancel key was pressed.
    Cancelled,
    /// Reads kept failing until the bound was reached.
    SourceLost { consecutive_failures: u32 },
    /// `max_frames` frames were shown.
    FrameLimit,
    /// The external stop flag was raised.
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub iterations: u64,
    pub frames_shown: u64,
    pub read_failures: u64,
    /// Dual-mode iterations dropped because one side failed to read.
    pub discarded_iterations: u64,
    pub last_frame_size: Option<(u32, u32)>,
    pub end: SessionEnd,
}

/// Counters of a session still in progress.
#[derive(Debug, Default)]
struct Tally {
    iterations: u64,
    frames_shown: u64,
    read_failures: u64,
    discarded_iterations: u64,
    last_frame_size: Option<(u32, u32)>,
}

impl Tally {
    fn record_shown(&mut self, frame: &Frame) {
        self.frames_shown += 1;
        self.last_frame_size = Some(frame.size());
    }

    fn finish(self, end: SessionEnd) -> SessionReport {
        SessionReport {
            iterations: self.iterations,
            frames_shown: self.frames_shown,
            read_failures: self.read_failures,
            discarded_iterations: self.discarded_iterations,
            last_frame_size: self.last_frame_size,
            end,
        }
    }
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("display failed: {0}")]
    Display(#[from] DisplayError),
    #[error("cannot compose dual preview: {0}")]
    Compose(#[from] ComposeError),
}

/// Preview session settings.
#[derive(Clone, Debug)]
pub struct PreviewLoop {
    failure: FailurePolicy,
    height_mismatch: HeightMismatch,
    max_frames: Option<u64>,
    stop: Option<Arc<AtomicBool>>,
}

impl Default for PreviewLoop {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}

impl PreviewLoop {
    pub fn new(failure: FailurePolicy) -> Self {
        Self {
            failure,
            height_mismatch: HeightMismatch::Reject,
            max_frames: None,
            stop: None,
        }
    }

    pub fn with_height_mismatch(mut self, policy: HeightMismatch) -> Self {
        self.height_mismatch = policy;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Preview one camera in `window`, passing every frame through `stage`.
    pub fn run_single(
        &self,
        handle: Box<dyn CaptureHandle>,
        display: &mut dyn Display,
        stage: &mut dyn FrameStage,
        window: &str,
    ) -> Result<SessionReport, PreviewError> {
        let mut session = SessionHandle::new(handle);
        let sensor = session.sensor_id();
        log::info!("preview of sensor {} started in window {:?}", sensor, window);

        let mut tally = Tally::default();
        let outcome = self.single_iterations(&mut session, display, stage, window, &mut tally);
        session.close();
        display.close(window);

        let end = outcome?;
        let report = tally.finish(end);
        log::info!(
            "preview of sensor {} ended ({:?}) after {} frames",
            sensor,
            end,
            report.frames_shown
        );
        Ok(report)
    }

    /// Preview two cameras side by side in one window. An iteration is shown only
    /// when both reads succeed.
    pub fn run_dual(
        &self,
        left: Box<dyn CaptureHandle>,
        right: Box<dyn CaptureHandle>,
        display: &mut dyn Display,
        window: &str,
    ) -> Result<SessionReport, PreviewError> {
        let mut left = SessionHandle::new(left);
        let mut right = SessionHandle::new(right);
        log::info!(
            "dual preview of sensors {} and {} started in window {:?}",
            left.sensor_id(),
            right.sensor_id(),
            window
        );

        let mut tally = Tally::default();
        let outcome = self.dual_iterations(&mut left, &mut right, display, window, &mut tally);
        left.close();
        right.close();
        display.close(window);

        let end = outcome?;
        let report = tally.finish(end);
        log::info!(
            "dual preview ended ({:?}) after {} frames, {} discarded",
            end,
            report.frames_shown,
            report.discarded_iterations
        );
        Ok(report)
    }

    fn single_iterations(
        &self,
        session: &mut SessionHandle,
        display: &mut dyn Display,
        stage: &mut dyn FrameStage,
        window: &str,
        tally: &mut Tally,
    ) -> Result<SessionEnd, PreviewError> {
        let mut consecutive = 0u32;
        loop {
            if let Some(end) = self.before_iteration(tally) {
                return Ok(end);
            }
            tally.iterations += 1;

            match session.read() {
                Ok(frame) => {
                    consecutive = 0;
                    let frame = stage.apply(frame);
                    display.show(window, &frame)?;
                    tally.record_shown(&frame);
                }
                Err(err) => {
                    tally.read_failures += 1;
                    consecutive += 1;
                    log::warn!(
                        "read failed ({}/{}): {}",
                        consecutive,
                        self.failure.max_consecutive_failures,
                        err
                    );
                    if let Some(end) = self.lost(consecutive) {
                        return Ok(end);
                    }
                }
            }

            if self.cancel_pressed(display)? {
                return Ok(SessionEnd::Cancelled);
            }
        }
    }

    fn dual_iterations(
        &self,
        left: &mut SessionHandle,
        right: &mut SessionHandle,
        display: &mut dyn Display,
        window: &str,
        tally: &mut Tally,
    ) -> Result<SessionEnd, PreviewError> {
        let mut consecutive = 0u32;
        loop {
            if let Some(end) = self.before_iteration(tally) {
                return Ok(end);
            }
            tally.iterations += 1;

            let left_read = left.read();
            let right_read = right.read();
            match (left_read, right_read) {
                (Ok(a), Ok(b)) => {
                    consecutive = 0;
                    let composed = compose_horizontal(&a, &b, self.height_mismatch)?;
                    display.show(window, &composed)?;
                    tally.record_shown(&composed);
                }
                (a, b) => {
                    for err in [a.err(), b.err()].into_iter().flatten() {
                        tally.read_failures += 1;
                        log::warn!("dual read failed: {}", err);
                    }
                    tally.discarded_iterations += 1;
                    consecutive += 1;
                    if let Some(end) = self.lost(consecutive) {
                        return Ok(end);
                    }
                }
            }

            if self.cancel_pressed(display)? {
                return Ok(SessionEnd::Cancelled);
            }
        }
    }

    /// Ends the session once the failure bound is reached; otherwise backs off.
    fn lost(&self, consecutive: u32) -> Option<SessionEnd> {
        if consecutive >= self.failure.max_consecutive_failures {
            log::error!("source lost after {} consecutive read failures", consecutive);
            return Some(SessionEnd::SourceLost {
                consecutive_failures: consecutive,
            });
        }
        if !self.failure.backoff.is_zero() {
            thread::sleep(self.failure.backoff);
        }
        None
    }

    /// Checked before every read, so a limit of zero never touches the camera.
    fn before_iteration(&self, tally: &Tally) -> Option<SessionEnd> {
        let stop_requested = self
            .stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::SeqCst));
        if stop_requested {
            return Some(SessionEnd::Stopped);
        }
        match self.max_frames {
            Some(limit) if tally.frames_shown >= limit => Some(SessionEnd::FrameLimit),
            _ => None,
        }
    }

    fn cancel_pressed(&self, display: &mut dyn Display) -> Result<bool, PreviewError> {
        if display.poll_key(POLL_DELAY)? == Some(ESC_KEY) {
            log::info!("cancel key pressed");
            return Ok(true);
        }
        Ok(false)
    }
}
