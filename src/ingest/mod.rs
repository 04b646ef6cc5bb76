//! Frame capture sources.
//!
//! This module provides the capture capability behind which camera hardware lives:
//! - GStreamer CSI pipelines (feature: capture-gstreamer)
//! - Synthetic cameras (no hardware; scripted behavior for demos and tests)
//!
//! A `CaptureBackend` opens a `CaptureHandle` for one sensor identifier. The handle is
//! owned exclusively by whoever opened it and MUST be released on every exit path.
//! `SessionHandle` does that on drop.

#[cfg(feature = "capture-gstreamer")]
pub mod gstreamer;
pub mod pipeline;
pub mod synthetic;

use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;
use crate::SensorId;

#[cfg(feature = "capture-gstreamer")]
pub use self::gstreamer::GstreamerBackend;
pub use pipeline::PipelineSpec;
pub use synthetic::{SyntheticBackend, SyntheticCamera, SyntheticLedger};

/// Capture failures. Open failures are recoverable by skipping the sensor;
/// read failures are counted by the preview loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("sensor {id} is outside the supported range 0..{max}")]
    OutOfRange { id: SensorId, max: u32 },
    #[error("failed to open sensor {id}: {reason}")]
    OpenFailed { id: SensorId, reason: String },
    #[error("frame read from sensor {id} failed: {reason}")]
    ReadFailed { id: SensorId, reason: String },
    #[error("no frame from sensor {id} within {timeout:?}")]
    Timeout { id: SensorId, timeout: Duration },
    #[error("sensor {id} is not open")]
    Closed { id: SensorId },
}

impl CaptureError {
    /// True for errors raised while opening (the sensor is unusable, not flaky).
    pub fn is_open_failure(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::OpenFailed { .. })
    }
}

/// Resolution, rate and timeouts shared by every capture backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// `nvvidconv flip-method` value (0 = none).
    pub flip_method: u32,
    /// Exclusive upper bound on sensor identifiers.
    pub max_sensors: u32,
    /// How long a single read may block before it counts as a failure.
    pub read_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            flip_method: 0,
            max_sensors: 2,
            read_timeout: Duration::from_millis(1000),
        }
    }
}

impl CaptureSettings {
    pub fn check_range(&self, id: SensorId) -> Result<(), CaptureError> {
        if id.0 < self.max_sensors {
            Ok(())
        } else {
            Err(CaptureError::OutOfRange {
                id,
                max: self.max_sensors,
            })
        }
    }

    /// Candidate identifiers in ascending order.
    pub fn candidates(&self) -> impl Iterator<Item = SensorId> {
        (0..self.max_sensors).map(SensorId)
    }
}

/// Which capture backend the binaries open cameras with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureBackendKind {
    #[default]
    Gstreamer,
    Synthetic,
}

impl CaptureBackendKind {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gstreamer" | "csi" => Ok(Self::Gstreamer),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(anyhow::anyhow!(
                "unknown capture backend {:?} (expected gstreamer or synthetic)",
                other
            )),
        }
    }
}

/// Build the capture backend of the given kind.
///
/// The synthetic backend attaches a healthy camera to every in-range sensor.
pub fn open_backend(
    kind: CaptureBackendKind,
    settings: &CaptureSettings,
) -> anyhow::Result<Box<dyn CaptureBackend>> {
    match kind {
        CaptureBackendKind::Synthetic => {
            Ok(Box::new(SyntheticBackend::all_present(settings.clone())))
        }
        #[cfg(feature = "capture-gstreamer")]
        CaptureBackendKind::Gstreamer => {
            Ok(Box::new(GstreamerBackend::new(settings.clone())?))
        }
        #[cfg(not(feature = "capture-gstreamer"))]
        CaptureBackendKind::Gstreamer => anyhow::bail!(
            "capture backend gstreamer requires the capture-gstreamer feature \
             (use --synthetic or CSICAM_CAPTURE_BACKEND=synthetic without hardware)"
        ),
    }
}

/// Opens capture handles. One implementation per hardware family.
pub trait CaptureBackend {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Open a decoded-frame stream for `id`.
    ///
    /// Implementations must reject identifiers outside `[0, max_sensors)` with
    /// `CaptureError::OutOfRange` before touching any device.
    fn open(&mut self, id: SensorId) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// One open source.
pub trait CaptureHandle {
    fn sensor_id(&self) -> SensorId;

    /// Blocking read of the next frame.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Whether the last `read` produced a frame. False before the first read.
    fn last_read_ok(&self) -> bool;

    fn is_open(&self) -> bool;

    /// Release the underlying device. Calling it again is a no-op.
    fn release(&mut self);
}

/// Owns a handle and releases it exactly once, on drop or explicit `close`.
pub struct SessionHandle {
    id: SensorId,
    inner: Option<Box<dyn CaptureHandle>>,
}

impl SessionHandle {
    pub fn new(handle: Box<dyn CaptureHandle>) -> Self {
        Self {
            id: handle.sensor_id(),
            inner: Some(handle),
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.id
    }

    pub fn read(&mut self) -> Result<Frame, CaptureError> {
        match self.inner.as_mut() {
            Some(handle) => handle.read(),
            None => Err(CaptureError::Closed { id: self.id }),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut handle) = self.inner.take() {
            log::debug!("releasing sensor {}", self.id);
            handle.release();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_rejects_ids_at_or_above_max() {
        let settings = CaptureSettings::default();
        assert!(settings.check_range(SensorId(0)).is_ok());
        assert!(settings.check_range(SensorId(1)).is_ok());
        let err = settings.check_range(SensorId(2)).unwrap_err();
        assert!(err.is_open_failure());
    }

    #[test]
    fn candidates_are_ascending() {
        let settings = CaptureSettings {
            max_sensors: 3,
            ..CaptureSettings::default()
        };
        let ids: Vec<_> = settings.candidates().collect();
        assert_eq!(ids, vec![SensorId(0), SensorId(1), SensorId(2)]);
    }

    #[test]
    fn session_handle_releases_once() {
        let camera = SyntheticCamera::default();
        let mut backend = SyntheticBackend::new(CaptureSettings::default()).with_camera(0, camera);
        let ledger = backend.ledger();

        let handle = backend.open(SensorId(0)).unwrap();
        let mut session = SessionHandle::new(handle);
        assert!(session.read().is_ok());
        session.close();
        drop(session);

        assert_eq!(ledger.releases(), 1);
        assert_eq!(ledger.open_now(), 0);
    }

    #[test]
    fn backend_kind_parses_and_synthetic_opens() {
        assert_eq!(
            CaptureBackendKind::parse("Synthetic").unwrap(),
            CaptureBackendKind::Synthetic
        );
        assert!(CaptureBackendKind::parse("v4l2").is_err());

        let mut backend =
            open_backend(CaptureBackendKind::Synthetic, &CaptureSettings::default()).unwrap();
        assert_eq!(backend.name(), "synthetic");
        assert!(backend.open(SensorId(1)).is_ok());
    }
}
