//! Synthetic capture backend.
//!
//! Produces generated frames without camera hardware. Each sensor can be scripted:
//! absent, opening but never delivering, failing after some frames, or failing on
//! particular reads. A shared `SyntheticLedger` counts opens and releases so callers
//! can check that every handle was given back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};

use super::{CaptureBackend, CaptureError, CaptureHandle, CaptureSettings};
use crate::frame::Frame;
use crate::SensorId;

/// Scripted behavior of one synthetic sensor.
#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    /// `false` makes `open` fail.
    pub present: bool,
    /// Reads succeed this many times, then fail forever. `None` = never stop.
    pub frames_before_failure: Option<u64>,
    /// 1-based read numbers that fail (transient failures).
    pub failing_reads: BTreeSet<u64>,
    /// Overrides the backend's capture size.
    pub size: Option<(u32, u32)>,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self {
            present: true,
            frames_before_failure: None,
            failing_reads: BTreeSet::new(),
            size: None,
        }
    }
}

impl SyntheticCamera {
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::default()
        }
    }

    /// Opens fine, never yields a frame.
    pub fn frameless() -> Self {
        Self::default().failing_after(0)
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.frames_before_failure = Some(frames);
        self
    }

    pub fn failing_on(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.failing_reads.extend(reads);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }
}

/// Open/release counters shared between a backend and its handles.
#[derive(Clone, Debug, Default)]
pub struct SyntheticLedger {
    inner: Arc<LedgerCounts>,
}

#[derive(Debug, Default)]
struct LedgerCounts {
    opens: AtomicUsize,
    releases: AtomicUsize,
    reads: AtomicUsize,
}

impl SyntheticLedger {
    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    pub fn open_now(&self) -> usize {
        self.opens().saturating_sub(self.releases())
    }
}

/// Synthetic backend. Sensors without a script use `SyntheticCamera::default()`
/// when `all_present` is set, otherwise they are absent.
pub struct SyntheticBackend {
    settings: CaptureSettings,
    cameras: BTreeMap<u32, SyntheticCamera>,
    all_present: bool,
    ledger: SyntheticLedger,
}

impl SyntheticBackend {
    /// Backend with no cameras attached.
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            cameras: BTreeMap::new(),
            all_present: false,
            ledger: SyntheticLedger::default(),
        }
    }

    /// Backend where every in-range sensor is a healthy camera.
    pub fn all_present(settings: CaptureSettings) -> Self {
        Self {
            all_present: true,
            ..Self::new(settings)
        }
    }

    pub fn with_camera(mut self, id: u32, camera: SyntheticCamera) -> Self {
        self.cameras.insert(id, camera);
        self
    }

    pub fn ledger(&self) -> SyntheticLedger {
        self.ledger.clone()
    }

    fn camera(&self, id: SensorId) -> SyntheticCamera {
        match self.cameras.get(&id.0) {
            Some(camera) => camera.clone(),
            None if self.all_present => SyntheticCamera::default(),
            None => SyntheticCamera::absent(),
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, id: SensorId) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        self.settings.check_range(id)?;
        let camera = self.camera(id);
        if !camera.present {
            return Err(CaptureError::OpenFailed {
                id,
                reason: "no synthetic camera attached".to_string(),
            });
        }
        let (width, height) = camera
            .size
            .unwrap_or((self.settings.width, self.settings.height));
        self.ledger.inner.opens.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "SyntheticBackend: opened sensor {} ({}x{})",
            id,
            width,
            height
        );
        Ok(Box::new(SyntheticHandle {
            id,
            camera,
            width,
            height,
            reads: 0,
            delivered: 0,
            open: true,
            last_read_ok: false,
            ledger: self.ledger.clone(),
        }))
    }
}

struct SyntheticHandle {
    id: SensorId,
    camera: SyntheticCamera,
    width: u32,
    height: u32,
    reads: u64,
    delivered: u64,
    open: bool,
    last_read_ok: bool,
    ledger: SyntheticLedger,
}

impl SyntheticHandle {
    fn should_fail(&self) -> bool {
        let exhausted = self
            .camera
            .frames_before_failure
            .is_some_and(|limit| self.delivered >= limit);
        exhausted || self.camera.failing_reads.contains(&self.reads)
    }

    /// Diagonal gradient that drifts each frame, tinted per sensor.
    fn generate(&self) -> RgbImage {
        let shift = self.delivered as u32;
        let tint = (self.id.0 as u8).wrapping_mul(97);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = ((x + y + shift) % 256) as u8;
            Rgb([v, v.wrapping_add(tint), 255 - v])
        })
    }
}

impl CaptureHandle for SyntheticHandle {
    fn sensor_id(&self) -> SensorId {
        self.id
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::Closed { id: self.id });
        }
        self.reads += 1;
        self.ledger.inner.reads.fetch_add(1, Ordering::SeqCst);

        if self.should_fail() {
            self.last_read_ok = false;
            return Err(CaptureError::ReadFailed {
                id: self.id,
                reason: format!("synthetic failure on read {}", self.reads),
            });
        }

        self.delivered += 1;
        self.last_read_ok = true;
        Ok(Frame::new(self.generate(), self.id, self.delivered))
    }

    fn last_read_ok(&self) -> bool {
        self.last_read_ok
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.ledger.inner.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
