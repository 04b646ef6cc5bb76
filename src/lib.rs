//! csicam: CSI camera probe, preview and live detection for Jetson Nano boards.
//!
//! # Architecture
//!
//! The crate is sequencing glue around three external capabilities, each behind a
//! narrow trait so the glue can run against fakes:
//!
//! - capture (`ingest::CaptureBackend` / `ingest::CaptureHandle`)
//! - display (`display::Display`)
//! - detection (`detect::DetectorBackend`)
//!
//! Control flow is strictly sequential:
//!
//! 1. `probe` opens each candidate sensor, confirms it delivers a frame, releases it.
//! 2. `preview` reopens available sensors and runs a read/show/poll loop, single or
//!    side by side, until cancelled or the source is lost.
//! 3. For live detection, `model` prepares the compiled model artifact once, then
//!    `overlay::DetectionOverlay` annotates each frame before display.
//!
//! # Module Structure
//!
//! - `frame`: captured frames and side-by-side composition
//! - `ingest`: capture backends (GStreamer CSI, synthetic)
//! - `probe`: camera availability probing and device listing
//! - `display`: preview windows (headless, OpenCV highgui)
//! - `preview`: the preview loop and its failure policy
//! - `detect`, `overlay`, `model`: detection backends, box drawing, artifact preparation
//! - `config`, `ui`: configuration loading and status output

use std::fmt;

pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod overlay;
pub mod preview;
pub mod probe;
pub mod ui;

pub use config::CsicamConfig;
pub use detect::{Detection, DetectionResult, DetectorBackend};
pub use display::{Display, HeadlessDisplay};
pub use frame::{compose_horizontal, ComposeError, Frame, HeightMismatch};
pub use ingest::{
    CaptureBackend, CaptureBackendKind, CaptureError, CaptureHandle, CaptureSettings,
    PipelineSpec, SessionHandle, SyntheticBackend, SyntheticCamera,
};
pub use model::{ModelArtifacts, ModelPreparer, Preparation};
pub use overlay::{DetectionOverlay, FrameStage, Passthrough};
pub use preview::{FailurePolicy, PreviewError, PreviewLoop, SessionEnd, SessionReport};
pub use probe::{ProbeOutcome, ProbePolicy, ProbeReport, Prober};

/// ASCII ESC, the preview cancel key.
pub const ESC_KEY: i32 = 27;

/// Identifier of a CSI sensor (the `sensor-id` pipeline property).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SensorId {
    fn from(value: u32) -> Self {
        SensorId(value)
    }
}
