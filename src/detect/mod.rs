//! Object detection: backend trait, YOLOv8 decoding and the backends that run it.

use std::path::Path;

use anyhow::{anyhow, Result};

mod backend;
pub mod backends;
pub mod labels;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use result::{non_max_suppression, Detection, DetectionResult};
pub use yolo::YoloDecoder;

/// Which detector implementation to construct. The stub has to be asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    #[default]
    Tract,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend {:?} (expected stub or tract)",
                other
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Tract => "tract",
        }
    }

    /// Whether this build can construct the backend.
    pub fn is_available(self) -> bool {
        match self {
            Self::Stub => true,
            Self::Tract => cfg!(feature = "backend-tract"),
        }
    }
}

/// Resolved detector configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub decoder: YoloDecoder,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            decoder: YoloDecoder::default(),
        }
    }
}

/// Build the configured backend for the compiled model at `artifact`.
pub fn build_backend(
    settings: &DetectorSettings,
    artifact: &Path,
) -> Result<Box<dyn DetectorBackend>> {
    match settings.kind {
        DetectorKind::Stub => {
            log::warn!(
                "detector backend is stub; {} is not loaded and no boxes will be drawn",
                artifact.display()
            );
            Ok(Box::new(StubBackend::new()))
        }
        DetectorKind::Tract => build_tract(settings, artifact),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings, artifact: &Path) -> Result<Box<dyn DetectorBackend>> {
    let mut backend = backends::TractBackend::load(artifact, settings.decoder)?;
    backend.warm_up()?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings, _artifact: &Path) -> Result<Box<dyn DetectorBackend>> {
    anyhow::bail!(
        "detector backend tract requires the backend-tract feature \
         (select the stub backend explicitly to run without a model)"
    )
}
