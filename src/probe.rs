//! Camera availability probing.
//!
//! A sensor counts as available when it opens and (under the strict policy) delivers
//! one frame. Every handle opened here is released before the probe of the next
//! sensor starts, so probing never holds a device.
//!
//! `list_video_devices` and `v4l2_summary` are diagnostics only; nothing downstream
//! depends on them.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use crate::ingest::{CaptureBackend, CaptureError, CaptureSettings, SessionHandle};
use crate::SensorId;

/// What makes a sensor "available".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Open succeeds and one frame is read.
    #[default]
    Strict,
    /// Open succeeds.
    OpenOnly,
}

impl ProbePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "open-only" | "open_only" | "open" => Some(Self::OpenOnly),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    OutOfRange,
    OpenFailed(String),
    /// Opened but the confirmation read failed.
    NoFrame(String),
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::OutOfRange => f.write_str("sensor id out of range"),
            Self::OpenFailed(reason) => write!(f, "failed to open: {reason}"),
            Self::NoFrame(reason) => write!(f, "opened but delivered no frame: {reason}"),
        }
    }
}

/// Result of probing a set of sensors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Per-sensor outcome in probe order.
    pub outcomes: Vec<(SensorId, ProbeOutcome)>,
}

impl ProbeReport {
    /// Available sensors in ascending identifier order.
    pub fn available(&self) -> Vec<SensorId> {
        let mut ids: Vec<SensorId> = self
            .outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_available())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn outcome(&self, id: SensorId) -> Option<&ProbeOutcome> {
        self.outcomes
            .iter()
            .find(|(probed, _)| *probed == id)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Prober {
    settings: CaptureSettings,
    policy: ProbePolicy,
}

impl Prober {
    pub fn new(settings: CaptureSettings, policy: ProbePolicy) -> Self {
        Self { settings, policy }
    }

    pub fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Probe every candidate `0..max_sensors`.
    pub fn probe_all(&self, backend: &mut dyn CaptureBackend) -> ProbeReport {
        let ids: Vec<SensorId> = self.settings.candidates().collect();
        self.probe_ids(backend, &ids)
    }

    /// Probe the given identifiers in order.
    pub fn probe_ids(&self, backend: &mut dyn CaptureBackend, ids: &[SensorId]) -> ProbeReport {
        let outcomes = ids
            .iter()
            .map(|&id| (id, self.probe_one(backend, id)))
            .collect();
        ProbeReport { outcomes }
    }

    /// Probe a single identifier. Never panics on bad ids and never leaves a handle open.
    pub fn probe_one(&self, backend: &mut dyn CaptureBackend, id: SensorId) -> ProbeOutcome {
        if self.settings.check_range(id).is_err() {
            log::debug!("probe: sensor {} out of range", id);
            return ProbeOutcome::OutOfRange;
        }

        let handle = match backend.open(id) {
            Ok(handle) => handle,
            Err(CaptureError::OutOfRange { .. }) => return ProbeOutcome::OutOfRange,
            Err(err) => {
                log::info!("probe: {}", err);
                return ProbeOutcome::OpenFailed(err.to_string());
            }
        };
        let mut session = SessionHandle::new(handle);

        let outcome = match self.policy {
            ProbePolicy::OpenOnly => ProbeOutcome::Available,
            ProbePolicy::Strict => match session.read() {
                Ok(frame) => {
                    log::debug!(
                        "probe: sensor {} delivered {}x{}",
                        id,
                        frame.width(),
                        frame.height()
                    );
                    ProbeOutcome::Available
                }
                Err(err) => {
                    log::info!("probe: sensor {} opened but {}", id, err);
                    ProbeOutcome::NoFrame(err.to_string())
                }
            },
        };
        session.close();
        outcome
    }
}

/// `/dev/video*` nodes, sorted.
pub fn list_video_devices() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut devices: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("video"))
        })
        .map(|entry| entry.path())
        .collect();
    devices.sort();
    devices
}

/// Output of `v4l2-ctl --list-devices`, or `None` when the tool is missing or fails.
pub fn v4l2_summary() -> Option<String> {
    let output = Command::new("v4l2-ctl").arg("--list-devices").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
