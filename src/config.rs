use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DetectorKind, DetectorSettings, YoloDecoder};
use crate::frame::HeightMismatch;
use crate::ingest::{CaptureBackendKind, CaptureSettings};
use crate::model::{
    ModelArtifacts, DEFAULT_COMPILED_PATH, DEFAULT_DOWNLOAD_URL, DEFAULT_EXPORT_FORMAT,
    DEFAULT_PORTABLE_PATH,
};
use crate::preview::FailurePolicy;
use crate::probe::ProbePolicy;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_MAX_SENSORS: u32 = 2;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_MAX_FAILURES: u32 = 5;
const DEFAULT_BACKOFF_MS: u64 = 20;
const DEFAULT_EXPORT_COMMAND: &str = "yolo";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct CsicamConfigFile {
    capture: Option<CaptureConfigFile>,
    probe: Option<ProbeConfigFile>,
    preview: Option<PreviewConfigFile>,
    model: Option<ModelConfigFile>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    backend: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    flip_method: Option<u32>,
    max_sensors: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeConfigFile {
    policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    max_consecutive_failures: Option<u32>,
    failure_backoff_ms: Option<u64>,
    height_mismatch: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    portable_path: Option<PathBuf>,
    compiled_path: Option<PathBuf>,
    export_format: Option<String>,
    export_command: Option<String>,
    download_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CsicamConfig {
    pub capture_backend: CaptureBackendKind,
    pub capture: CaptureSettings,
    pub probe_policy: ProbePolicy,
    pub failure: FailurePolicy,
    pub height_mismatch: HeightMismatch,
    pub model: ModelArtifacts,
    pub export_command: String,
    pub detector: DetectorSettings,
    pub font_path: Option<PathBuf>,
}

impl Default for CsicamConfig {
    fn default() -> Self {
        Self {
            capture_backend: CaptureBackendKind::default(),
            capture: CaptureSettings::default(),
            probe_policy: ProbePolicy::default(),
            failure: FailurePolicy::default(),
            height_mismatch: HeightMismatch::default(),
            model: ModelArtifacts::default(),
            export_command: DEFAULT_EXPORT_COMMAND.to_string(),
            detector: DetectorSettings::default(),
            font_path: None,
        }
    }
}

impl CsicamConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CSICAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CsicamConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let capture_backend = match capture_file.backend.as_deref() {
            Some(value) => CaptureBackendKind::parse(value)?,
            None => CaptureBackendKind::default(),
        };
        let capture = CaptureSettings {
            width: capture_file.width.unwrap_or(DEFAULT_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: capture_file.fps.unwrap_or(DEFAULT_FPS),
            flip_method: capture_file.flip_method.unwrap_or(0),
            max_sensors: capture_file.max_sensors.unwrap_or(DEFAULT_MAX_SENSORS),
            read_timeout: Duration::from_millis(
                capture_file
                    .read_timeout_ms
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
        };

        let probe_policy = match file.probe.and_then(|probe| probe.policy) {
            Some(value) => parse_probe_policy(&value)?,
            None => ProbePolicy::default(),
        };

        let preview = file.preview.unwrap_or_default();
        let failure = FailurePolicy {
            max_consecutive_failures: preview
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_FAILURES),
            backoff: Duration::from_millis(
                preview.failure_backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS),
            ),
        };
        let height_mismatch = match preview.height_mismatch.as_deref() {
            Some(value) => parse_height_mismatch(value)?,
            None => HeightMismatch::default(),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelArtifacts {
            portable: model_file
                .portable_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PORTABLE_PATH)),
            compiled: model_file
                .compiled_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILED_PATH)),
            export_format: model_file
                .export_format
                .unwrap_or_else(|| DEFAULT_EXPORT_FORMAT.to_string()),
            // An empty URL disables downloading.
            download_url: match model_file.download_url {
                Some(url) if url.trim().is_empty() => None,
                Some(url) => Some(url),
                None => Some(DEFAULT_DOWNLOAD_URL.to_string()),
            },
        };
        let export_command = model_file
            .export_command
            .unwrap_or_else(|| DEFAULT_EXPORT_COMMAND.to_string());

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            kind: match detector_file.backend.as_deref() {
                Some(value) => DetectorKind::parse(value)?,
                None => DetectorKind::default(),
            },
            decoder: YoloDecoder {
                input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence: detector_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: detector_file.iou.unwrap_or(DEFAULT_IOU),
            },
        };

        let font_path = file.overlay.and_then(|overlay| overlay.font_path);

        Ok(Self {
            capture_backend,
            capture,
            probe_policy,
            failure,
            height_mismatch,
            model,
            export_command,
            detector,
            font_path,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("CSICAM_CAPTURE_BACKEND") {
            if !backend.trim().is_empty() {
                self.capture_backend = CaptureBackendKind::parse(&backend)?;
            }
        }
        if let Ok(max) = std::env::var("CSICAM_MAX_SENSORS") {
            self.capture.max_sensors = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("CSICAM_MAX_SENSORS must be a non-negative integer"))?;
        }
        if let Ok(policy) = std::env::var("CSICAM_PROBE_POLICY") {
            if !policy.trim().is_empty() {
                self.probe_policy = parse_probe_policy(&policy)?;
            }
        }
        if let Ok(max) = std::env::var("CSICAM_MAX_READ_FAILURES") {
            self.failure.max_consecutive_failures = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("CSICAM_MAX_READ_FAILURES must be a non-negative integer"))?;
        }
        if let Ok(path) = std::env::var("CSICAM_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.portable = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("CSICAM_COMPILED_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.compiled = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("CSICAM_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.kind = DetectorKind::parse(&backend)?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.capture.max_sensors == 0 {
            return Err(anyhow!("capture max_sensors must be greater than zero"));
        }
        if self.failure.max_consecutive_failures == 0 {
            return Err(anyhow!(
                "preview max_consecutive_failures must be greater than zero"
            ));
        }
        if self.detector.decoder.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        for (name, value) in [
            ("confidence", self.detector.decoder.confidence),
            ("iou", self.detector.decoder.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within [0, 1], got {}", name, value));
            }
        }
        self.model.export_format = self.model.export_format.trim().to_ascii_lowercase();
        if self.model.export_format.is_empty() {
            return Err(anyhow!("model export_format must not be empty"));
        }
        if self.export_command.trim().is_empty() {
            return Err(anyhow!("model export_command must not be empty"));
        }
        Ok(())
    }
}

fn parse_probe_policy(value: &str) -> Result<ProbePolicy> {
    ProbePolicy::parse(value)
        .ok_or_else(|| anyhow!("unknown probe policy {:?} (expected strict or open-only)", value))
}

fn parse_height_mismatch(value: &str) -> Result<HeightMismatch> {
    match value.trim().to_ascii_lowercase().as_str() {
        "reject" => Ok(HeightMismatch::Reject),
        "resize" => Ok(HeightMismatch::Resize),
        other => Err(anyhow!(
            "unknown height_mismatch {:?} (expected reject or resize)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<CsicamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
