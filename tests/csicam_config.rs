use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use csicam::config::CsicamConfig;
use csicam::detect::DetectorKind;
use csicam::model::{DEFAULT_COMPILED_PATH, DEFAULT_EXPORT_FORMAT};
use csicam::{CaptureBackendKind, HeightMismatch, ProbePolicy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CSICAM_CONFIG",
        "CSICAM_CAPTURE_BACKEND",
        "CSICAM_MAX_SENSORS",
        "CSICAM_PROBE_POLICY",
        "CSICAM_MAX_READ_FAILURES",
        "CSICAM_MODEL_PATH",
        "CSICAM_COMPILED_MODEL_PATH",
        "CSICAM_DETECTOR_BACKEND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CsicamConfig::load().expect("load defaults");

    assert_eq!(cfg.capture_backend, CaptureBackendKind::Gstreamer);
    assert_eq!(cfg.capture.width, 640);
    assert_eq!(cfg.capture.height, 480);
    assert_eq!(cfg.capture.fps, 30);
    assert_eq!(cfg.capture.flip_method, 0);
    assert_eq!(cfg.capture.max_sensors, 2);
    assert_eq!(cfg.probe_policy, ProbePolicy::Strict);
    assert_eq!(cfg.failure.max_consecutive_failures, 5);
    assert_eq!(cfg.failure.backoff, Duration::from_millis(20));
    assert_eq!(cfg.height_mismatch, HeightMismatch::Reject);
    assert_eq!(cfg.model.portable, PathBuf::from("yolov8n.pt"));
    assert_eq!(cfg.model.compiled, PathBuf::from(DEFAULT_COMPILED_PATH));
    assert_eq!(cfg.model.export_format, DEFAULT_EXPORT_FORMAT);
    assert_eq!(
        cfg.model.export_output(),
        cfg.model.compiled,
        "default export lands on the default compiled path"
    );
    assert!(cfg.model.download_url.is_some());
    assert_eq!(cfg.export_command, "yolo");
    assert_eq!(cfg.detector.kind, DetectorKind::Tract);
    assert!(cfg.font_path.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "capture": {
            "backend": "synthetic",
            "width": 1280,
            "height": 720,
            "fps": 60,
            "flip_method": 2,
            "max_sensors": 4
        },
        "probe": { "policy": "open-only" },
        "preview": {
            "max_consecutive_failures": 8,
            "failure_backoff_ms": 50,
            "height_mismatch": "resize"
        },
        "model": {
            "portable_path": "models/yolov8s.pt",
            "export_format": "ONNX",
            "download_url": ""
        },
        "detector": { "backend": "tract", "confidence": 0.5 },
        "overlay": { "font_path": "/usr/share/fonts/DejaVuSans.ttf" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CSICAM_CONFIG", file.path());
    std::env::set_var("CSICAM_MAX_READ_FAILURES", "3");
    std::env::set_var("CSICAM_COMPILED_MODEL_PATH", "models/yolov8s.onnx");
    std::env::set_var("CSICAM_PROBE_POLICY", "strict");

    let cfg = CsicamConfig::load().expect("load config");

    assert_eq!(cfg.capture_backend, CaptureBackendKind::Synthetic);
    assert_eq!(cfg.capture.width, 1280);
    assert_eq!(cfg.capture.height, 720);
    assert_eq!(cfg.capture.fps, 60);
    assert_eq!(cfg.capture.flip_method, 2);
    assert_eq!(cfg.capture.max_sensors, 4);
    assert_eq!(cfg.probe_policy, ProbePolicy::Strict);
    assert_eq!(cfg.failure.max_consecutive_failures, 3);
    assert_eq!(cfg.failure.backoff, Duration::from_millis(50));
    assert_eq!(cfg.height_mismatch, HeightMismatch::Resize);
    assert_eq!(cfg.model.portable, PathBuf::from("models/yolov8s.pt"));
    assert_eq!(cfg.model.compiled, PathBuf::from("models/yolov8s.onnx"));
    assert_eq!(cfg.model.export_format, "onnx");
    assert!(cfg.model.download_url.is_none());
    assert_eq!(cfg.detector.kind, DetectorKind::Tract);
    assert!((cfg.detector.decoder.confidence - 0.5).abs() < f32::EPSILON);
    assert_eq!(
        cfg.font_path,
        Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"))
    );

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[capture]
max_sensors = 1

[detector]
iou = 0.6
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("CSICAM_CONFIG", file.path());
    std::env::set_var("CSICAM_DETECTOR_BACKEND", "stub");

    let cfg = CsicamConfig::load().expect("load config");

    assert_eq!(cfg.capture.max_sensors, 1);
    assert!((cfg.detector.decoder.iou - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.detector.kind, DetectorKind::Stub);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CSICAM_MAX_SENSORS", "0");
    let err = CsicamConfig::load().unwrap_err();
    assert!(err.to_string().contains("max_sensors"));
    clear_env();

    std::env::set_var("CSICAM_MAX_READ_FAILURES", "several");
    assert!(CsicamConfig::load().is_err());
    clear_env();

    std::env::set_var("CSICAM_PROBE_POLICY", "sometimes");
    assert!(CsicamConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "detector": { "confidence": 1.5 } }"#)
        .expect("write config");
    std::env::set_var("CSICAM_CONFIG", file.path());
    let err = CsicamConfig::load().unwrap_err();
    assert!(err.to_string().contains("confidence"));

    clear_env();
}
