//! live_detect - YOLOv8 detection overlay on a live CSI camera
//!
//! Prepares the compiled model (once), opens one sensor and shows annotated frames
//! until ESC, Ctrl-C or the camera stops delivering.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use csicam::{
    detect::{build_backend, DetectorKind},
    display::open_display,
    ingest::open_backend,
    ui::{Glyph, Ui},
    CaptureBackendKind, CsicamConfig, DetectionOverlay, ModelPreparer, Preparation, PreviewLoop,
    SensorId, SessionEnd,
};

const WINDOW: &str = "YOLOv8 - Jetson Nano";

#[derive(Parser, Debug)]
#[command(author, version, about = "Run YOLOv8 detection on a CSI camera feed")]
struct Args {
    /// CSI sensor to open (0 = CAM0, 1 = CAM1).
    #[arg(long, default_value_t = 0)]
    sensor: u32,
    /// Use generated frames instead of camera hardware.
    #[arg(long)]
    synthetic: bool,
    /// Run without a window.
    #[arg(long)]
    headless: bool,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Detector backend: tract (default) or stub. The stub draws nothing.
    #[arg(long)]
    detector: Option<String>,
    /// Portable model path (overrides config).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Compiled model path (overrides config).
    #[arg(long)]
    compiled: Option<PathBuf>,
    /// Use the compiled model path as-is without running preparation.
    #[arg(long)]
    skip_prepare: bool,
    /// Font for box labels.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_args(args.ui.as_deref());

    let mut cfg = CsicamConfig::load()?;
    if args.synthetic {
        cfg.capture_backend = CaptureBackendKind::Synthetic;
    }
    if let Some(kind) = args.detector.as_deref() {
        cfg.detector.kind = DetectorKind::parse(kind)?;
    }
    if let Some(path) = args.model {
        cfg.model.portable = path;
    }
    if let Some(path) = args.compiled {
        cfg.model.compiled = path;
    }
    if args.font.is_some() {
        cfg.font_path = args.font;
    }

    let kind = cfg.detector.kind;
    if !kind.is_available() {
        ui.status(
            Glyph::Fail,
            format!(
                "Detector backend {} is not built in. Rebuild with --features backend-tract, or pass --detector stub to run without a model.",
                kind.as_str()
            ),
        );
        return Err(anyhow!(
            "detector backend {} requires the backend-tract feature",
            kind.as_str()
        ));
    }
    if kind == DetectorKind::Stub {
        ui.status(Glyph::Warn, "Stub detector selected; no model runs and no boxes are drawn.");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
        .context("error setting Ctrl-C handler")?;

    let artifact = if args.skip_prepare {
        cfg.model.compiled.clone()
    } else {
        let stage = ui.stage("prepare model");
        let mut preparer = ModelPreparer::with_command(cfg.model.clone(), &cfg.export_command);
        let prepared = match preparer.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                drop(stage);
                ui.status(Glyph::Fail, "Model preparation failed.");
                return Err(err);
            }
        };
        stage.finish_ok();
        match prepared {
            Preparation::Reused(path) => path,
            Preparation::Exported(path) => {
                log::info!("exported {}", path.display());
                path
            }
        }
    };

    let detector = match build_backend(&cfg.detector, &artifact) {
        Ok(detector) => detector,
        Err(err) => {
            ui.status(
                Glyph::Fail,
                format!("Failed to load the {} detector.", kind.as_str()),
            );
            return Err(err.context(format!("failed to load detector for {}", artifact.display())));
        }
    };
    let mut overlay = DetectionOverlay::new(detector);
    if let Some(font) = cfg.font_path.as_deref() {
        overlay = overlay.with_font_file(font)?;
    }

    let mut backend = open_backend(cfg.capture_backend, &cfg.capture)?;
    let handle = match backend.open(SensorId(args.sensor)) {
        Ok(handle) => handle,
        Err(err) => {
            ui.status(Glyph::Fail, "Failed to open camera.");
            return Err(anyhow!(err));
        }
    };
    let mut display = open_display(args.headless);

    ui.status(
        Glyph::Ok,
        format!(
            "YOLOv8 live detection running with {} on sensor {}... (press ESC to exit)",
            overlay.backend_name(),
            args.sensor
        ),
    );
    let session = PreviewLoop::new(cfg.failure)
        .with_max_frames(args.max_frames)
        .with_stop_flag(stop)
        .run_single(handle, display.as_mut(), &mut overlay, WINDOW)?;

    if let SessionEnd::SourceLost { .. } = session.end {
        ui.status(Glyph::Warn, "Frame capture failed.");
    }
    if overlay.inference_errors() > 0 {
        ui.status(
            Glyph::Warn,
            format!("{} frames shown without detections after inference errors.", overlay.inference_errors()),
        );
    }
    log::info!(
        "live detection finished: {} frames, {} read failures",
        session.frames_shown,
        session.read_failures
    );
    Ok(())
}
