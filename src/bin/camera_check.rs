//! camera_check - CSI camera check utility
//!
//! 1. Lists /dev/video* nodes and the v4l2 device summary
//! 2. Probes each candidate sensor (open, one read, release)
//! 3. Previews each available camera on its own until ESC
//! 4. Previews the first two available cameras side by side until ESC

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use csicam::{
    display::open_display,
    ingest::open_backend,
    probe::{list_video_devices, v4l2_summary},
    ui::{Glyph, Ui},
    CaptureBackendKind, CsicamConfig, Passthrough, PreviewLoop, ProbePolicy, Prober, SessionEnd,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Check and preview CSI cameras on a Jetson Nano")]
struct Args {
    /// Use generated frames instead of camera hardware.
    #[arg(long)]
    synthetic: bool,
    /// Run previews without windows.
    #[arg(long)]
    headless: bool,
    /// End each preview after this many frames instead of waiting for ESC.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Probe policy: strict (open and read one frame) or open-only.
    #[arg(long)]
    policy: Option<String>,
    /// Number of sensor identifiers to probe, starting at 0.
    #[arg(long)]
    max_sensors: Option<u32>,
    /// Skip the side-by-side preview.
    #[arg(long)]
    no_dual: bool,
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
    if let Some(policy) = args.policy.as_deref() {
        cfg.probe_policy = ProbePolicy::parse(policy)
            .ok_or_else(|| anyhow!("unknown probe policy {:?}", policy))?;
    }
    if let Some(max) = args.max_sensors {
        cfg.capture.max_sensors = max;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
        .context("error setting Ctrl-C handler")?;

    ui.status(Glyph::Start, "Jetson Nano Camera Check Utility");
    println!("-----------------------------------");
    report_devices(&ui);

    let mut backend = open_backend(cfg.capture_backend, &cfg.capture)?;
    let mut display = open_display(args.headless);
    let preview = PreviewLoop::new(cfg.failure)
        .with_height_mismatch(cfg.height_mismatch)
        .with_max_frames(args.max_frames)
        .with_stop_flag(stop.clone());

    let prober = Prober::new(cfg.capture.clone(), cfg.probe_policy);
    let report = prober.probe_all(backend.as_mut());

    for (id, outcome) in &report.outcomes {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        println!();
        ui.status(Glyph::Camera, format!("Testing camera sensor-id={id} ..."));
        if !outcome.is_available() {
            ui.status(Glyph::Fail, format!("Camera {id} is not usable: {outcome}."));
            continue;
        }
        let handle = match backend.open(*id) {
            Ok(handle) => handle,
            Err(err) => {
                ui.status(Glyph::Fail, format!("Failed to reopen camera {id}: {err}"));
                continue;
            }
        };
        ui.status(
            Glyph::Ok,
            format!("Camera {id} opened successfully. Showing preview (press ESC to exit)."),
        );
        let session = preview
            .run_single(handle, display.as_mut(), &mut Passthrough, &format!("Camera {id}"))
            .with_context(|| format!("preview of camera {id} failed"))?;
        if let SessionEnd::SourceLost { consecutive_failures } = session.end {
            ui.status(
                Glyph::Warn,
                format!("Camera {id} stopped delivering frames ({consecutive_failures} failed reads in a row)."),
            );
        }
    }

    if !args.no_dual && !stop.load(Ordering::SeqCst) {
        println!();
        ui.status(Glyph::Camera, "Attempting dual camera preview...");
        let available = report.available();
        let pair = match available.as_slice() {
            [left, right, ..] => {
                let left = backend.open(*left);
                let right = backend.open(*right);
                match (left, right) {
                    (Ok(left), Ok(right)) => Some((left, right)),
                    // Any handle that did open is released when dropped here.
                    _ => None,
                }
            }
            _ => None,
        };
        match pair {
            Some((left, right)) => {
                ui.status(Glyph::Ok, "Both cameras opened successfully. Press ESC to exit.");
                let session = preview
                    .run_dual(left, right, display.as_mut(), "Dual Camera")
                    .context("dual preview failed")?;
                if session.discarded_iterations > 0 {
                    ui.status(
                        Glyph::Warn,
                        format!("{} frame pairs dropped after read errors.", session.discarded_iterations),
                    );
                }
            }
            None => ui.status(
                Glyph::Fail,
                "One or both cameras failed to open. Dual preview not supported on this board.",
            ),
        }
    }

    println!();
    ui.status(Glyph::Ok, "Camera test completed.");
    Ok(())
}

fn report_devices(ui: &Ui) {
    ui.status(Glyph::Search, "Listing /dev/video* devices:");
    let devices = list_video_devices();
    if devices.is_empty() {
        println!("No video devices found.");
    }
    for device in &devices {
        println!("{}", device.display());
    }
    println!("\nChecking v4l2 devices:\n");
    match v4l2_summary() {
        Some(summary) => println!("{summary}"),
        None => println!("v4l2-ctl not found, install with sudo apt install v4l-utils"),
    }
}
