//! prepare_model - produce the compiled detection model ahead of time
//!
//! Reuses an existing compiled artifact; otherwise downloads the portable weights
//! if needed, runs the export tool and moves its output into place.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use csicam::{
    ui::{Glyph, Ui},
    CsicamConfig, ModelPreparer, Preparation,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Prepare the compiled YOLOv8 model artifact")]
struct Args {
    /// Portable model path.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Where the compiled artifact should end up.
    #[arg(long)]
    compiled: Option<PathBuf>,
    /// Export format handed to the export tool (engine, onnx, ...).
    #[arg(long)]
    format: Option<String>,
    /// Export tool to run.
    #[arg(long)]
    export_command: Option<String>,
    /// Output style: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_args(args.ui.as_deref());

    let mut cfg = CsicamConfig::load()?;
    if let Some(path) = args.model {
        cfg.model.portable = path;
    }
    if let Some(path) = args.compiled {
        cfg.model.compiled = path;
    }
    if let Some(format) = args.format {
        cfg.model.export_format = format.trim().to_ascii_lowercase();
    }
    if let Some(command) = args.export_command {
        cfg.export_command = command;
    }

    let mut preparer = ModelPreparer::with_command(cfg.model.clone(), &cfg.export_command);
    let stage = ui.stage("prepare model");
    let prepared = preparer.prepare()?;
    stage.finish_ok();
    match prepared {
        Preparation::Reused(path) => ui.status(
            Glyph::Ok,
            format!("Compiled model already present at {}.", path.display()),
        ),
        Preparation::Exported(path) => ui.status(
            Glyph::Ok,
            format!("Compiled model written to {}.", path.display()),
        ),
    }
    Ok(())
}
