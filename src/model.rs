//! Model artifact preparation.
//!
//! Live detection needs a compiled model. Preparation is idempotent: an existing
//! compiled artifact is reused as-is (no staleness check). Otherwise the portable
//! model is fetched if missing, handed to the export tool, and the tool's output
//! (`<stem>.<format>` next to the portable file) is renamed to the compiled path.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};

/// Default location of the pretrained YOLOv8n weights.
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://github.com/ultralytics/assets/releases/download/v8.2.0/yolov8n.pt";

pub const DEFAULT_PORTABLE_PATH: &str = "yolov8n.pt";

/// Builds with the in-process ONNX detector export ONNX; others export a TensorRT
/// engine for an external runtime.
#[cfg(feature = "backend-tract")]
pub const DEFAULT_COMPILED_PATH: &str = "yolov8n.onnx";
#[cfg(feature = "backend-tract")]
pub const DEFAULT_EXPORT_FORMAT: &str = "onnx";
#[cfg(not(feature = "backend-tract"))]
pub const DEFAULT_COMPILED_PATH: &str = "yolov8n.engine";
#[cfg(not(feature = "backend-tract"))]
pub const DEFAULT_EXPORT_FORMAT: &str = "engine";

/// Where the portable and compiled forms of the model live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub portable: PathBuf,
    pub compiled: PathBuf,
    /// Format name passed to the export tool; also the extension it writes.
    pub export_format: String,
    pub download_url: Option<String>,
}

impl Default for ModelArtifacts {
    fn default() -> Self {
        Self {
            portable: PathBuf::from(DEFAULT_PORTABLE_PATH),
            compiled: PathBuf::from(DEFAULT_COMPILED_PATH),
            export_format: DEFAULT_EXPORT_FORMAT.to_string(),
            download_url: Some(DEFAULT_DOWNLOAD_URL.to_string()),
        }
    }
}

impl ModelArtifacts {
    /// Path the export tool writes for this format.
    pub fn export_output(&self) -> PathBuf {
        self.portable.with_extension(&self.export_format)
    }
}

/// Converts a portable model into a compiled artifact.
pub trait Exporter {
    /// Run the export and return the path of the file it produced.
    fn export(&mut self, portable: &Path, format: &str) -> Result<PathBuf>;
}

/// Runs `<program> export model=<portable> format=<format>`.
#[derive(Clone, Debug)]
pub struct CommandExporter {
    program: String,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandExporter {
    fn default() -> Self {
        Self::new("yolo")
    }
}

impl Exporter for CommandExporter {
    fn export(&mut self, portable: &Path, format: &str) -> Result<PathBuf> {
        log::info!(
            "running {} export model={} format={}",
            self.program,
            portable.display(),
            format
        );
        let status = Command::new(&self.program)
            .arg("export")
            .arg(format!("model={}", portable.display()))
            .arg(format!("format={format}"))
            .status()
            .with_context(|| format!("failed to launch export tool {:?}", self.program))?;
        if !status.success() {
            bail!("{} export exited with {}", self.program, status);
        }
        Ok(portable.with_extension(format))
    }
}

/// Downloads a file to a destination path.
pub trait Fetcher {
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()>;
}

/// HTTP fetcher backed by `ureq`. Writes to `<dest>.part` and renames on success.
#[derive(Clone, Copy, Debug, Default)]
pub struct UreqFetcher;

#[cfg(feature = "model-download")]
impl Fetcher for UreqFetcher {
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        use std::io;

        log::info!("downloading {} to {}", url, dest.display());
        let response = ureq::get(url)
            .call()
            .with_context(|| format!("fetch model from {}", url))?;
        let partial = partial_path(dest);
        let mut file = fs::File::create(&partial)
            .with_context(|| format!("create {}", partial.display()))?;
        let bytes = io::copy(&mut response.into_reader(), &mut file)
            .with_context(|| format!("download {}", url))?;
        if bytes == 0 {
            let _ = fs::remove_file(&partial);
            return Err(anyhow!("empty download from {}", url));
        }
        fs::rename(&partial, dest)
            .with_context(|| format!("move download into {}", dest.display()))?;
        log::info!("downloaded {} bytes", bytes);
        Ok(())
    }
}

#[cfg(not(feature = "model-download"))]
impl Fetcher for UreqFetcher {
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        bail!(
            "{} is missing and downloading {} requires the model-download feature",
            dest.display(),
            url
        )
    }
}

#[cfg_attr(not(feature = "model-download"), allow(dead_code))]
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Result of a successful preparation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Preparation {
    /// The compiled artifact already existed; nothing ran.
    Reused(PathBuf),
    /// The export tool ran and its output was moved into place.
    Exported(PathBuf),
}

impl Preparation {
    pub fn path(&self) -> &Path {
        match self {
            Preparation::Reused(path) | Preparation::Exported(path) => path,
        }
    }
}

pub struct ModelPreparer {
    artifacts: ModelArtifacts,
    exporter: Box<dyn Exporter>,
    fetcher: Box<dyn Fetcher>,
}

impl ModelPreparer {
    pub fn new(
        artifacts: ModelArtifacts,
        exporter: Box<dyn Exporter>,
        fetcher: Box<dyn Fetcher>,
    ) -> Self {
        Self {
            artifacts,
            exporter,
            fetcher,
        }
    }

    /// Preparer using the `yolo` command line tool and the HTTP fetcher.
    pub fn with_command(artifacts: ModelArtifacts, program: &str) -> Self {
        Self::new(
            artifacts,
            Box::new(CommandExporter::new(program)),
            Box::new(UreqFetcher),
        )
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    pub fn prepare(&mut self) -> Result<Preparation> {
        let compiled = self.artifacts.compiled.clone();
        if compiled.exists() {
            log::info!("reusing compiled model {}", compiled.display());
            return Ok(Preparation::Reused(compiled));
        }

        let portable = self.artifacts.portable.clone();
        if !portable.exists() {
            let url = self.artifacts.download_url.as_deref().ok_or_else(|| {
                anyhow!(
                    "portable model {} is missing and no download URL is configured",
                    portable.display()
                )
            })?;
            self.fetcher
                .fetch(url, &portable)
                .with_context(|| format!("failed to obtain {}", portable.display()))?;
        }

        let produced = self
            .exporter
            .export(&portable, &self.artifacts.export_format)
            .with_context(|| format!("failed to export {}", portable.display()))?;
        if !produced.exists() {
            bail!(
                "export finished but {} was not written",
                produced.display()
            );
        }
        if produced != compiled {
            move_into_place(&produced, &compiled)?;
        }
        log::info!("compiled model ready at {}", compiled.display());
        Ok(Preparation::Exported(compiled))
    }
}

fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(from, to)
        .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("remove {}", from.display()))?;
    Ok(())
}
