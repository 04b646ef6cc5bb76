//! GStreamer CSI capture backend.
//!
//! Builds the `nvarguscamerasrc` pipeline for one sensor, confirms it reaches
//! `Playing` without a bus error, and pulls RGB samples from the appsink.
//! Releasing a handle drops the pipeline to `Null`, which frees the Argus session.

use std::time::Duration;

use anyhow::Context;
use gstreamer::prelude::*;

use super::pipeline::{PipelineSpec, APPSINK_NAME};
use super::{CaptureBackend, CaptureError, CaptureHandle, CaptureSettings};
use crate::frame::Frame;
use crate::SensorId;

/// How long `open` waits for the pipeline to settle before declaring failure.
const OPEN_SETTLE: Duration = Duration::from_secs(3);

pub struct GstreamerBackend {
    settings: CaptureSettings,
}

impl GstreamerBackend {
    pub fn new(settings: CaptureSettings) -> anyhow::Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self { settings })
    }
}

impl CaptureBackend for GstreamerBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&mut self, id: SensorId) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        self.settings.check_range(id)?;
        let spec = PipelineSpec::new(id, &self.settings);
        let handle = GstreamerHandle::open(spec, self.settings.read_timeout).map_err(|err| {
            CaptureError::OpenFailed {
                id,
                reason: format!("{err:#}"),
            }
        })?;
        Ok(Box::new(handle))
    }
}

struct GstreamerHandle {
    spec: PipelineSpec,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: gstreamer_app::AppSink,
    read_timeout: Duration,
    frame_count: u64,
    last_read_ok: bool,
    last_error: Option<String>,
}

impl GstreamerHandle {
    fn open(spec: PipelineSpec, read_timeout: Duration) -> anyhow::Result<Self> {
        let description = spec.describe();
        log::debug!("GstreamerBackend: launching {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name(APPSINK_NAME)
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        let mut handle = Self {
            spec,
            pipeline: Some(pipeline),
            appsink,
            read_timeout,
            frame_count: 0,
            last_read_ok: false,
            last_error: None,
        };

        if let Err(err) = handle.start() {
            handle.release();
            return Err(err);
        }
        Ok(handle)
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let pipeline = self.pipeline.as_ref().context("pipeline already released")?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;

        let (result, current, _pending) =
            pipeline.state(gstreamer::ClockTime::from_mseconds(OPEN_SETTLE.as_millis() as u64));
        result.map_err(|_| anyhow::anyhow!("pipeline stuck in {:?}", current))?;

        self.poll_bus();
        if let Some(err) = &self.last_error {
            anyhow::bail!("{}", err);
        }
        log::info!("GstreamerBackend: sensor {} playing", self.spec.sensor_id);
        Ok(())
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }

    fn pull(&mut self) -> Result<Frame, CaptureError> {
        let id = self.spec.sensor_id;
        if self.pipeline.is_none() {
            return Err(CaptureError::Closed { id });
        }

        self.poll_bus();
        if let Some(reason) = self.last_error.take() {
            return Err(CaptureError::ReadFailed { id, reason });
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or(CaptureError::Timeout {
                id,
                timeout: self.read_timeout,
            })?;

        let (pixels, width, height) =
            sample_to_pixels(&sample).map_err(|err| CaptureError::ReadFailed {
                id,
                reason: format!("{err:#}"),
            })?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, id, self.frame_count).ok_or_else(|| {
            CaptureError::ReadFailed {
                id,
                reason: format!("sample does not hold a {}x{} RGB image", width, height),
            }
        })
    }
}

impl CaptureHandle for GstreamerHandle {
    fn sensor_id(&self) -> SensorId {
        self.spec.sensor_id
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        let result = self.pull();
        self.last_read_ok = result.is_ok();
        result
    }

    fn last_read_ok(&self) -> bool {
        self.last_read_ok
    }

    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!(
                    "GstreamerBackend: failed to stop sensor {}: {}",
                    self.spec.sensor_id,
                    err
                );
            }
            log::debug!(
                "GstreamerBackend: released sensor {} after {} frames",
                self.spec.sensor_id,
                self.frame_count
            );
        }
    }
}

impl Drop for GstreamerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let packed = data.get(..len).context("sample buffer is shorter than one frame")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row is out of bounds")?);
    }

    Ok((pixels, width, height))
}
