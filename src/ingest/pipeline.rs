//! CSI capture pipeline description.
//!
//! The Jetson camera path is `nvarguscamerasrc` (Argus ISP) into NVMM memory, converted
//! by `nvvidconv` and `videoconvert` into packed RGB for an `appsink`. Only the sensor
//! id, size, rate and flip method vary; everything else is fixed.

use std::fmt;

use super::CaptureSettings;
use crate::SensorId;

/// Name of the appsink element that frames are pulled from.
pub const APPSINK_NAME: &str = "sink";

/// Parameters of one CSI capture pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSpec {
    pub sensor_id: SensorId,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub flip_method: u32,
}

impl PipelineSpec {
    pub fn new(sensor_id: SensorId, settings: &CaptureSettings) -> Self {
        Self {
            sensor_id,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            flip_method: settings.flip_method,
        }
    }

    /// The `gst-launch` style description.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nvarguscamerasrc sensor-id={} ! \
             video/x-raw(memory:NVMM),width={},height={},framerate={}/1 ! \
             nvvidconv flip-method={} ! video/x-raw,format=BGRx ! \
             videoconvert ! video/x-raw,format=RGB ! \
             appsink name={} sync=false max-buffers=1 drop=true",
            self.sensor_id.0,
            self.width,
            self.height,
            self.fps,
            self.flip_method,
            APPSINK_NAME,
        )
    }
}
