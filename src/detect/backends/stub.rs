use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Stand-in backend. Returns a fixed result (empty by default) for every frame.
#[derive(Default)]
pub struct StubBackend {
    scripted: DetectionResult,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `result` for every frame.
    pub fn with_result(result: DetectionResult) -> Self {
        Self {
            scripted: result,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        self.frames_seen += 1;
        Ok(self.scripted.clone())
    }
}
