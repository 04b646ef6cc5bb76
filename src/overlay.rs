//! Per-frame transforms applied between capture and display.
//!
//! The preview loop hands every captured frame to a [`FrameStage`]. The plain camera
//! check uses [`Passthrough`]; live detection uses [`DetectionOverlay`], which runs a
//! detector backend and draws its boxes onto a copy of the frame.

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{Detection, DetectionResult, DetectorBackend};
use crate::frame::Frame;

/// A transform applied to each frame before it is shown.
pub trait FrameStage {
    fn name(&self) -> &'static str;

    /// Produce the frame to display. Stages must not fail the session; a stage
    /// that cannot do its work returns the input unchanged.
    fn apply(&mut self, frame: Frame) -> Frame;
}

/// Shows frames as captured.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl FrameStage for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn apply(&mut self, frame: Frame) -> Frame {
        frame
    }
}

/// Box and label geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle {
    pub line_thickness: u32,
    pub text_scale: f32,
    /// Tab height used when no font is loaded.
    pub tab_height: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_thickness: 2,
            text_scale: 16.0,
            tab_height: 14,
        }
    }
}

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 194, 255],
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Runs a detector on each frame and draws the result.
pub struct DetectionOverlay {
    backend: Box<dyn DetectorBackend>,
    style: OverlayStyle,
    font: Option<FontVec>,
    inference_errors: u64,
    last_detections: usize,
}

impl DetectionOverlay {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            style: OverlayStyle::default(),
            font: None,
            inference_errors: 0,
            last_detections: 0,
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|err| anyhow!("invalid font {}: {}", path.display(), err))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Frames whose inference failed and were shown unannotated.
    pub fn inference_errors(&self) -> u64 {
        self.inference_errors
    }

    /// Detection count of the most recent successful inference.
    pub fn last_detections(&self) -> usize {
        self.last_detections
    }

    /// Draw `result` onto a copy of `frame`.
    pub fn annotate(&self, frame: &Frame, result: &DetectionResult) -> Frame {
        let mut canvas = frame.to_image();
        for detection in &result.detections {
            self.draw_detection(&mut canvas, detection);
        }
        frame.with_image(canvas)
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (width, height) = canvas.dimensions();
        let detection = detection.clone().clamped(width, height);
        let x = detection.x1.round() as i32;
        let y = detection.y1.round() as i32;
        let w = detection.width().round() as u32;
        let h = detection.height().round() as u32;
        if w == 0 || h == 0 {
            return;
        }

        let color = class_color(detection.class_id);
        for inset in 0..self.style.line_thickness.min(w / 2).min(h / 2) {
            let rect = Rect::at(x + inset as i32, y + inset as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let text = format!("{} {:.2}", detection.label, detection.score);
        let scale = PxScale::from(self.style.text_scale);
        let (tab_w, tab_h) = match &self.font {
            Some(font) => {
                let (tw, th) = text_size(scale, font, &text);
                (tw + 4, th + 4)
            }
            None => (w.min(text.len() as u32 * 7), self.style.tab_height),
        };
        if tab_w == 0 || tab_h == 0 {
            return;
        }
        // Sit above the box, or just inside it at the top edge.
        let tab_y = if y >= tab_h as i32 { y - tab_h as i32 } else { y };
        draw_filled_rect_mut(canvas, Rect::at(x, tab_y).of_size(tab_w, tab_h), color);
        if let Some(font) = &self.font {
            draw_text_mut(canvas, TEXT_COLOR, x + 2, tab_y + 2, scale, font, &text);
        }
    }
}

impl FrameStage for DetectionOverlay {
    fn name(&self) -> &'static str {
        "detection-overlay"
    }

    fn apply(&mut self, frame: Frame) -> Frame {
        match self.backend.detect(&frame) {
            Ok(result) => {
                self.last_detections = result.len();
                if result.is_empty() {
                    frame
                } else {
                    log::debug!(
                        "sensor {} frame {}: {} detections",
                        frame.sensor_id(),
                        frame.sequence(),
                        result.len()
                    );
                    self.annotate(&frame, &result)
                }
            }
            Err(err) => {
                self.inference_errors += 1;
                log::warn!(
                    "inference failed on sensor {} frame {}: {:#}",
                    frame.sensor_id(),
                    frame.sequence(),
                    err
                );
                frame
            }
        }
    }
}
