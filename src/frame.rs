//! Captured frames and side-by-side composition.
//!
//! - `Frame`: one decoded RGB8 image from a capture handle. Callers get read-only access.
//! - `compose_horizontal`: joins two frames for dual preview, enforcing matching heights.
//!
//! A frame lives for one loop iteration. Nothing in this crate persists frames.

use image::imageops::{self, FilterType};
use image::{GenericImage, RgbImage};
use thiserror::Error;

use crate::SensorId;

// ----------------------------------------------------------------------------
// Frame: one decoded image
// ----------------------------------------------------------------------------

/// A decoded RGB8 frame.
///
/// Pixels are private. Callers read through `image()` and produce modified copies
/// with `to_image()`; a captured frame is never mutated in place.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    sensor_id: SensorId,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sensor_id: SensorId, sequence: u64) -> Self {
        Self {
            image,
            sensor_id,
            sequence,
        }
    }

    /// Build a frame from tightly packed RGB bytes.
    ///
    /// Returns `None` when the buffer length does not equal `width * height * 3`.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sensor_id: SensorId,
        sequence: u64,
    ) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, sensor_id, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    /// Per-session read counter, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw RGB bytes, row-major, no padding.
    pub fn as_rgb(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Owned copy of the pixels for annotation.
    pub fn to_image(&self) -> RgbImage {
        self.image.clone()
    }

    /// New frame with the same identity and different pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self::new(image, self.sensor_id, self.sequence)
    }
}

// ----------------------------------------------------------------------------
// Composition
// ----------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("cannot compose frames side by side: left is {left}px tall, right is {right}px tall")]
    HeightMismatch { left: u32, right: u32 },
    #[error("composed width {0} overflows")]
    TooWide(u64),
}

/// What dual preview does when the two frames differ in height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeightMismatch {
    /// Fail with `ComposeError::HeightMismatch`.
    #[default]
    Reject,
    /// Scale the right frame to the left frame's height, keeping its aspect ratio.
    Resize,
}

/// Concatenate two frames left to right.
///
/// The result keeps the left frame's sensor id and sequence.
pub fn compose_horizontal(
    left: &Frame,
    right: &Frame,
    on_mismatch: HeightMismatch,
) -> Result<Frame, ComposeError> {
    if left.height() != right.height() {
        match on_mismatch {
            HeightMismatch::Reject => {
                return Err(ComposeError::HeightMismatch {
                    left: left.height(),
                    right: right.height(),
                })
            }
            HeightMismatch::Resize => {
                let resized = resize_to_height(right.image(), left.height());
                return concat(left, &resized);
            }
        }
    }
    concat(left, right.image())
}

fn concat(left: &Frame, right: &RgbImage) -> Result<Frame, ComposeError> {
    let width = left.width() as u64 + right.width() as u64;
    let width = u32::try_from(width).map_err(|_| ComposeError::TooWide(width))?;
    let mut canvas = RgbImage::new(width, left.height());
    // Both copies fit by construction: heights are equal and widths sum to the canvas.
    canvas
        .copy_from(left.image(), 0, 0)
        .and_then(|_| canvas.copy_from(right, left.width(), 0))
        .map_err(|_| ComposeError::HeightMismatch {
            left: left.height(),
            right: right.height(),
        })?;
    Ok(left.with_image(canvas))
}

fn resize_to_height(image: &RgbImage, height: u32) -> RgbImage {
    let scaled_width = (image.width() as u64 * height as u64)
        .checked_div(image.height() as u64)
        .unwrap_or(0)
        .max(1) as u32;
    imageops::resize(image, scaled_width, height, FilterType::Triangle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
