use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::detect::yolo::YoloDecoder;
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX graphs.
///
/// The frame is stretched to the square model input, inferred on the CPU, and the
/// decoded boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    decoder: YoloDecoder,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, decoder: YoloDecoder) -> Result<Self> {
        let model_path = model_path.as_ref();
        let is_onnx = model_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            bail!(
                "tract can only run ONNX graphs; {} needs a runtime for its own format \
                 (set model.export_format = \"onnx\" to run it in-process)",
                model_path.display()
            );
        }

        let side = decoder.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({}x{} input)",
            model_path.display(),
            side,
            side
        );
        Ok(Self { model, decoder })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.decoder.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        self.decoder
            .decode(&data, &shape, frame.width(), frame.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.decoder.input_size;
        let blank = Frame::new(image::RgbImage::new(side, side), crate::SensorId(0), 0);
        self.detect(&blank).map(|_| ())
    }
}
