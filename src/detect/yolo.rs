//! YOLOv8 detection head decoding.
//!
//! The exported graph emits one tensor of shape `[1, 4 + classes, anchors]`
//! (some exporters transpose it to `[1, anchors, 4 + classes]`). Each anchor holds a
//! centre-format box in model input pixels followed by per-class scores.

use anyhow::{bail, Result};

use super::labels::{class_label, COCO_CLASSES};
use super::result::{non_max_suppression, Detection, DetectionResult};

const BOX_CHANNELS: usize = 4;
const HEAD_STRIDES: [u32; 3] = [8, 16, 32];

/// Thresholds and input geometry for decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloDecoder {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
}

impl Default for YoloDecoder {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence: 0.25,
            iou: 0.45,
        }
    }
}

impl YoloDecoder {
    /// Anchors the three-stride head produces for this input size (8400 at 640px).
    pub fn anchor_count(&self) -> usize {
        HEAD_STRIDES
            .iter()
            .map(|stride| (self.input_size / stride) as usize)
            .map(|cells| cells * cells)
            .sum()
    }

    /// Picks the channel axis: the COCO head width wins, then the anchor count for
    /// this input size, then the shorter axis.
    fn channels_first(&self, a: usize, b: usize) -> bool {
        let coco = BOX_CHANNELS + COCO_CLASSES.len();
        if a != b && (a == coco || b == coco) {
            return a == coco;
        }
        let anchors = self.anchor_count();
        if a != b && (a == anchors || b == anchors) {
            return b == anchors;
        }
        a <= b
    }

    /// Decode a raw output tensor into detections scaled to a `frame_width` x
    /// `frame_height` frame.
    pub fn decode(
        &self,
        data: &[f32],
        shape: &[usize],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<DetectionResult> {
        let &[batch, a, b] = shape else {
            bail!("expected a rank-3 detection tensor, got shape {:?}", shape);
        };
        if batch != 1 {
            bail!("expected batch size 1, got {}", batch);
        }
        let channels_first = self.channels_first(a, b);
        let (channels, anchors) = if channels_first { (a, b) } else { (b, a) };
        if channels <= BOX_CHANNELS {
            bail!("detection tensor has {} channels, need more than 4", channels);
        }
        if data.len() != channels * anchors {
            bail!(
                "detection tensor holds {} values, shape {:?} needs {}",
                data.len(),
                shape,
                channels * anchors
            );
        }

        let at = |channel: usize, anchor: usize| -> f32 {
            if channels_first {
                data[channel * anchors + anchor]
            } else {
                data[anchor * channels + channel]
            }
        };

        let scale_x = frame_width as f32 / self.input_size as f32;
        let scale_y = frame_height as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let Some((class_id, score)) = (BOX_CHANNELS..channels)
                .map(|channel| (channel - BOX_CHANNELS, at(channel, anchor)))
                .max_by(|x, y| x.1.total_cmp(&y.1))
            else {
                continue;
            };
            if score < self.confidence {
                continue;
            }

            let cx = at(0, anchor);
            let cy = at(1, anchor);
            let w = at(2, anchor);
            let h = at(3, anchor);
            let detection = Detection {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
                score,
                class_id,
                label: class_label(class_id).into_owned(),
            };
            candidates.push(detection.clamped(frame_width, frame_height));
        }

        Ok(DetectionResult::new(non_max_suppression(
            candidates, self.iou,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNELS: usize = 6;
    const ANCHORS: usize = 8;

    /// Channels-first tensor with 2 classes and 8 anchors; anchors 3.. are empty.
    fn tensor() -> Vec<f32> {
        // rows: cx, cy, w, h, class0, class1 ; columns: anchors
        let rows: [[f32; 3]; CHANNELS] = [
            [100.0, 104.0, 500.0],
            [100.0, 100.0, 300.0],
            [40.0, 40.0, 20.0],
            [40.0, 40.0, 20.0],
            [0.9, 0.8, 0.1],
            [0.1, 0.05, 0.2],
        ];
        let mut data = vec![0.0; CHANNELS * ANCHORS];
        for (channel, row) in rows.iter().enumerate() {
            data[channel * ANCHORS..channel * ANCHORS + 3].copy_from_slice(row);
        }
        data
    }

    #[test]
    fn decodes_and_suppresses_overlaps() {
        let data = tensor();
        let decoder = YoloDecoder {
            input_size: 640,
            confidence: 0.25,
            iou: 0.45,
        };

        let result = decoder.decode(&data, &[1, CHANNELS, ANCHORS], 640, 480).unwrap();
        // Anchors 0 and 1 overlap heavily as class 0; anchor 2 is below threshold.
        assert_eq!(result.len(), 1);
        let best = &result.detections[0];
        assert_eq!(best.class_id, 0);
        assert_eq!(best.label, "person");
        assert!((best.score - 0.9).abs() < 1e-6);
        assert!((best.x1 - 80.0).abs() < 1e-3);
        assert!((best.x2 - 120.0).abs() < 1e-3);
        // y is scaled by 480 / 640.
        assert!((best.y1 - 60.0).abs() < 1e-3);
        assert!((best.y2 - 90.0).abs() < 1e-3);
    }

    #[test]
    fn transposed_layout_decodes_the_same() {
        let data = tensor();
        let mut transposed = vec![0.0; data.len()];
        for c in 0..CHANNELS {
            for a in 0..ANCHORS {
                transposed[a * CHANNELS + c] = data[c * ANCHORS + a];
            }
        }
        let decoder = YoloDecoder::default();

        let first = decoder.decode(&data, &[1, CHANNELS, ANCHORS], 640, 640).unwrap();
        let second = decoder
            .decode(&transposed, &[1, ANCHORS, CHANNELS], 640, 640)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn small_input_with_fewer_anchors_than_channels() {
        let decoder = YoloDecoder {
            input_size: 32,
            confidence: 0.25,
            iou: 0.45,
        };
        let channels = BOX_CHANNELS + COCO_CLASSES.len();
        let anchors = decoder.anchor_count();
        assert_eq!(anchors, 21);

        // One bicycle (class 1) at anchor 5.
        let mut data = vec![0.0; channels * anchors];
        for (channel, value) in [(0, 16.0), (1, 16.0), (2, 8.0), (3, 8.0), (5, 0.7)] {
            data[channel * anchors + 5] = value;
        }
        let mut transposed = vec![0.0; data.len()];
        for c in 0..channels {
            for a in 0..anchors {
                transposed[a * channels + c] = data[c * anchors + a];
            }
        }

        let first = decoder.decode(&data, &[1, channels, anchors], 32, 32).unwrap();
        let second = decoder
            .decode(&transposed, &[1, anchors, channels], 32, 32)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.detections[0].label, "bicycle");
        assert!((first.detections[0].x1 - 12.0).abs() < 1e-3);
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_malformed_shapes() {
        let decoder = YoloDecoder::default();
        assert!(decoder.decode(&[0.0; 4], &[1, 4], 640, 480).is_err());
        assert!(decoder.decode(&[0.0; 12], &[1, 4, 3], 640, 480).is_err());
        assert!(decoder.decode(&[0.0; 5], &[1, 6, 3], 640, 480).is_err());
    }
}
