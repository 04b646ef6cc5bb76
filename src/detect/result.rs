/// One labelled box in frame pixel coordinates (top-left / bottom-right corners).
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp corners into a `width` x `height` frame.
    pub fn clamped(mut self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        self.x1 = self.x1.clamp(0.0, max_x);
        self.x2 = self.x2.clamp(0.0, max_x);
        self.y1 = self.y1.clamp(0.0, max_y);
        self.y2 = self.y2.clamp(0.0, max_y);
        self
    }
}

/// Detections for one frame. Consumed by the overlay, never stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// Highest-scoring detection.
    pub fn best(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Greedy per-class non-maximum suppression. Output is sorted by descending score.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id && existing.iou(&candidate) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: usize) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
            label: String::new(),
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = det(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let far = det(20.0, 20.0, 30.0, 30.0, 0.9, 0);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_same_class() {
        let kept = non_max_suppression(
            vec![
                det(0.0, 0.0, 10.0, 10.0, 0.6, 0),
                det(1.0, 1.0, 11.0, 11.0, 0.9, 0),
                det(1.0, 1.0, 11.0, 11.0, 0.8, 2),
                det(50.0, 50.0, 60.0, 60.0, 0.3, 0),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.3]);
    }

    #[test]
    fn clamped_keeps_boxes_inside_frame() {
        let d = det(-5.0, -1.0, 700.0, 500.0, 0.5, 0).clamped(640, 480);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (0.0, 0.0, 639.0, 479.0));
    }

    #[test]
    fn best_picks_highest_score() {
        let result = DetectionResult::new(vec![
            det(0.0, 0.0, 1.0, 1.0, 0.2, 0),
            det(0.0, 0.0, 1.0, 1.0, 0.7, 1),
        ]);
        assert_eq!(result.best().map(|d| d.class_id), Some(1));
        assert_eq!(result.len(), 2);
    }
}
