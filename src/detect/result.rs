use serde::Serialize;

/// Bounding box in pixel coordinates of the source frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoundingBox {
    /// Scale a normalized `[ymin, xmin, ymax, xmax]` box to a frame.
    pub fn from_normalized(normalized: [f32; 4], width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            ymin: normalized[0] * h,
            xmin: normalized[1] * w,
            ymax: normalized[2] * h,
            xmax: normalized[3] * w,
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

/// Detections of one frame whose scores all exceed `min_score`.
///
/// Order follows the model output order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSet {
    detections: Vec<Detection>,
    min_score: f32,
}

impl DetectionSet {
    pub(crate) fn new(detections: Vec<Detection>, min_score: f32) -> Self {
        debug_assert!(detections.iter().all(|d| d.score > min_score));
        Self {
            detections,
            min_score,
        }
    }

    /// Threshold this set was filtered with.
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn boxes(&self) -> Vec<[f32; 4]> {
        self.detections.iter().map(|d| d.bbox.as_array()).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.detections.iter().map(|d| d.label.as_str()).collect()
    }

    pub fn scores(&self) -> Vec<f32> {
        self.detections.iter().map(|d| d.score).collect()
    }

    /// Distinct labels in first-appearance order.
    pub fn distinct_labels(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for detection in &self.detections {
            if !seen.contains(&detection.label.as_str()) {
                seen.push(detection.label.as_str());
            }
        }
        seen
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.detections.iter().any(|d| d.label == label)
    }

    /// Split into index-aligned `(boxes, labels, scores)`.
    pub fn into_parts(self) -> (Vec<[f32; 4]>, Vec<String>, Vec<f32>) {
        let mut boxes = Vec::with_capacity(self.detections.len());
        let mut labels = Vec::with_capacity(self.detections.len());
        let mut scores = Vec::with_capacity(self.detections.len());
        for detection in self.detections {
            boxes.push(detection.bbox.as_array());
            labels.push(detection.label);
            scores.push(detection.score);
        }
        (boxes, labels, scores)
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}
