use serde::{Deserialize, Serialize};

/// One detected object in one frame, as handed over by the detector+tracker.
///
/// Coordinates are in pixels of the frame the detection was produced for.
/// `category` and `track_id` are optional: a detector may emit an object it
/// could not classify, and a tracker only assigns an identity once it has
/// confirmed the object. Both cases are valid input and are skipped by the
/// crossing engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "DetectionRecord")]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
    pub category: Option<String>,
    pub confidence: f32,
    /// Centre of the object, `[x, y]` in pixels.
    pub centre: [f32; 2],
    pub track_id: Option<u64>,
}

impl Detection {
    /// Build a detection from its bounding box. The centre is the box midpoint.
    pub fn from_bbox(bbox: [f32; 4]) -> Self {
        Self {
            bbox,
            category: None,
            confidence: 1.0,
            centre: bbox_centre(&bbox),
            track_id: None,
        }
    }

    /// Build a `width` x `height` detection centred on `(cx, cy)`.
    pub fn centred(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Self {
            bbox: [cx - half_w, cy - half_h, cx + half_w, cy + half_h],
            category: None,
            confidence: 1.0,
            centre: [cx, cy],
            track_id: None,
        }
    }

    pub fn with_track(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn centre_x(&self) -> f32 {
        self.centre[0]
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

fn bbox_centre(bbox: &[f32; 4]) -> [f32; 2] {
    [(bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0]
}

/// Wire form of a detection. `centre` may be omitted and is then derived from
/// the bounding box; `label` is accepted as an alias for `category`.
#[derive(Deserialize)]
struct DetectionRecord {
    bbox: [f32; 4],
    #[serde(default, alias = "label")]
    category: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    centre: Option<[f32; 2]>,
    #[serde(default)]
    track_id: Option<u64>,
}

fn default_confidence() -> f32 {
    1.0
}

impl From<DetectionRecord> for Detection {
    fn from(record: DetectionRecord) -> Self {
        let centre = record.centre.unwrap_or_else(|| bbox_centre(&record.bbox));
        Self {
            bbox: record.bbox,
            category: record.category,
            confidence: record.confidence,
            centre,
            track_id: record.track_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_defaults_to_bbox_midpoint() {
        let det: Detection =
            serde_json::from_str(r#"{"bbox": [100, 50, 140, 130], "label": "person"}"#).unwrap();
        assert_eq!(det.centre, [120.0, 90.0]);
        assert_eq!(det.category.as_deref(), Some("person"));
        assert_eq!(det.confidence, 1.0);
        assert_eq!(det.track_id, None);
    }

    #[test]
    fn explicit_centre_wins() {
        let det: Detection = serde_json::from_str(
            r#"{"bbox": [0, 0, 10, 10], "centre": [3, 4], "track_id": 9, "confidence": 0.4}"#,
        )
        .unwrap();
        assert_eq!(det.centre, [3.0, 4.0]);
        assert_eq!(det.track_id, Some(9));
        assert!((det.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn centred_builds_symmetric_box() {
        let det = Detection::centred(200.0, 100.0, 40.0, 80.0)
            .with_track(3)
            .with_category("adult");
        assert_eq!(det.bbox, [180.0, 60.0, 220.0, 140.0]);
        assert_eq!(det.width(), 40.0);
        assert_eq!(det.height(), 80.0);
        assert_eq!(det.track_id, Some(3));
    }
}
