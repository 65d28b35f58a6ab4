use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::artifact::FrameMetadata;

/// Pixel position in ROI crop coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One plate found by the OCR engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlateRead {
    #[serde(default)]
    pub plate: String,
    #[serde(default)]
    pub confidence: f32,
    /// Corner points, counter-clockwise from top-left.
    #[serde(default)]
    pub coordinates: Vec<Point>,
}

impl PlateRead {
    /// Width of the plate's top edge, if corners are known.
    pub fn width(&self) -> Option<f32> {
        match self.coordinates.as_slice() {
            [first, second, ..] => Some(second.x - first.x),
            _ => None,
        }
    }
}

/// OCR result for one crop. Extra fields in the engine output are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrReading {
    #[serde(default)]
    pub results: Vec<PlateRead>,
}

/// Everything known about one processed crop, as handed to the analyser.
#[derive(Clone, Debug)]
pub struct FrameObservation {
    pub stream: String,
    pub timestamp: NaiveDateTime,
    pub frame_no: u64,
    pub roi_id: u32,
    pub metadata: FrameMetadata,
    pub reading: OcrReading,
}

/// Plate-detection event produced by the analyser.
///
/// `plate_text` is either a normalized plate or an unknown-vehicle identifier
/// of the form `[UNK_<LABEL>_<TRACK>]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedPlate {
    pub plate_text: String,
    pub track_id: Option<u32>,
    pub label: String,
    pub timestamp: NaiveDateTime,
    pub roi_id: u32,
    pub confidence: f32,
}

impl DetectedPlate {
    pub fn is_unknown(&self) -> bool {
        is_unknown_vehicle(&self.plate_text)
    }
}

pub const UNKNOWN_VEHICLE_PREFIX: &str = "[UNK";
pub const UNKNOWN_VEHICLE_POSTFIX: &str = "]";

pub fn is_unknown_vehicle(text: &str) -> bool {
    text.starts_with(UNKNOWN_VEHICLE_PREFIX)
}

pub fn unknown_vehicle_id(label: &str, track_id: u32) -> String {
    format!(
        "{}_{}_{}{}",
        UNKNOWN_VEHICLE_PREFIX,
        label.to_uppercase(),
        track_id,
        UNKNOWN_VEHICLE_POSTFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alpr_output() {
        let json = r#"{
            "version": 2,
            "data_type": "alpr_results",
            "img_width": 1381,
            "results": [{
                "plate": "ABC123",
                "confidence": 87.5,
                "matches_template": 0,
                "coordinates": [{"x": 499, "y": 268}, {"x": 596, "y": 266},
                                {"x": 596, "y": 287}, {"x": 500, "y": 289}],
                "candidates": []
            }]
        }"#;
        let reading: OcrReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.results.len(), 1);
        assert_eq!(reading.results[0].plate, "ABC123");
        assert_eq!(reading.results[0].width(), Some(97.0));
    }

    #[test]
    fn width_needs_two_corners() {
        let read = PlateRead {
            coordinates: vec![Point { x: 1.0, y: 1.0 }],
            ..PlateRead::default()
        };
        assert_eq!(read.width(), None);
    }

    #[test]
    fn unknown_identifiers() {
        let id = unknown_vehicle_id("truck", 95);
        assert_eq!(id, "[UNK_TRUCK_95]");
        assert!(is_unknown_vehicle(&id));
        assert!(!is_unknown_vehicle("ABC123"));
    }
}
