use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
///
/// Serialized as `[x1, y1, x2, y2]` to keep sidecar files compact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Sum of squared differences between the two corner pairs.
    pub fn corner_distance_sq(&self, other: &BoundingBox) -> f32 {
        let dx1 = self.x1 - other.x1;
        let dy1 = self.y1 - other.y1;
        let dx2 = self.x2 - other.x2;
        let dy2 = self.y2 - other.y2;
        dx1 * dx1 + dy1 * dy1 + dx2 * dx2 + dy2 * dy2
    }

    /// Strict containment of a point after shifting the box by `-offset`.
    pub fn contains_shifted(&self, x: f32, y: f32, offset: (f32, f32)) -> bool {
        let x0 = self.x1 - offset.0;
        let y0 = self.y1 - offset.1;
        let x1 = self.x2 - offset.0;
        let y1 = self.y2 - offset.1;
        x > x0 && x < x1 && y > y0 && y < y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object found by a detector backend. Consumed, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(default)]
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }
}

/// Object classes forwarded from the detector to tracking and artifacts.
pub const VEHICLE_LABELS: [&str; 4] = ["car", "motorcycle", "bus", "truck"];

pub fn is_vehicle(detection: &Detection) -> bool {
    VEHICLE_LABELS.contains(&detection.label.as_str())
}
