use serde::{Deserialize, Serialize};

/// Axis-aligned box. `x`/`y` is the top-left corner.
///
/// The same type is used for native and display space; which space a value is
/// in follows from where it came from (`Detection` is always native).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates `(x1, y1) .. (x2, y2)`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One detected object in native pixel space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// Score in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    /// Overlay caption: class name and confidence as a rounded percentage.
    pub fn caption(&self) -> String {
        let percent = (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
        format!("{} {}%", self.label, percent)
    }
}

/// The detection list for one frame.
///
/// A set is replaced as a whole every loop cycle; it is never patched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    /// Index of the frame the detections were computed on (0 before the first cycle).
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(frame_index: u64, detections: Vec<Detection>) -> Self {
        Self {
            frame_index,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
