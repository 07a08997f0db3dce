use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-frame (video pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn square(x: f64, y: f64, size: f64) -> Self {
        Self::new(x, y, size, size)
    }

    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.w && py >= self.y && py <= self.y + self.h
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// A detected object as reported by the detection source. `id` is assigned
/// by the source and is the track's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTrack {
    pub id: i64,
    pub rect: Rect,
    pub label: String,
    pub aux_data: String,
    pub confidence: Option<f32>,
}

/// A map pin. Produced by the normalizer and handed straight to the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
}

impl PinRecord {
    pub fn new(lat: f64, lon: f64, name: impl Into<String>) -> Self {
        Self { lat, lon, name: name.into() }
    }
}
