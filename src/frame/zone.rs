use serde::{Deserialize, Serialize};

/// A drop zone in unit-square coordinates of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameZone {
    pub id: String,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel rectangle of a zone on a concrete canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

impl FrameZone {
    /// Clamps every coordinate into `[0, 1]` and shrinks the zone so it ends
    /// inside the unit square.
    pub fn sanitized(&self) -> FrameZone {
        let left = clamp01(self.left);
        let top = clamp01(self.top);
        let width = clamp01(self.width).min(1.0 - left);
        let height = clamp01(self.height).min(1.0 - top);
        FrameZone {
            id: self.id.clone(),
            left,
            top,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Scales the zone onto a `canvas_width` x `canvas_height` canvas. Never
    /// returns an empty or out-of-bounds rectangle.
    pub fn to_pixels(&self, canvas_width: u32, canvas_height: u32) -> ZoneRect {
        let scale = |value: f64, extent: u32| (value * f64::from(extent)).round() as u32;
        let x = scale(self.left, canvas_width).min(canvas_width.saturating_sub(1));
        let y = scale(self.top, canvas_height).min(canvas_height.saturating_sub(1));
        let width = scale(self.width, canvas_width).clamp(1, (canvas_width - x).max(1));
        let height = scale(self.height, canvas_height).clamp(1, (canvas_height - y).max(1));
        ZoneRect {
            x,
            y,
            width,
            height,
        }
    }
}

/// Sanitizes each zone and drops the ones left without area. Order is kept.
pub fn sanitize_zones(zones: &[FrameZone]) -> Vec<FrameZone> {
    zones
        .iter()
        .map(FrameZone::sanitized)
        .filter(FrameZone::has_area)
        .collect()
}
