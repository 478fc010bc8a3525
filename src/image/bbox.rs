//! Region bounding boxes.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in page-raster pixels, given as two corners.
///
/// Corners may arrive in either order; [`BBox::normalized`] orders them so
/// geometrically identical requests share one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// First corner x.
    pub x0: f32,
    /// First corner y.
    pub y0: f32,
    /// Second corner x.
    pub x1: f32,
    /// Second corner y.
    pub y1: f32,
}

impl BBox {
    /// Box from two corners.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Same box with `(x0, y0)` as the top-left corner.
    pub fn normalized(&self) -> Self {
        Self {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        }
    }

    /// Width of the normalized box.
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).abs()
    }

    /// Height of the normalized box.
    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).abs()
    }

    /// Integer crop rectangle `(x, y, width, height)` clamped to an image
    /// of the given size. Width and height are at least 1.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let b = self.normalized();
        let clamp = |v: f32, max: u32| (v.round().max(0.0) as u32).min(max);

        let x0 = clamp(b.x0, image_width.saturating_sub(1));
        let y0 = clamp(b.y0, image_height.saturating_sub(1));
        let x1 = clamp(b.x1, image_width).max(x0 + 1);
        let y1 = clamp(b.y1, image_height).max(y0 + 1);
        (x0, y0, x1 - x0, y1 - y0)
    }

    /// Hashable key of the normalized corners.
    ///
    /// `-0.0` and `0.0` map to the same key.
    pub(crate) fn key(&self) -> [u32; 4] {
        let b = self.normalized();
        let bits = |v: f32| (v + 0.0).to_bits();
        [bits(b.x0), bits(b.y0), bits(b.x1), bits(b.y1)]
    }
}

impl From<(f32, f32, f32, f32)> for BBox {
    fn from((x0, y0, x1, y1): (f32, f32, f32, f32)) -> Self {
        Self::new(x0, y0, x1, y1)
    }
}
