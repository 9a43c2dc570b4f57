//! Coordinate spaces and point/segment math.
//!
//! Annotations are stored in normalized page-fraction space and only turned
//! into pixels against an explicit [`RasterSize`].

use serde::{Deserialize, Serialize};

/// Position as a fraction of the page's width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_pixels(self, size: RasterSize) -> PixelPoint {
        PixelPoint { x: self.x * size.width, y: self.y * size.height }
    }
}

/// Position in the pixel space of some raster (live canvas or export surface).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Converts to page fractions, clamped to the unit square.
    pub fn normalize(self, size: RasterSize) -> NormalizedPoint {
        NormalizedPoint {
            x: ratio(self.x, size.width).clamp(0.0, 1.0),
            y: ratio(self.y, size.height).clamp(0.0, 1.0),
        }
    }

    pub fn distance_to(self, other: PixelPoint) -> f64 {
        distance_squared(self, other).sqrt()
    }
}

/// Pixel dimensions a normalized coordinate is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSize {
    pub width: f64,
    pub height: f64,
}

impl RasterSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

fn ratio(value: f64, extent: f64) -> f64 {
    if extent > 0.0 {
        value / extent
    } else {
        0.0
    }
}

fn distance_squared(a: PixelPoint, b: PixelPoint) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance from `p` to the segment `[v, w]`.
///
/// A zero-length segment degrades to the distance between `p` and `v`.
pub fn distance_point_to_segment(p: PixelPoint, v: PixelPoint, w: PixelPoint) -> f64 {
    let length_sq = distance_squared(v, w);
    if length_sq == 0.0 {
        return p.distance_to(v);
    }

    let t = ((p.x - v.x) * (w.x - v.x) + (p.y - v.y) * (w.y - v.y)) / length_sq;
    let t = t.clamp(0.0, 1.0);
    let closest = PixelPoint { x: v.x + t * (w.x - v.x), y: v.y + t * (w.y - v.y) };

    p.distance_to(closest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_on_segment_has_zero_distance() {
        let d = distance_point_to_segment(
            PixelPoint::new(5.0, 5.0),
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(10.0, 10.0),
        );
        assert_eq!(d, 0.0);
    }

    #[test]
    fn degenerate_segment_uses_point_distance() {
        let v = PixelPoint::new(1.0, 1.0);
        let d = distance_point_to_segment(PixelPoint::new(4.0, 5.0), v, v);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn projection_is_clamped_to_segment_ends() {
        let v = PixelPoint::new(0.0, 0.0);
        let w = PixelPoint::new(10.0, 0.0);

        let past_end = distance_point_to_segment(PixelPoint::new(13.0, 4.0), v, w);
        assert!((past_end - 5.0).abs() < 1e-12);

        let before_start = distance_point_to_segment(PixelPoint::new(-3.0, 0.0), v, w);
        assert!((before_start - 3.0).abs() < 1e-12);

        let beside = distance_point_to_segment(PixelPoint::new(4.0, 2.0), v, w);
        assert!((beside - 2.0).abs() < 1e-12);
    }

    #[test]
    fn normalize_clamps_to_unit_square() {
        let size = RasterSize::new(200.0, 100.0);
        assert_eq!(PixelPoint::new(50.0, 25.0).normalize(size), NormalizedPoint::new(0.25, 0.25));
        assert_eq!(PixelPoint::new(-4.0, 130.0).normalize(size), NormalizedPoint::new(0.0, 1.0));
    }

    #[test]
    fn zero_sized_raster_normalizes_to_origin() {
        let size = RasterSize::new(0.0, 0.0);
        assert_eq!(PixelPoint::new(3.0, 3.0).normalize(size), NormalizedPoint::new(0.0, 0.0));
    }
}
