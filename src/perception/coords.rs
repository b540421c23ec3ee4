/// Physical ↔ logical coordinate conversion.
///
/// Screen capture returns physical pixels; pointer positioning consumes
/// logical (DPI-scaled) coordinates. `physical = logical × scale` per axis.
use crate::perception::types::{BoundingBox, ScreenshotMeta};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateMapper {
    /// Non-positive or non-finite factors are treated as 1.0.
    pub fn new(scale_x: f64, scale_y: f64) -> Self {
        let sane = |s: f64| if s.is_finite() && s > 0.0 { s } else { 1.0 };
        Self {
            scale_x: sane(scale_x),
            scale_y: sane(scale_y),
        }
    }

    pub fn from_meta(meta: &ScreenshotMeta) -> Self {
        Self::new(meta.scale_x, meta.scale_y)
    }

    pub fn identity() -> Self {
        Self::new(1.0, 1.0)
    }

    pub fn to_logical(&self, x: i32, y: i32) -> (i32, i32) {
        (
            (x as f64 / self.scale_x).round() as i32,
            (y as f64 / self.scale_y).round() as i32,
        )
    }

    pub fn to_physical(&self, x: i32, y: i32) -> (i32, i32) {
        (
            (x as f64 * self.scale_x).round() as i32,
            (y as f64 * self.scale_y).round() as i32,
        )
    }

    pub fn box_to_logical(&self, b: &BoundingBox) -> BoundingBox {
        let (x1, y1) = self.to_logical(b.x, b.y);
        let x2 = (b.right() as f64 / self.scale_x).round() as i64;
        let y2 = (b.bottom() as f64 / self.scale_y).round() as i64;
        BoundingBox::from_corners(x1 as i64, y1 as i64, x2, y2)
    }

    pub fn box_to_physical(&self, b: &BoundingBox) -> BoundingBox {
        let (x1, y1) = self.to_physical(b.x, b.y);
        let x2 = (b.right() as f64 * self.scale_x).round() as i64;
        let y2 = (b.bottom() as f64 * self.scale_y).round() as i64;
        BoundingBox::from_corners(x1 as i64, y1 as i64, x2, y2)
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALES: [f64; 6] = [1.0, 1.25, 1.5, 1.75, 2.0, 3.0];

    #[test]
    fn test_round_trip_within_rounding() {
        for &sx in &SCALES {
            for &sy in &SCALES {
                let m = CoordinateMapper::new(sx, sy);
                for &(x, y) in &[(0, 0), (1, 1), (17, 333), (1919, 1079), (-40, 12)] {
                    let (lx, ly) = m.to_logical(x, y);
                    let (px, py) = m.to_physical(lx, ly);
                    // Half a logical pixel, expressed in physical units.
                    assert!((px - x).abs() as f64 <= (sx / 2.0).ceil(), "sx={sx} x={x} px={px}");
                    assert!((py - y).abs() as f64 <= (sy / 2.0).ceil(), "sy={sy} y={y} py={py}");
                }
            }
        }
    }

    #[test]
    fn test_logical_to_physical_to_logical_exact() {
        for &s in &SCALES {
            let m = CoordinateMapper::new(s, s);
            for &(x, y) in &[(0, 0), (10, 10), (800, 600), (1279, 719)] {
                let (px, py) = m.to_physical(x, y);
                assert_eq!(m.to_logical(px, py), (x, y));
            }
        }
    }

    #[test]
    fn test_box_conversion() {
        let m = CoordinateMapper::new(2.0, 2.0);
        let logical = m.box_to_logical(&BoundingBox::new(100, 50, 40, 20));
        assert_eq!(logical, BoundingBox::new(50, 25, 20, 10));
        assert_eq!(m.box_to_physical(&logical), BoundingBox::new(100, 50, 40, 20));
    }

    #[test]
    fn test_invalid_scale_falls_back_to_identity() {
        let m = CoordinateMapper::new(0.0, f64::NAN);
        assert_eq!(m, CoordinateMapper::identity());
    }
}
