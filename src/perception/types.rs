use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Integer rectangle in physical pixel space unless stated otherwise.
///
/// Width and height are unsigned, so a box can be empty but never inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates; inverted corners collapse to an empty box.
    pub fn from_corners(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self {
            x: x1 as i32,
            y: y1 as i32,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Overlapping region, or `None` when the boxes do not share any area.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x1 = (self.x as i64).max(other.x as i64);
        let y1 = (self.y as i64).max(other.y as i64);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        let b = BoundingBox::from_corners(x1, y1, x2, y2);
        (!b.is_empty()).then_some(b)
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::from_corners(
            (self.x as i64).min(other.x as i64),
            (self.y as i64).min(other.y as i64),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Intersection over union, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection(other).map(|b| b.area()).unwrap_or(0);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    /// Clip to an image of the given size; `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        self.intersection(&BoundingBox::new(0, 0, width, height))
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub monitor_index: u32,
    /// Per-axis display transform (physical = logical × scale).
    pub scale_x: f64,
    pub scale_y: f64,
    pub physical_width: u32,
    pub physical_height: u32,
    pub logical_width: u32,
    pub logical_height: u32,
}

impl ScreenshotMeta {
    pub fn for_image(width: u32, height: u32, scale_factor: f64) -> Self {
        let scale = if scale_factor > 0.0 { scale_factor } else { 1.0 };
        Self {
            monitor_index: 0,
            scale_x: scale,
            scale_y: scale,
            physical_width: width,
            physical_height: height,
            logical_width: (width as f64 / scale).round() as u32,
            logical_height: (height as f64 / scale).round() as u32,
        }
    }
}

/// A captured frame. Each `locate` call works on its own `Screenshot`.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image: Arc<DynamicImage>,
    pub meta: ScreenshotMeta,
}

impl Screenshot {
    pub fn new(image: DynamicImage, scale_factor: f64) -> Self {
        let meta = ScreenshotMeta::for_image(image.width(), image.height(), scale_factor);
        Self {
            image: Arc::new(image),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identity_and_disjoint() {
        let a = BoundingBox::new(10, 10, 50, 20);
        assert_eq!(a.iou(&a), 1.0);
        let b = BoundingBox::new(100, 100, 5, 5);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_symmetric_and_bounded() {
        let boxes = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(5, 5, 10, 10),
            BoundingBox::new(-3, 2, 40, 4),
            BoundingBox::new(8, 0, 1, 30),
            BoundingBox::new(0, 0, 0, 10),
        ];
        for a in &boxes {
            for b in &boxes {
                let ab = a.iou(b);
                assert_eq!(ab, b.iou(a));
                assert!((0.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn test_iou_partial_overlap_value() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_touching_edges_do_not_intersect() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(10, 0, 10, 10);
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn test_union_encloses_both() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 5, 5, 20);
        assert_eq!(a.union(&b), BoundingBox::new(0, 0, 25, 25));
    }

    #[test]
    fn test_inverted_corners_are_empty() {
        let b = BoundingBox::from_corners(10, 10, 5, 20);
        assert!(b.is_empty());
        assert_eq!(b.width, 0);
    }

    #[test]
    fn test_clamp_to_image() {
        let b = BoundingBox::new(-5, 90, 20, 20);
        assert_eq!(b.clamp_to(100, 100), Some(BoundingBox::new(0, 90, 15, 10)));
        assert_eq!(BoundingBox::new(200, 0, 5, 5).clamp_to(100, 100), None);
    }
}
