/// Focus-crop: cut a region out of a screenshot and upscale it so the model
/// can examine small elements at higher resolution.
use image::DynamicImage;

use crate::errors::{LocatorError, LocatorResult};
use crate::perception::types::BoundingBox;

/// A cropped and upscaled sub-image together with the mapping back to the source.
pub struct FocusCrop {
    pub image: DynamicImage,
    /// The pixel offset of the crop's top-left corner in the original image.
    pub origin_x: i32,
    pub origin_y: i32,
    /// Size of the crop in the original image (before upscaling).
    pub crop_w: u32,
    pub crop_h: u32,
    /// Effective per-axis upscale (`upscaled / crop`).
    pub factor_x: f64,
    pub factor_y: f64,
}

/// Crop `region` (clamped to the image) and upscale it by `factor` (values below 1 are treated as 1).
pub fn crop_region(src: &DynamicImage, region: &BoundingBox, factor: f64) -> LocatorResult<FocusCrop> {
    let clamped = region
        .clamp_to(src.width(), src.height())
        .ok_or_else(|| LocatorError::Perception(format!("crop region {region} outside image")))?;
    let (cx, cy, cw, ch) = (clamped.x as u32, clamped.y as u32, clamped.width, clamped.height);

    let cropped = src.crop_imm(cx, cy, cw, ch);

    let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
    let out_w = ((cw as f64 * factor).round() as u32).max(1);
    let out_h = ((ch as f64 * factor).round() as u32).max(1);

    let image = if out_w != cw || out_h != ch {
        cropped.resize_exact(out_w, out_h, image::imageops::FilterType::Lanczos3)
    } else {
        cropped
    };

    Ok(FocusCrop {
        image,
        origin_x: clamped.x,
        origin_y: clamped.y,
        crop_w: cw,
        crop_h: ch,
        factor_x: out_w as f64 / cw as f64,
        factor_y: out_h as f64 / ch as f64,
    })
}

impl FocusCrop {
    /// Map a box from sub-image space back to the full screenshot:
    /// divide by the upscale factor, then translate by the crop origin.
    pub fn to_full(&self, b: &BoundingBox) -> BoundingBox {
        rescale_to_full(b, self.factor_x, self.factor_y, self.origin_x, self.origin_y)
    }

    /// Map a box from the full screenshot into sub-image space.
    pub fn to_sub(&self, b: &BoundingBox) -> BoundingBox {
        upscale_to_sub(b, self.factor_x, self.factor_y, self.origin_x, self.origin_y)
    }
}

pub fn rescale_to_full(b: &BoundingBox, fx: f64, fy: f64, ox: i32, oy: i32) -> BoundingBox {
    BoundingBox::from_corners(
        (b.x as f64 / fx).round() as i64 + ox as i64,
        (b.y as f64 / fy).round() as i64 + oy as i64,
        (b.right() as f64 / fx).round() as i64 + ox as i64,
        (b.bottom() as f64 / fy).round() as i64 + oy as i64,
    )
}

pub fn upscale_to_sub(b: &BoundingBox, fx: f64, fy: f64, ox: i32, oy: i32) -> BoundingBox {
    BoundingBox::from_corners(
        ((b.x as i64 - ox as i64) as f64 * fx).round() as i64,
        ((b.y as i64 - oy as i64) as f64 * fy).round() as i64,
        ((b.right() - ox as i64) as f64 * fx).round() as i64,
        ((b.bottom() - oy as i64) as f64 * fy).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_dimensions_and_factor() {
        let img = DynamicImage::new_rgb8(400, 300);
        let crop = crop_region(&img, &BoundingBox::new(100, 50, 80, 60), 2.5).unwrap();
        assert_eq!((crop.image.width(), crop.image.height()), (200, 150));
        assert_eq!((crop.origin_x, crop.origin_y), (100, 50));
        assert_eq!(crop.factor_x, 2.5);
    }

    #[test]
    fn test_crop_clamps_to_image() {
        let img = DynamicImage::new_rgb8(100, 100);
        let crop = crop_region(&img, &BoundingBox::new(80, -10, 50, 50), 1.0).unwrap();
        assert_eq!((crop.crop_w, crop.crop_h), (20, 40));
        assert_eq!((crop.origin_x, crop.origin_y), (80, 0));
    }

    #[test]
    fn test_crop_outside_image_fails() {
        let img = DynamicImage::new_rgb8(100, 100);
        assert!(crop_region(&img, &BoundingBox::new(200, 200, 10, 10), 2.0).is_err());
    }

    #[test]
    fn test_rescale_round_trip_within_one_pixel() {
        let boxes = [
            BoundingBox::new(0, 0, 1, 1),
            BoundingBox::new(13, 7, 50, 21),
            BoundingBox::new(377, 211, 3, 90),
        ];
        for s in [1.1, 1.5, 2.0, 2.37, 3.0, 4.0] {
            for b in &boxes {
                let up = upscale_to_sub(b, s, s, 0, 0);
                let back = rescale_to_full(&up, s, s, 0, 0);
                assert!((back.x - b.x).abs() <= 1);
                assert!((back.y - b.y).abs() <= 1);
                assert!((back.width as i64 - b.width as i64).abs() <= 1);
                assert!((back.height as i64 - b.height as i64).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_to_full_translates_by_origin() {
        let img = DynamicImage::new_rgb8(400, 300);
        let crop = crop_region(&img, &BoundingBox::new(100, 50, 100, 100), 2.0).unwrap();
        let full = crop.to_full(&BoundingBox::new(20, 40, 60, 30));
        assert_eq!(full, BoundingBox::new(110, 70, 30, 15));
        assert_eq!(crop.to_sub(&full), BoundingBox::new(20, 40, 60, 30));
    }
}
