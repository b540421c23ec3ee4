/// Region-of-interest refinement for small or precision-sensitive elements.
use image::DynamicImage;

use crate::config::ZoomConfig;
use crate::errors::LocatorResult;
use crate::perception::focus_crop::{crop_region, FocusCrop};
use crate::perception::types::BoundingBox;

#[derive(Debug, Clone, Default)]
pub struct ZoomController {
    config: ZoomConfig,
}

impl ZoomController {
    pub fn new(config: ZoomConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ZoomConfig {
        &self.config
    }

    /// Grow the coarse region so it holds roughly `element_margin` reference widths.
    ///
    /// `ratio = reference_width × element_margin / region_width`; the region is
    /// only grown (symmetrically, keeping its aspect) when `ratio > 1`. Growth is
    /// capped at half the screen per axis, never shrinking below the coarse
    /// region, and the window is shifted to stay inside the image.
    /// Without a reference image the coarse width stands in for it.
    pub fn extend_region(
        &self,
        coarse: &BoundingBox,
        reference: Option<(u32, u32)>,
        whole: (u32, u32),
    ) -> BoundingBox {
        let (img_w, img_h) = whole;
        let region_w = coarse.width.max(1) as f64;
        let ref_w = reference.map(|(w, _)| w).unwrap_or(coarse.width).max(1) as f64;
        let ratio = ref_w * self.config.element_margin / region_w;

        let (mut w, mut h) = (coarse.width as f64, coarse.height as f64);
        if ratio > 1.0 {
            w *= ratio;
            h *= ratio;
        }
        let max_w = (img_w as f64 / 2.0).max(coarse.width as f64);
        let max_h = (img_h as f64 / 2.0).max(coarse.height as f64);
        let w = w.min(max_w).min(img_w as f64).round() as i64;
        let h = h.min(max_h).min(img_h as f64).round() as i64;

        let (cx, cy) = coarse.center();
        let x = (cx - w as f64 / 2.0).round() as i64;
        let y = (cy - h as f64 / 2.0).round() as i64;
        let x = x.clamp(0, (img_w as i64 - w).max(0));
        let y = y.clamp(0, (img_h as i64 - h).max(0));

        let extended = BoundingBox::from_corners(x, y, x + w, y + h);
        let out = extended.clamp_to(img_w, img_h).unwrap_or(extended);
        tracing::debug!(%coarse, %out, ratio, "zoom region extended");
        out
    }

    /// Upscale that fills the screen with the crop, bounded by `max_upscale`, at least 1.
    pub fn upscale_factor(&self, region: &BoundingBox, whole: (u32, u32)) -> f64 {
        if region.is_empty() {
            return 1.0;
        }
        let fx = whole.0 as f64 / region.width as f64;
        let fy = whole.1 as f64 / region.height as f64;
        fx.min(fy).min(self.config.max_upscale).max(1.0)
    }

    /// Crop and upscale `region` out of `image`.
    pub fn zoom(&self, image: &DynamicImage, region: &BoundingBox) -> LocatorResult<FocusCrop> {
        let factor = self.upscale_factor(region, (image.width(), image.height()));
        crop_region(image, region, factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ZoomController {
        ZoomController::new(ZoomConfig::default())
    }

    #[test]
    fn test_tight_region_grows_around_center() {
        // reference 40 wide, margin 4 → 160 / 40 = 4×
        let out = controller().extend_region(&BoundingBox::new(500, 300, 40, 20), Some((40, 20)), (1920, 1080));
        assert_eq!(out, BoundingBox::new(440, 270, 160, 80));
    }

    #[test]
    fn test_wide_region_is_not_grown() {
        let coarse = BoundingBox::new(100, 100, 400, 100);
        let out = controller().extend_region(&coarse, Some((40, 20)), (1920, 1080));
        assert_eq!(out, coarse);
    }

    #[test]
    fn test_growth_capped_at_half_screen() {
        let out = controller().extend_region(&BoundingBox::new(900, 500, 100, 50), Some((300, 100)), (1920, 1080));
        assert_eq!((out.width, out.height), (960, 540));
        assert_eq!((out.x, out.y), (470, 255));
    }

    #[test]
    fn test_region_shifted_inside_image() {
        let out = controller().extend_region(&BoundingBox::new(0, 0, 20, 10), Some((20, 10)), (1000, 800));
        assert_eq!((out.x, out.y), (0, 0));
        assert_eq!((out.width, out.height), (80, 40));
    }

    #[test]
    fn test_upscale_factor_bounds() {
        let c = controller();
        assert_eq!(c.upscale_factor(&BoundingBox::new(0, 0, 960, 540), (1920, 1080)), 2.0);
        assert_eq!(c.upscale_factor(&BoundingBox::new(0, 0, 100, 100), (1920, 1080)), 4.0);
        assert_eq!(c.upscale_factor(&BoundingBox::new(0, 0, 1920, 1080), (1920, 1080)), 1.0);
    }

    #[test]
    fn test_zoom_round_trip() {
        let img = DynamicImage::new_rgb8(800, 600);
        let c = controller();
        let region = BoundingBox::new(200, 150, 200, 150);
        let crop = c.zoom(&img, &region).unwrap();
        assert_eq!((crop.image.width(), crop.image.height()), (800, 600));
        let target = BoundingBox::new(250, 180, 30, 12);
        assert_eq!(crop.to_full(&crop.to_sub(&target)), target);
    }
}
