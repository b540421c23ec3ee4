/// Image preparation for model calls: size ceilings and PNG/base64 encoding.
use std::borrow::Cow;

use base64::Engine as _;
use image::DynamicImage;

use crate::errors::LocatorResult;

/// Image as sent to the model plus the factor it was shrunk by (`sent = original × ratio`).
pub struct ModelImage<'a> {
    pub image: Cow<'a, DynamicImage>,
    pub ratio: f64,
}

/// Shrink `img` so its longest side and pixel count respect the given ceilings.
/// Images already within limits are borrowed untouched with `ratio == 1.0`.
pub fn downscale_for_model(img: &DynamicImage, max_side: u32, max_pixels: u64) -> ModelImage<'_> {
    let (w, h) = (img.width(), img.height());
    let ratio = downscale_ratio(w, h, max_side, max_pixels);
    if ratio >= 1.0 {
        return ModelImage {
            image: Cow::Borrowed(img),
            ratio: 1.0,
        };
    }
    let nw = ((w as f64 * ratio).round() as u32).max(1);
    let nh = ((h as f64 * ratio).round() as u32).max(1);
    tracing::debug!(from = %format!("{w}×{h}"), to = %format!("{nw}×{nh}"), "downscaling for model");
    ModelImage {
        image: Cow::Owned(img.resize_exact(nw, nh, image::imageops::FilterType::Triangle)),
        ratio,
    }
}

pub fn downscale_ratio(width: u32, height: u32, max_side: u32, max_pixels: u64) -> f64 {
    let longest = width.max(height) as f64;
    let pixels = width as f64 * height as f64;
    let mut ratio: f64 = 1.0;
    if max_side > 0 && longest > max_side as f64 {
        ratio = ratio.min(max_side as f64 / longest);
    }
    if max_pixels > 0 && pixels > max_pixels as f64 {
        ratio = ratio.min((max_pixels as f64 / pixels).sqrt());
    }
    ratio
}

pub fn encode_png(img: &DynamicImage) -> LocatorResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)?;
    Ok(png_bytes)
}

pub fn encode_png_base64(img: &DynamicImage) -> LocatorResult<String> {
    let png = encode_png(img)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&png))
}
