//! Crop preparation for the embedding model.
//!
//! Detected boxes are padded generously (hair and chin carry identity
//! signal), then the luminance histogram is equalized with chroma
//! preserved to reduce lighting-variance false negatives.

use image::{Rgb, RgbImage};

use crate::types::FaceRegion;

/// Horizontal padding around a detected box, as a fraction of box width.
const CROP_PAD_X: f32 = 0.4;
/// Vertical padding around a detected box, as a fraction of box height.
const CROP_PAD_Y: f32 = 0.6;

/// Crop a detected face with padding, clamped to the image bounds.
pub fn padded_crop(image: &RgbImage, region: &FaceRegion) -> RgbImage {
    let pad_x = region.width * CROP_PAD_X;
    let pad_y = region.height * CROP_PAD_Y;

    let x1 = (region.x - pad_x).max(0.0) as u32;
    let y1 = (region.y - pad_y).max(0.0) as u32;
    let x2 = (region.x + region.width + pad_x).min(image.width() as f32) as u32;
    let y2 = (region.y + region.height + pad_y).min(image.height() as f32) as u32;

    image::imageops::crop_imm(
        image,
        x1,
        y1,
        x2.saturating_sub(x1),
        y2.saturating_sub(y1),
    )
    .to_image()
}

/// Equalize the luminance histogram, recombining with the original chroma.
///
/// Each pixel is scaled by `equalized_luma / luma`, so hue ratios survive
/// the contrast stretch. A single-level (flat) histogram maps to itself.
pub fn equalize_luminance(image: &RgbImage) -> RgbImage {
    let total = u64::from(image.width()) * u64::from(image.height());
    if total == 0 {
        return image.clone();
    }

    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (bin, count) in histogram.iter().enumerate() {
        running += count;
        cdf[bin] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let denom = total - cdf_min;
    if denom == 0 {
        return image.clone();
    }

    let mut mapped = [0u8; 256];
    for bin in 0..256 {
        let num = cdf[bin].saturating_sub(cdf_min) as f32;
        mapped[bin] = (num / denom as f32 * 255.0).round() as u8;
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let y = luma(pixel);
        if y == 0 {
            continue;
        }
        let gain = f32::from(mapped[y as usize]) / f32::from(y);
        for channel in 0..3 {
            pixel[channel] = (f32::from(pixel[channel]) * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// BT.601 luminance of one pixel.
fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b))
        .round()
        .min(255.0) as u8
}
