//! Feature Extractor (§4.4): preprocessing pipeline plus both descriptor
//! families.
//!
//! Preprocessing is fixed: downscale to an 800px longer side, grayscale,
//! CLAHE (clip limit 2.0, 8x8 tiles), then a 3x3 Gaussian blur. Either
//! descriptor family may legitimately come back empty (low-texture image);
//! only a decode failure is fatal here.

use super::binary::{self};
use super::scale_invariant;
use super::{BinarySet, ScaleInvariantSet};
use crate::core::imgio::FastResizer;
use crate::error::ExtractError;
use image::{DynamicImage, GrayImage};
use imageproc::filter::gaussian_blur_f32;

/// Longer-side cap applied before feature detection (§4.4).
pub const PREPROCESS_MAX_SIDE: u32 = 800;
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_TILE_SIZE: u32 = 8;
const GAUSSIAN_SIGMA: f32 = 3.0 / 6.0; // a 3x3 kernel's effective sigma

/// Both descriptor families extracted from one image (§3 "Feature Set").
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub sift: ScaleInvariantSet,
    pub orb: BinarySet,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.sift.count() == 0 && self.orb.count() == 0
    }
}

/// Run the full preprocessing pipeline and extract both families, capped at
/// `max_sift`/`max_orb` keypoints respectively.
pub fn extract(
    image: &DynamicImage,
    resizer: &mut FastResizer,
    max_sift: usize,
    max_orb: usize,
) -> Result<FeatureSet, ExtractError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ExtractError::Decode {
            reason: "input image has zero area".to_string(),
        });
    }

    let capped = resizer.cap_longer_side(image, PREPROCESS_MAX_SIDE)?;
    let gray = capped.to_luma8();
    let equalized = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILE_SIZE);
    let blurred = gaussian_blur_f32(&equalized, GAUSSIAN_SIGMA);

    let sift = scale_invariant::detect(&blurred, max_sift);
    let orb = binary::detect(&blurred, max_orb);

    if sift.count() == 0 && orb.count() == 0 {
        return Ok(FeatureSet { sift, orb });
    }

    Ok(FeatureSet { sift, orb })
}

/// Contrast-Limited Adaptive Histogram Equalization over `tile_size x
/// tile_size` tiles, with bilinear interpolation between tile centers to
/// avoid blocking artifacts — the standard CLAHE formulation.
fn clahe(gray: &GrayImage, clip_limit: f32, tile_size: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let tiles_x = width.div_ceil(tile_size).max(1);
    let tiles_y = height.div_ceil(tile_size).max(1);

    // Per-tile cumulative distribution function, used as a 256-entry LUT.
    let mut tile_luts = vec![vec![0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_size;
            let y0 = ty * tile_size;
            let x1 = (x0 + tile_size).min(width);
            let y1 = (y0 + tile_size).min(height);

            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            let pixel_count = ((x1 - x0) * (y1 - y0)).max(1);
            let clip_height = ((clip_limit * pixel_count as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in histogram.iter_mut() {
                if *bin > clip_height {
                    excess += *bin - clip_height;
                    *bin = clip_height;
                }
            }
            let redistribute = excess / 256;
            for bin in histogram.iter_mut() {
                *bin += redistribute;
            }

            let mut cdf = [0u32; 256];
            let mut running = 0u32;
            for (i, &count) in histogram.iter().enumerate() {
                running += count;
                cdf[i] = running;
            }
            let total = running.max(1) as f32;
            let lut = &mut tile_luts[(ty * tiles_x + tx) as usize];
            for (i, slot) in lut.iter_mut().enumerate() {
                *slot = ((cdf[i] as f32 / total) * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let tile_center = |tx: u32, ty: u32| -> (f32, f32) {
        (
            tx as f32 * tile_size as f32 + tile_size as f32 / 2.0,
            ty as f32 * tile_size as f32 + tile_size as f32 / 2.0,
        )
    };

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let value = gray.get_pixel(x, y).0[0];
            let tx = ((x / tile_size).min(tiles_x - 1)) as i64;
            let ty = ((y / tile_size).min(tiles_y - 1)) as i64;

            let (cx, cy) = tile_center(tx as u32, ty as u32);
            let left = if (x as f32) < cx { tx - 1 } else { tx };
            let top = if (y as f32) < cy { ty - 1 } else { ty };
            let right = (left + 1).clamp(0, tiles_x as i64 - 1);
            let bottom = (top + 1).clamp(0, tiles_y as i64 - 1);
            let left = left.clamp(0, tiles_x as i64 - 1);
            let top = top.clamp(0, tiles_y as i64 - 1);

            let (lcx, _) = tile_center(left as u32, 0);
            let (rcx, _) = tile_center(right as u32, 0);
            let (_, tcy) = tile_center(0, top as u32);
            let (_, bcy) = tile_center(0, bottom as u32);

            let fx = if rcx > lcx { ((x as f32 - lcx) / (rcx - lcx)).clamp(0.0, 1.0) } else { 0.0 };
            let fy = if bcy > tcy { ((y as f32 - tcy) / (bcy - tcy)).clamp(0.0, 1.0) } else { 0.0 };

            let sample = |tx: i64, ty: i64| -> f32 {
                tile_luts[(ty as u32 * tiles_x + tx as u32) as usize][value as usize] as f32
            };
            let top_val = sample(left, top) * (1.0 - fx) + sample(right, top) * fx;
            let bottom_val = sample(left, bottom) * (1.0 - fx) + sample(right, bottom) * fx;
            let interpolated = (top_val * (1.0 - fy) + bottom_val * fy).round().clamp(0.0, 255.0) as u8;

            out.put_pixel(x, y, image::Luma([interpolated]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    #[test]
    fn clahe_preserves_dimensions() {
        let gray = ImageBuffer::from_fn(64, 64, |x, y| Luma([((x + y) % 256) as u8]));
        let out = clahe(&gray, 2.0, 8);
        assert_eq!(out.dimensions(), gray.dimensions());
    }

    #[test]
    fn solid_color_extraction_yields_empty_feature_set() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 64, Rgb([128u8, 128, 128])));
        let mut resizer = FastResizer::new();
        let features = extract(&image, &mut resizer, 1000, 1000).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn zero_area_image_is_rejected() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::new(0, 0));
        let mut resizer = FastResizer::new();
        assert!(extract(&image, &mut resizer, 100, 100).is_err());
    }

    #[test]
    fn textured_image_downscaled_before_extraction() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(1600, 1200, |x, y| {
            let v = if (x / 10 + y / 10) % 2 == 0 { 230 } else { 20 };
            Rgb([v, v, v])
        }));
        let mut resizer = FastResizer::new();
        let features = extract(&image, &mut resizer, 500, 500).unwrap();
        assert!(!features.is_empty());
    }
}
