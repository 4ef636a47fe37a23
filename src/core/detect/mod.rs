//! Comic-Area Detector (§4.3).
//!
//! Locates the dominant rectangular comic region in a photograph and crops
//! to it. Two Canny passes at distinct threshold pairs are unioned, closed
//! and dilated with a square kernel, and the resulting edge map's external
//! contours are scored; the best-scoring contour above a confidence floor
//! wins. Deterministic, never enlarges the input, and falls back to the
//! original image on rejection.

use crate::error::DetectError;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, erode};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;

/// First Canny pass, run on the CLAHE-enhanced image (original_source
/// `OptimizedComicMatcher.py`).
const CANNY_LOW_A: f32 = 50.0;
const CANNY_HIGH_A: f32 = 150.0;
/// Second Canny pass, run on a Gaussian-blurred copy of the same
/// CLAHE-enhanced image.
const CANNY_LOW_B: f32 = 30.0;
const CANNY_HIGH_B: f32 = 90.0;

/// `cv2.createCLAHE(clipLimit=2.0, tileGridSize=(8, 8))` (original_source
/// `OptimizedComicMatcher.py:174-175`).
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_TILES_X: u32 = 8;
const CLAHE_TILES_Y: u32 = 8;

const MORPH_KERNEL_RADIUS: u8 = 3;
const PAD_PIXELS: i64 = 15;

const MIN_FRAME_FRACTION: f64 = 0.05;
const MAX_FRAME_FRACTION: f64 = 0.95;
const MIN_ASPECT: f64 = 0.6;
const MAX_ASPECT: f64 = 3.5;
const MIN_FILL_RATIO: f64 = 0.4;
const MIN_SCORE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

/// Detect and crop the dominant comic region. Returns the (possibly
/// unchanged) image and whether a crop was applied.
pub fn detect_and_crop(image: &DynamicImage) -> Result<(DynamicImage, bool), DetectError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectError::EmptyImage);
    }

    let gray = image.to_luma8();
    let enhanced = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES_X, CLAHE_TILES_Y);
    let edges_a = canny(&enhanced, CANNY_LOW_A, CANNY_HIGH_A);
    let blurred = gaussian_blur_f32(&enhanced, 1.5);
    let edges_b = canny(&blurred, CANNY_LOW_B, CANNY_HIGH_B);
    let union = union_edges(&edges_a, &edges_b);

    let closed = erode(
        &dilate(&union, Norm::LInf, MORPH_KERNEL_RADIUS),
        Norm::LInf,
        MORPH_KERNEL_RADIUS,
    );
    let dilated = dilate(&closed, Norm::LInf, MORPH_KERNEL_RADIUS);

    let frame_area = (width as f64) * (height as f64);
    let best = find_contours::<i32>(&dilated)
        .into_iter()
        .filter_map(|contour| score_contour(&contour.points, frame_area))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some((rect, score)) = best else {
        return Ok((image.clone(), false));
    };
    if score <= MIN_SCORE {
        return Ok((image.clone(), false));
    }

    let padded = pad_and_clip(rect, width, height);
    let cropped = image.crop_imm(
        padded.x as u32,
        padded.y as u32,
        padded.w as u32,
        padded.h as u32,
    );
    Ok((cropped, true))
}

fn union_edges(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (w, h) = a.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let av = a.get_pixel(x, y).0[0];
        let bv = if x < b.width() && y < b.height() { b.get_pixel(x, y).0[0] } else { 0 };
        image::Luma([av.max(bv)])
    })
}

/// Score a contour per §4.3's formula, returning `None` if it's filtered
/// out by the area/aspect/fill-ratio gates.
fn score_contour(points: &[imageproc::point::Point<i32>], frame_area: f64) -> Option<(Rect, f64)> {
    if points.len() < 3 {
        return None;
    }
    let (min_x, max_x) = points.iter().map(|p| p.x).fold((i32::MAX, i32::MIN), |(mn, mx), x| {
        (mn.min(x), mx.max(x))
    });
    let (min_y, max_y) = points.iter().map(|p| p.y).fold((i32::MAX, i32::MIN), |(mn, mx), y| {
        (mn.min(y), mx.max(y))
    });
    let rect = Rect {
        x: min_x as i64,
        y: min_y as i64,
        w: (max_x - min_x + 1) as i64,
        h: (max_y - min_y + 1) as i64,
    };
    if rect.w <= 0 || rect.h <= 0 {
        return None;
    }

    let rect_area = (rect.w * rect.h) as f64;
    let area_fraction = rect_area / frame_area;
    if !(MIN_FRAME_FRACTION..=MAX_FRAME_FRACTION).contains(&area_fraction) {
        return None;
    }

    // Vertical aspect ratio, per the spec's convention (height / width).
    let aspect_ratio = rect.h as f64 / rect.w as f64;
    if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect_ratio) {
        return None;
    }

    let contour_area = shoelace_area(points);
    let fill_ratio = contour_area / rect_area;
    if fill_ratio <= MIN_FILL_RATIO {
        return None;
    }

    let score = area_fraction * fill_ratio * (aspect_ratio / 1.4).min(1.0);
    Some((rect, score))
}

fn shoelace_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    let n = points.len();
    let mut sum = 0i64;
    for i in 0..n {
        let p0 = points[i];
        let p1 = points[(i + 1) % n];
        sum += p0.x as i64 * p1.y as i64 - p1.x as i64 * p0.y as i64;
    }
    (sum.unsigned_abs() as f64) / 2.0
}

fn pad_and_clip(rect: Rect, width: u32, height: u32) -> Rect {
    let x0 = (rect.x - PAD_PIXELS).max(0);
    let y0 = (rect.y - PAD_PIXELS).max(0);
    let x1 = (rect.x + rect.w + PAD_PIXELS).min(width as i64);
    let y1 = (rect.y + rect.h + PAD_PIXELS).min(height as i64);
    Rect {
        x: x0,
        y: y0,
        w: (x1 - x0).max(1),
        h: (y1 - y0).max(1),
    }
}

/// Contrast-Limited Adaptive Histogram Equalization: the image is divided
/// into `tiles_x * tiles_y` tiles, each tile's histogram is clipped and
/// redistributed before building its own equalization mapping, and a
/// pixel's output value is bilinearly interpolated between its four
/// nearest tile mappings to avoid blocking artifacts at tile boundaries.
fn clahe(gray: &GrayImage, clip_limit: f32, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(tiles_x).max(1);
    let tile_h = height.div_ceil(tiles_y).max(1);
    let mut mappings = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            mappings[(ty * tiles_x + tx) as usize] = tile_mapping(gray, x0, y0, x1, y1, clip_limit);
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y).0[0];
        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wx = (fx - tx0 as f32).clamp(0.0, 1.0);
        let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

        let m00 = mappings[(ty0 * tiles_x + tx0) as usize][value as usize] as f32;
        let m10 = mappings[(ty0 * tiles_x + tx1) as usize][value as usize] as f32;
        let m01 = mappings[(ty1 * tiles_x + tx0) as usize][value as usize] as f32;
        let m11 = mappings[(ty1 * tiles_x + tx1) as usize][value as usize] as f32;
        let top = m00 * (1.0 - wx) + m10 * wx;
        let bottom = m01 * (1.0 - wx) + m11 * wx;
        let out = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
        Luma([out])
    })
}

/// Build one tile's equalization mapping: clip its histogram at
/// `clip_limit * mean_bin_count`, redistribute the clipped mass evenly
/// across all 256 bins, then take the cumulative distribution as the
/// 0..=255 output mapping.
fn tile_mapping(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    let mut count = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
            count += 1;
        }
    }
    if count == 0 {
        return std::array::from_fn(|i| i as u8);
    }

    let clip = ((clip_limit.max(1.0)) * (count as f32 / 256.0)).round() as u32;
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redistribution = excess / 256;
    let remainder = excess % 256;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += redistribution + u32::from((i as u32) < remainder);
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, bin) in histogram.iter().enumerate() {
        running += bin;
        cdf[i] = running;
    }
    let total = cdf[255].max(1) as f32;
    std::array::from_fn(|i| ((cdf[i] as f32 / total) * 255.0).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn clahe_preserves_dimensions() {
        let gray = GrayImage::from_fn(64, 48, |x, y| Luma([((x + y) % 256) as u8]));
        let enhanced = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES_X, CLAHE_TILES_Y);
        assert_eq!(enhanced.dimensions(), gray.dimensions());
    }

    #[test]
    fn clahe_expands_a_narrow_intensity_band() {
        // Every pixel falls in [100, 110]: low global contrast that CLAHE
        // should spread toward the full 0..=255 range.
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 11) as u8]));
        let enhanced = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES_X, CLAHE_TILES_Y);
        let spread = |img: &GrayImage| {
            let (mut lo, mut hi) = (255u8, 0u8);
            for p in img.pixels() {
                lo = lo.min(p.0[0]);
                hi = hi.max(p.0[0]);
            }
            hi - lo
        };
        assert!(spread(&enhanced) > spread(&gray));
    }

    #[test]
    fn solid_color_image_is_not_cropped() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(400, 600, Rgb([128u8, 128, 128])));
        let (_, was_cropped) = detect_and_crop(&image).unwrap();
        assert!(!was_cropped);
    }

    #[test]
    fn zero_area_image_is_rejected() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::new(0, 0));
        assert!(detect_and_crop(&image).is_err());
    }

    #[test]
    fn never_enlarges_the_image() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(400, 600, |x, y| {
            let on_border = x < 40 || y < 40 || x > 360 || y > 560;
            if on_border {
                Rgb([20u8, 20, 20])
            } else {
                Rgb([220u8, 220, 220])
            }
        }));
        let (cropped, _) = detect_and_crop(&image).unwrap();
        assert!(cropped.width() <= image.width());
        assert!(cropped.height() <= image.height());
    }

    #[test]
    fn aspect_window_boundary_matches_spec() {
        // 0.59 is rejected, 0.61 is considered (§8 boundary behavior).
        let rect_rejected = Rect { x: 0, y: 0, w: 100, h: 59 };
        let rect_considered = Rect { x: 0, y: 0, w: 100, h: 61 };
        let aspect_rejected = rect_rejected.h as f64 / rect_rejected.w as f64;
        let aspect_considered = rect_considered.h as f64 / rect_considered.w as f64;
        assert!(!(MIN_ASPECT..=MAX_ASPECT).contains(&aspect_rejected));
        assert!((MIN_ASPECT..=MAX_ASPECT).contains(&aspect_considered));
    }
}
