//! Binary keypoint/descriptor family (§4.4, "binary set").
//!
//! A FAST-style corner detector (Rosten & Drummond) paired with a
//! BRIEF-style binary descriptor sampled over a fixed, deterministically
//! generated pixel-pair pattern — the same spirit as ORB, without pulling
//! in a computer-vision binding. The sampling pattern is generated once
//! from a fixed linear-congruential seed so every run of this process (and
//! every cached descriptor) agrees bit-for-bit.

use super::keypoint::Keypoint;
use super::{BinarySet, ORB_DESCRIPTOR_BYTES};
use image::GrayImage;
use std::sync::OnceLock;

const CIRCLE_RADIUS: i32 = 3;
const FAST_THRESHOLD: i16 = 20;
const CONTIGUOUS_REQUIRED: usize = 9;
const PATCH_RADIUS: i32 = 15;

/// 16-pixel Bresenham circle of radius 3 used by FAST-9.
const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Detect up to `max_features` FAST corners and their 256-bit BRIEF
/// descriptors in a preprocessed (grayscale, CLAHE'd, blurred) image.
pub fn detect(gray: &GrayImage, max_features: usize) -> BinarySet {
    let (width, height) = (gray.width() as i32, gray.height() as i32);
    if width < 2 * PATCH_RADIUS + 2 || height < 2 * PATCH_RADIUS + 2 {
        return BinarySet::empty();
    }

    let mut candidates = Vec::new();
    for y in CIRCLE_RADIUS..height - CIRCLE_RADIUS {
        for x in CIRCLE_RADIUS..width - CIRCLE_RADIUS {
            if x < PATCH_RADIUS || y < PATCH_RADIUS || x >= width - PATCH_RADIUS || y >= height - PATCH_RADIUS {
                continue;
            }
            if let Some(score) = corner_score(gray, x, y) {
                candidates.push((x, y, score));
            }
        }
    }

    candidates.sort_by(|a, b| b.2.cmp(&a.2));
    candidates.truncate(max_features.max(0) * 2);

    let pattern = brief_pattern();
    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for (x, y, score) in candidates {
        descriptors.push(brief_descriptor(gray, x, y, pattern));
        keypoints.push(Keypoint {
            x: x as f32,
            y: y as f32,
            size: (2 * CIRCLE_RADIUS) as f32,
            angle: 0.0,
            response: score as f32,
            octave: 0,
            class_id: -1,
        });
        if keypoints.len() >= max_features {
            break;
        }
    }

    BinarySet {
        keypoints,
        descriptors,
    }
}

/// FAST-9 corner test: the pixel at `(x, y)` is a corner if at least
/// `CONTIGUOUS_REQUIRED` contiguous circle pixels are all brighter, or all
/// darker, than the center by more than `FAST_THRESHOLD`. Returns the
/// strongest contiguous run's total absolute deviation as the response.
fn corner_score(gray: &GrayImage, x: i32, y: i32) -> Option<i32> {
    let center = gray.get_pixel(x as u32, y as u32).0[0] as i16;
    let circle: Vec<i16> = CIRCLE_OFFSETS
        .iter()
        .map(|(dx, dy)| gray.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as i16)
        .collect();

    let signs: Vec<i8> = circle
        .iter()
        .map(|&v| {
            if v - center > FAST_THRESHOLD {
                1
            } else if center - v > FAST_THRESHOLD {
                -1
            } else {
                0
            }
        })
        .collect();

    let doubled: Vec<i8> = signs.iter().chain(signs.iter()).copied().collect();
    let mut best_run = 0usize;
    let mut run = 0usize;
    let mut run_sign = 0i8;
    for &s in &doubled {
        if s != 0 && s == run_sign {
            run += 1;
        } else if s != 0 {
            run = 1;
            run_sign = s;
        } else {
            run = 0;
            run_sign = 0;
        }
        best_run = best_run.max(run);
        if best_run >= 16 {
            break;
        }
    }

    if best_run < CONTIGUOUS_REQUIRED {
        return None;
    }

    let deviation: i32 = circle.iter().map(|&v| (v - center).unsigned_abs() as i32).sum();
    Some(deviation)
}

/// A fixed set of 256 `((dx1,dy1),(dx2,dy2))` pixel-pair offsets within
/// `[-PATCH_RADIUS, PATCH_RADIUS]`, generated once from a constant seed.
fn brief_pattern() -> &'static [((i32, i32), (i32, i32)); 256] {
    static PATTERN: OnceLock<[((i32, i32), (i32, i32)); 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state: u64 = 0x9E3779B97F4A7C15;
        let mut next = || {
            // xorshift64*, deterministic for a fixed seed
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            state.wrapping_mul(0x2545F4914F6CDD1D)
        };
        let span = 2 * PATCH_RADIUS + 1;
        let mut pattern = [((0, 0), (0, 0)); 256];
        for slot in pattern.iter_mut() {
            let a = next();
            let b = next();
            let dx1 = (a % span as u64) as i32 - PATCH_RADIUS;
            let dy1 = ((a >> 32) % span as u64) as i32 - PATCH_RADIUS;
            let dx2 = (b % span as u64) as i32 - PATCH_RADIUS;
            let dy2 = ((b >> 32) % span as u64) as i32 - PATCH_RADIUS;
            *slot = ((dx1, dy1), (dx2, dy2));
        }
        pattern
    })
}

fn brief_descriptor(
    gray: &GrayImage,
    x: i32,
    y: i32,
    pattern: &[((i32, i32), (i32, i32)); 256],
) -> [u8; ORB_DESCRIPTOR_BYTES] {
    let mut descriptor = [0u8; ORB_DESCRIPTOR_BYTES];
    for (bit, &((dx1, dy1), (dx2, dy2))) in pattern.iter().enumerate() {
        let p1 = gray.get_pixel((x + dx1) as u32, (y + dy1) as u32).0[0];
        let p2 = gray.get_pixel((x + dx2) as u32, (y + dy2) as u32).0[0];
        if p1 < p2 {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    fn checkerboard(size: u32) -> GrayImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            let v = if (x / 8 + y / 8) % 2 == 0 { 235 } else { 15 };
            Luma([v])
        })
    }

    #[test]
    fn detects_corners_on_textured_image() {
        let image = checkerboard(64);
        let result = detect(&image, 1000);
        assert_eq!(result.keypoints.len(), result.descriptors.len());
        assert!(result.keypoints.len() <= 1000);
    }

    #[test]
    fn solid_color_image_yields_no_keypoints() {
        let image = ImageBuffer::from_pixel(64, 64, Luma([128u8]));
        let result = detect(&image, 1000);
        assert!(result.keypoints.is_empty());
    }

    #[test]
    fn respects_max_features_cap() {
        let image = checkerboard(128);
        let result = detect(&image, 5);
        assert!(result.keypoints.len() <= 5);
    }

    #[test]
    fn pattern_is_deterministic_across_calls() {
        let a = brief_pattern();
        let b = brief_pattern();
        assert_eq!(a, b);
    }
}
