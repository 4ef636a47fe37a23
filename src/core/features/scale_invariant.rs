//! Scale-invariant keypoint/descriptor family (§4.4, "scale-invariant set").
//!
//! A from-scratch, deterministic difference-of-Gaussians detector paired
//! with a gradient-orientation-histogram descriptor — the same family of
//! technique the `dHash`/`pHash` algorithms in this codebase's perceptual
//! hashing already hand-roll rather than reach for a heavyweight
//! computer-vision binding. No call here depends on wall-clock time or
//! randomness, so two runs over the same pixels always agree.

use super::keypoint::Keypoint;
use super::{ScaleInvariantSet, SIFT_DESCRIPTOR_DIM};
use image::{GenericImageView, GrayImage};
use imageproc::filter::gaussian_blur_f32;

const NUM_SCALES: usize = 5;
const BASE_SIGMA: f32 = 1.0;
const SCALE_FACTOR: f32 = std::f32::consts::SQRT_2;
const CONTRAST_THRESHOLD: f32 = 4.0; // on an 8-bit intensity scale
const ORIENTATION_BINS: usize = 36;
const DESCRIPTOR_CELLS: usize = 4;
const DESCRIPTOR_BINS: usize = 8;
const PATCH_RADIUS: i32 = 8;

/// Detect up to `max_features` scale-invariant keypoints and their 128-D
/// descriptors in a preprocessed (grayscale, CLAHE'd, blurred) image.
pub fn detect(gray: &GrayImage, max_features: usize) -> ScaleInvariantSet {
    let (width, height) = gray.dimensions();
    if width < 8 || height < 8 {
        return ScaleInvariantSet::empty();
    }

    let float_image = to_f32(gray);
    let pyramid = build_gaussian_pyramid(&float_image, width, height);
    let dog = build_dog(&pyramid);

    let mut candidates = find_extrema(&dog, width, height);
    candidates.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(max_features.max(0) * 3); // over-sample before descriptor filtering

    let gradients = sobel_gradients(&float_image, width, height);

    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for (pos, response, scale_index) in candidates {
        let (x, y) = pos;
        let angle = dominant_orientation(&gradients, width, height, x, y);
        if let Some(descriptor) = compute_descriptor(&gradients, width, height, x, y, angle) {
            let size = BASE_SIGMA * SCALE_FACTOR.powi(scale_index as i32) * 2.0;
            keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                size,
                angle,
                response: response.abs(),
                octave: 0,
                class_id: -1,
            });
            descriptors.push(descriptor);
        }
        if keypoints.len() >= max_features {
            break;
        }
    }

    ScaleInvariantSet {
        keypoints,
        descriptors,
    }
}

fn to_f32(gray: &GrayImage) -> Vec<f32> {
    gray.pixels().map(|p| p.0[0] as f32).collect()
}

/// `NUM_SCALES` Gaussian-blurred copies of the image at geometrically
/// increasing sigma, stored as flat row-major buffers.
fn build_gaussian_pyramid(base: &[f32], width: u32, height: u32) -> Vec<Vec<f32>> {
    let image_buf = image::ImageBuffer::<image::Luma<f32>, Vec<f32>>::from_raw(
        width,
        height,
        base.to_vec(),
    )
    .expect("buffer matches declared dimensions");

    (0..NUM_SCALES)
        .map(|level| {
            let sigma = BASE_SIGMA * SCALE_FACTOR.powi(level as i32);
            let blurred = gaussian_blur_f32(&image_buf, sigma);
            blurred.into_raw()
        })
        .collect()
}

fn build_dog(pyramid: &[Vec<f32>]) -> Vec<Vec<f32>> {
    pyramid
        .windows(2)
        .map(|pair| pair[1].iter().zip(&pair[0]).map(|(a, b)| a - b).collect())
        .collect()
}

/// Find pixels that are a local extremum among their 8 spatial neighbors in
/// their own DoG level, above the contrast floor. Returns `(position,
/// response, scale_index)`.
fn find_extrema(dog: &[Vec<f32>], width: u32, height: u32) -> Vec<((u32, u32), f32, usize)> {
    let w = width as usize;
    let h = height as usize;
    let mut out = Vec::new();

    for (level, plane) in dog.iter().enumerate() {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let idx = y * w + x;
                let value = plane[idx];
                if value.abs() < CONTRAST_THRESHOLD {
                    continue;
                }
                let mut is_max = true;
                let mut is_min = true;
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nidx = ((y as i32 + dy) as usize) * w + (x as i32 + dx) as usize;
                        let neighbor = plane[nidx];
                        if neighbor >= value {
                            is_max = false;
                        }
                        if neighbor <= value {
                            is_min = false;
                        }
                    }
                    if !is_max && !is_min {
                        break;
                    }
                }
                if is_max || is_min {
                    out.push(((x as u32, y as u32), value, level));
                }
            }
        }
    }
    out
}

struct Gradients {
    magnitude: Vec<f32>,
    orientation: Vec<f32>,
    width: usize,
}

fn sobel_gradients(image: &[f32], width: u32, height: u32) -> Gradients {
    let w = width as usize;
    let h = height as usize;
    let mut magnitude = vec![0f32; w * h];
    let mut orientation = vec![0f32; w * h];

    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let gx = image[(y - 1) * w + x + 1] + 2.0 * image[y * w + x + 1] + image[(y + 1) * w + x + 1]
                - image[(y - 1) * w + x - 1]
                - 2.0 * image[y * w + x - 1]
                - image[(y + 1) * w + x - 1];
            let gy = image[(y + 1) * w + x - 1] + 2.0 * image[(y + 1) * w + x] + image[(y + 1) * w + x + 1]
                - image[(y - 1) * w + x - 1]
                - 2.0 * image[(y - 1) * w + x]
                - image[(y - 1) * w + x + 1];
            let idx = y * w + x;
            magnitude[idx] = (gx * gx + gy * gy).sqrt();
            orientation[idx] = gy.atan2(gx).to_degrees().rem_euclid(360.0);
        }
    }

    Gradients {
        magnitude,
        orientation,
        width: w,
    }
}

fn dominant_orientation(grad: &Gradients, width: u32, height: u32, cx: u32, cy: u32) -> f32 {
    let mut histogram = [0f32; ORIENTATION_BINS];
    let w = width as i32;
    let h = height as i32;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            let x = cx as i32 + dx;
            let y = cy as i32 + dy;
            if x < 0 || y < 0 || x >= w || y >= h {
                continue;
            }
            let idx = y as usize * grad.width + x as usize;
            let bin = ((grad.orientation[idx] / 360.0) * ORIENTATION_BINS as f32) as usize
                % ORIENTATION_BINS;
            histogram[bin] += grad.magnitude[idx];
        }
    }
    let (best_bin, _) = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, &0.0));
    (best_bin as f32 + 0.5) * (360.0 / ORIENTATION_BINS as f32)
}

/// 4x4 cell x 8 orientation-bin histogram over a 16x16 patch, with gradient
/// orientations expressed relative to the keypoint's dominant orientation
/// so the descriptor is rotation-normalized.
fn compute_descriptor(
    grad: &Gradients,
    width: u32,
    height: u32,
    cx: u32,
    cy: u32,
    keypoint_angle: f32,
) -> Option<[f32; SIFT_DESCRIPTOR_DIM]> {
    let w = width as i32;
    let h = height as i32;
    if (cx as i32) < PATCH_RADIUS
        || (cy as i32) < PATCH_RADIUS
        || cx as i32 + PATCH_RADIUS >= w
        || cy as i32 + PATCH_RADIUS >= h
    {
        return None;
    }

    let mut descriptor = [0f32; SIFT_DESCRIPTOR_DIM];
    let cell_size = (2 * PATCH_RADIUS) as f32 / DESCRIPTOR_CELLS as f32;

    for dy in -PATCH_RADIUS..PATCH_RADIUS {
        for dx in -PATCH_RADIUS..PATCH_RADIUS {
            let x = cx as i32 + dx;
            let y = cy as i32 + dy;
            let idx = y as usize * grad.width + x as usize;
            let relative_angle = (grad.orientation[idx] - keypoint_angle).rem_euclid(360.0);
            let bin = ((relative_angle / 360.0) * DESCRIPTOR_BINS as f32) as usize % DESCRIPTOR_BINS;

            let cell_x = (((dx + PATCH_RADIUS) as f32 / cell_size) as usize).min(DESCRIPTOR_CELLS - 1);
            let cell_y = (((dy + PATCH_RADIUS) as f32 / cell_size) as usize).min(DESCRIPTOR_CELLS - 1);
            let cell_index = cell_y * DESCRIPTOR_CELLS + cell_x;
            descriptor[cell_index * DESCRIPTOR_BINS + bin] += grad.magnitude[idx];
        }
    }

    let norm: f32 = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-6 {
        for v in descriptor.iter_mut() {
            *v /= norm;
        }
    }
    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    fn checkerboard(size: u32) -> GrayImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            let v = if (x / 8 + y / 8) % 2 == 0 { 230 } else { 20 };
            Luma([v])
        })
    }

    #[test]
    fn detects_keypoints_on_textured_image() {
        let image = checkerboard(64);
        let result = detect(&image, 1000);
        assert!(result.keypoints.len() <= 1000);
        assert_eq!(result.keypoints.len(), result.descriptors.len());
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
    fn descriptors_are_unit_normalized() {
        let image = checkerboard(64);
        let result = detect(&image, 1000);
        for descriptor in &result.descriptors {
            let norm: f32 = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!(norm < 1.01);
        }
    }
}
