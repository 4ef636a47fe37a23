//! SIMD-accelerated image resizing via `fast_image_resize`.
//!
//! Used by the Feature Extractor's preprocessing step (§4.4): images whose
//! longer side exceeds the configured cap are downscaled with area-based
//! interpolation before grayscale conversion and CLAHE.

use crate::error::ExtractError;
use fast_image_resize::{images::Image, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};

/// A resizer instance. Kept around so the pipeline can reuse internal
/// scratch buffers across candidates instead of allocating one per call.
pub struct FastResizer {
    resizer: Resizer,
}

impl FastResizer {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
        }
    }

    /// Resize to grayscale at an exact target size (bilinear).
    pub fn resize_to_grayscale(
        &mut self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<GrayImage, ExtractError> {
        let gray = image.to_luma8();
        self.resize_luma(&gray, width, height, ResizeAlg::Convolution(fast_image_resize::FilterType::Bilinear))
    }

    /// Resize an RGB image so its longer side equals `max_side`, preserving
    /// aspect ratio, using area-based (box) interpolation as specified for
    /// the downscale-only preprocessing step. Returns the original image
    /// unchanged if it is already within the cap.
    pub fn cap_longer_side(
        &mut self,
        image: &DynamicImage,
        max_side: u32,
    ) -> Result<DynamicImage, ExtractError> {
        let (w, h) = (image.width(), image.height());
        let longer = w.max(h);
        if longer <= max_side || longer == 0 {
            return Ok(image.clone());
        }

        let scale = max_side as f64 / longer as f64;
        let new_w = ((w as f64) * scale).round().max(1.0) as u32;
        let new_h = ((h as f64) * scale).round().max(1.0) as u32;

        let rgb = image.to_rgb8();
        let resized = self.resize_rgb(&rgb, new_w, new_h, ResizeAlg::Convolution(fast_image_resize::FilterType::Box))?;
        Ok(DynamicImage::ImageRgb8(resized))
    }

    fn resize_luma(
        &mut self,
        gray: &GrayImage,
        width: u32,
        height: u32,
        alg: ResizeAlg,
    ) -> Result<GrayImage, ExtractError> {
        let (src_w, src_h) = (gray.width(), gray.height());
        if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
            return Err(ExtractError::Decode {
                reason: "cannot resize an image with zero dimension".to_string(),
            });
        }

        let src_image = Image::from_vec_u8(src_w, src_h, gray.clone().into_raw(), PixelType::U8)
            .map_err(|e| ExtractError::Decode {
                reason: format!("failed to wrap source buffer: {e}"),
            })?;
        let mut dst_image = Image::new(width, height, PixelType::U8);
        let options = ResizeOptions::new().resize_alg(alg);
        self.resizer
            .resize(&src_image, &mut dst_image, &options)
            .map_err(|e| ExtractError::Decode {
                reason: format!("resize failed: {e}"),
            })?;

        let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width, height, dst_image.into_vec()).ok_or_else(|| {
                ExtractError::Decode {
                    reason: "failed to build resized grayscale buffer".to_string(),
                }
            })?;
        Ok(buffer)
    }

    fn resize_rgb(
        &mut self,
        rgb: &RgbImage,
        width: u32,
        height: u32,
        alg: ResizeAlg,
    ) -> Result<RgbImage, ExtractError> {
        let (src_w, src_h) = (rgb.width(), rgb.height());
        let src_image = Image::from_vec_u8(src_w, src_h, rgb.clone().into_raw(), PixelType::U8x3)
            .map_err(|e| ExtractError::Decode {
                reason: format!("failed to wrap source buffer: {e}"),
            })?;
        let mut dst_image = Image::new(width, height, PixelType::U8x3);
        let options = ResizeOptions::new().resize_alg(alg);
        self.resizer
            .resize(&src_image, &mut dst_image, &options)
            .map_err(|e| ExtractError::Decode {
                reason: format!("resize failed: {e}"),
            })?;

        ImageBuffer::from_raw(width, height, dst_image.into_vec()).ok_or_else(|| {
            ExtractError::Decode {
                reason: "failed to build resized RGB buffer".to_string(),
            }
        })
    }
}

impl Default for FastResizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn test_image(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 255) as u8, (y % 255) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn resize_to_grayscale_produces_exact_dimensions() {
        let mut resizer = FastResizer::new();
        let image = test_image(100, 100);
        let resized = resizer.resize_to_grayscale(&image, 8, 8).unwrap();
        assert_eq!((resized.width(), resized.height()), (8, 8));
    }

    #[test]
    fn cap_longer_side_preserves_aspect_ratio() {
        let mut resizer = FastResizer::new();
        let image = test_image(1600, 800);
        let resized = resizer.cap_longer_side(&image, 800).unwrap();
        assert_eq!(resized.width(), 800);
        assert_eq!(resized.height(), 400);
    }

    #[test]
    fn cap_longer_side_is_noop_under_cap() {
        let mut resizer = FastResizer::new();
        let image = test_image(400, 300);
        let resized = resizer.cap_longer_side(&image, 800).unwrap();
        assert_eq!((resized.width(), resized.height()), (400, 300));
    }
}
