//! Fast image decoding with format-specific optimizations.
//!
//! Uses zune-jpeg for JPEG payloads (1.5-2x faster than the `image` crate),
//! falling back to `image` for every other format. Both the Image Fetcher
//! (decoding downloaded bytes) and the HTTP layer (decoding uploaded query
//! images) go through here so format sniffing happens exactly once.

use crate::error::ExtractError;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use std::path::Path;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Sniff the format from the leading magic bytes, independent of any file
/// extension the caller may or may not have.
fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF]
}

/// Decode an in-memory image, trying the fast JPEG path first.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, ExtractError> {
    if looks_like_jpeg(bytes) {
        match decode_jpeg_fast(bytes) {
            Ok(image) => return Ok(image),
            Err(_) => return decode_fallback(bytes),
        }
    }
    decode_fallback(bytes)
}

/// Decode an image from disk.
pub fn decode_path(path: &Path) -> Result<DynamicImage, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Decode {
        reason: format!("{}: {}", path.display(), e),
    })?;
    decode_bytes(&bytes)
}

fn decode_jpeg_fast(bytes: &[u8]) -> Result<DynamicImage, ExtractError> {
    let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);

    let pixels = decoder.decode().map_err(|e| ExtractError::Decode {
        reason: format!("zune-jpeg decode failed: {:?}", e),
    })?;

    let info = decoder.info().ok_or_else(|| ExtractError::Decode {
        reason: "zune-jpeg produced no image info".to_string(),
    })?;
    let (width, height) = (info.width as u32, info.height as u32);
    let out_colorspace = decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB);

    let image = match out_colorspace {
        ColorSpace::RGB => {
            let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, pixels)
                .ok_or_else(|| ExtractError::Decode {
                    reason: "failed to build RGB buffer".to_string(),
                })?;
            DynamicImage::ImageRgb8(buffer)
        }
        ColorSpace::RGBA => {
            let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels).ok_or_else(|| ExtractError::Decode {
                    reason: "failed to build RGBA buffer".to_string(),
                })?;
            DynamicImage::ImageRgba8(buffer)
        }
        ColorSpace::Luma => {
            let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels).ok_or_else(|| ExtractError::Decode {
                    reason: "failed to build Luma buffer".to_string(),
                })?;
            DynamicImage::ImageLuma8(buffer)
        }
        _ => return decode_fallback(bytes),
    };

    Ok(image)
}

fn decode_fallback(bytes: &[u8]) -> Result<DynamicImage, ExtractError> {
    image::load_from_memory(bytes).map_err(|e| ExtractError::Decode {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_magic_bytes_recognized() {
        assert!(looks_like_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!looks_like_jpeg(&[0x89, 0x50, 0x4E, 0x47]));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_bytes(&[0, 1, 2, 3, 4]).unwrap_err();
        matches!(err, ExtractError::Decode { .. });
    }
}
