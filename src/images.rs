//! Image compression for record uploads.
//!
//! Portraits are thumbnailed to 500x500 and re-encoded as lossy JPEG; while
//! the result stays above the size budget the image is shrunk by 10% and
//! re-encoded at a lower quality, down to a 100px floor.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};

/// Maximum edge of the stored portrait
const MAX_DIMENSION: u32 = 500;
/// Target size of the encoded JPEG
const MAX_ENCODED_BYTES: usize = 50 * 1024;
/// Shrinking stops once either edge would drop below this
const MIN_DIMENSION: u32 = 100;

const INITIAL_QUALITY: u8 = 70;
const RETRY_QUALITY: u8 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Result of a portrait compression.
#[derive(Debug)]
pub struct CompressedImage {
    /// JPEG bytes
    pub data: Vec<u8>,
    pub original_dimensions: (u32, u32),
    pub final_dimensions: (u32, u32),
}

/// Compress an uploaded portrait to a small JPEG.
///
/// Accepts any format the `image` crate decodes. The shrink loop trades
/// resolution for size but never goes below the 100px floor, so oversized
/// output is possible for extremely dense images and accepted as-is.
pub fn compress_portrait(data: &[u8]) -> Result<CompressedImage, ImageError> {
    let img = image::load_from_memory(data)?;
    let original_dimensions = img.dimensions();

    // thumbnail scales in both directions; portraits only ever shrink
    let mut current = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        img.thumbnail(MAX_DIMENSION, MAX_DIMENSION)
    } else {
        img
    };
    let mut encoded = encode_jpeg(&current, INITIAL_QUALITY)?;

    while encoded.len() > MAX_ENCODED_BYTES
        && current.width() > MIN_DIMENSION
        && current.height() > MIN_DIMENSION
    {
        let new_w = ((current.width() as f64) * 0.9) as u32;
        let new_h = ((current.height() as f64) * 0.9) as u32;
        current = current.resize(new_w.max(1), new_h.max(1), image::imageops::FilterType::Triangle);
        encoded = encode_jpeg(&current, RETRY_QUALITY)?;
    }

    Ok(CompressedImage {
        data: encoded,
        original_dimensions,
        final_dimensions: current.dimensions(),
    })
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    // JPEG has no alpha
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}
