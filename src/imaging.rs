//! Page image encoding for the vision model and the storage bucket.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Largest JPEG sent to the vision model.
pub const MAX_ANALYSIS_BYTES: usize = 4_718_592; // 4.5 MiB
const ANALYSIS_QUALITY: u8 = 95;
const SHRUNK_QUALITY: u8 = 90;
const SHRINK_FACTOR: f64 = 0.8;
/// Quality of the JPEG copies uploaded for the web views.
pub const UPLOAD_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("could not read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode or encode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode an image file as RGB, whatever its extension claims.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImagingError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

/// Encode at high quality, then shrink by 20% per step until the JPEG fits in `max_bytes`.
pub fn jpeg_within(image: RgbImage, max_bytes: usize) -> Result<Vec<u8>, ImagingError> {
    let mut bytes = encode_jpeg(&image, ANALYSIS_QUALITY)?;
    let mut current = image;

    while bytes.len() > max_bytes {
        let width = (current.width() as f64 * SHRINK_FACTOR) as u32;
        let height = (current.height() as f64 * SHRINK_FACTOR) as u32;
        if width == 0 || height == 0 {
            break;
        }
        current = imageops::resize(&current, width, height, FilterType::Lanczos3);
        bytes = encode_jpeg(&current, SHRUNK_QUALITY)?;
        debug!(width, height, bytes = bytes.len(), "Shrunk page image");
    }
    Ok(bytes)
}

/// Base64 JPEG of a page image, sized for the vision model.
pub fn analysis_payload(path: &Path) -> Result<String, ImagingError> {
    let jpeg = jpeg_within(load_rgb(path)?, MAX_ANALYSIS_BYTES)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

/// JPEG copy of a page image for the storage bucket.
pub fn upload_jpeg(path: &Path) -> Result<Vec<u8>, ImagingError> {
    encode_jpeg(&load_rgb(path)?, UPLOAD_QUALITY)
}
