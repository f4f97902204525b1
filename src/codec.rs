//! Frame transcoding for transport: JPEG at a chosen quality, then base64.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use std::path::Path;

use crate::error::LabelError;

pub const DEFAULT_TRANSPORT_QUALITY: u8 = 70;

/// Loads the image at `image_path`, re-encodes it as JPEG at `quality` (1..=100)
/// and returns the bytes as standard base64 text.
pub fn encode(image_path: &Path, quality: u8) -> Result<String> {
    if !(1..=100).contains(&quality) {
        return Err(LabelError::InvalidInput(format!(
            "jpeg quality must be in 1..=100, got {}",
            quality
        ))
        .into());
    }
    if !image_path.exists() {
        return Err(LabelError::NotFound(image_path.to_path_buf()).into());
    }

    let image = image::open(image_path)
        .with_context(|| format!("decode image {}", image_path.display()))?;
    let rgb = image.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&rgb)
        .with_context(|| format!("re-encode {} as jpeg", image_path.display()))?;
    Ok(BASE64_STANDARD.encode(jpeg))
}
