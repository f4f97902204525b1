//! Decoded video frames.
//!
//! - `DecodedFrame`: one RGB24 frame in decode order, produced by the ingestion sources.
//! - `write_jpeg`: persists a frame as the corpus image for its index.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::io::Write;

/// One decoded frame. `index` is assigned in decode order starting at 0.
#[derive(Clone)]
pub struct DecodedFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24, row-major, no padding.
    pixels: Vec<u8>,
}

impl DecodedFrame {
    pub fn new(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            pixels,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                self.index,
                self.pixels.len(),
                self.width as usize * self.height as usize * 3,
                self.width,
                self.height
            )
        })
    }

    /// Encode this frame as JPEG into `out`.
    pub fn write_jpeg<W: Write>(&self, out: &mut W, quality: u8) -> Result<()> {
        let image = self.to_image()?;
        JpegEncoder::new_with_quality(out, quality)
            .encode_image(&image)
            .with_context(|| format!("encode frame {} as jpeg", self.index))?;
        Ok(())
    }
}

// Pixel data is large and not useful in debug output.
impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
