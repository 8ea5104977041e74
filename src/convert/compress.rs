use crate::error::Result;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use tracing::{debug, info, warn};

const START_QUALITY: u8 = 95;
const QUALITY_STEP: u8 = 10;
/// Once quality drops to this, shrink the image instead.
const QUALITY_FLOOR: u8 = 30;
const QUALITY_AFTER_RESIZE: u8 = 80;
const RESIZE_FACTOR: f64 = 0.8;
/// No 80% resize takes a side below this many pixels.
pub const MIN_SIDE: u32 = 32;

/// Base64 JPEG ready to be sent as an inline image.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64: String,
    /// Size of the JPEG before base64.
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub attempts: u32,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }
}

/// Brings JPEG pages under the API payload budget.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    pub max_bytes: usize,
    pub max_resize_rounds: u32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            max_bytes: 4_718_592,
            max_resize_rounds: 6,
        }
    }
}

impl Compressor {
    pub fn new(max_bytes: usize, max_resize_rounds: u32) -> Self {
        Self {
            max_bytes,
            max_resize_rounds,
        }
    }

    /// Lower JPEG quality in steps of 10, shrinking to 80% whenever quality
    /// reaches 30, until the encoding fits `max_bytes`.
    ///
    /// Bounded by `max_resize_rounds` and [`MIN_SIDE`]; past that the image is
    /// halved once and returned even if it is still over budget.
    pub fn compress(&self, image: &DynamicImage) -> Result<EncodedImage> {
        let mut current = image.to_rgb8();
        let mut quality = START_QUALITY;
        let mut rounds = 0u32;
        let mut attempts = 0u32;

        loop {
            let jpeg = encode_jpeg(&current, quality)?;
            attempts += 1;
            debug!(quality, size = jpeg.len(), "Testing compression");

            if jpeg.len() <= self.max_bytes {
                info!(
                    size = jpeg.len(),
                    quality,
                    width = current.width(),
                    height = current.height(),
                    "Image compressed successfully"
                );
                return Ok(finish(jpeg, &current, quality, attempts));
            }

            quality = quality.saturating_sub(QUALITY_STEP);
            if quality <= QUALITY_FLOOR {
                let (w, h) = scaled(current.width(), current.height(), RESIZE_FACTOR);
                if rounds >= self.max_resize_rounds || w.min(h) < MIN_SIDE {
                    break;
                }
                debug!(width = w, height = h, "Resizing image");
                current = imageops::resize(&current, w, h, FilterType::Lanczos3);
                rounds += 1;
                quality = QUALITY_AFTER_RESIZE;
            }
        }

        let (w, h) = scaled(current.width(), current.height(), 0.5);
        warn!(width = w, height = h, "Using aggressive compression");
        let current = imageops::resize(&current, w, h, FilterType::Lanczos3);
        let jpeg = encode_jpeg(&current, QUALITY_FLOOR)?;
        attempts += 1;
        if jpeg.len() > self.max_bytes {
            warn!(size = jpeg.len(), budget = self.max_bytes, "Image still over budget");
        }
        Ok(finish(jpeg, &current, QUALITY_FLOOR, attempts))
    }
}

fn scaled(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let w = ((f64::from(width) * factor) as u32).max(1);
    let h = ((f64::from(height) * factor) as u32).max(1);
    (w, h)
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(image)?;
    }
    Ok(buf)
}

fn finish(jpeg: Vec<u8>, image: &RgbImage, quality: u8, attempts: u32) -> EncodedImage {
    EncodedImage {
        base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        byte_len: jpeg.len(),
        width: image.width(),
        height: image.height(),
        quality,
        attempts,
    }
}
