// src/convert/mod.rs

pub mod compress;
pub mod enhance;
pub mod rasterize;

pub use compress::{Compressor, EncodedImage};
pub use enhance::{ContrastEnhancer, Enhancer, select_enhancer};
pub use rasterize::{EmbeddedImageRenderer, PageRenderer, select_renderer};

use crate::config::PipelineSection;
use crate::error::{PipelineError, Result};
use crate::sniff::{self, FileKind};
use image::DynamicImage;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{info, info_span, warn};

/// What a downloaded document turned into.
#[derive(Debug)]
pub enum Converted {
    /// One encoded image per page that converted, in page order.
    Pages(Vec<EncodedImage>),
    /// Neither a PDF nor a recognised image. Callers decide whether to skip.
    Unsupported,
}

/// Raw bytes to payload-ready page images: render, enhance, compress.
pub struct FileConverter {
    renderer: Box<dyn PageRenderer>,
    enhancer: Box<dyn Enhancer>,
    compressor: Compressor,
    max_page_pixels: u64,
    target_page_pixels: u64,
}

impl FileConverter {
    pub fn new(
        renderer: Box<dyn PageRenderer>,
        enhancer: Box<dyn Enhancer>,
        compressor: Compressor,
        max_page_pixels: u64,
        target_page_pixels: u64,
    ) -> Self {
        Self {
            renderer,
            enhancer,
            compressor,
            max_page_pixels,
            target_page_pixels,
        }
    }

    /// Pick the available renderer and enhancer once and build the converter.
    pub fn from_config(cfg: &PipelineSection) -> Self {
        Self::new(
            select_renderer(cfg.render_dpi, cfg.max_page_pixels, cfg.target_page_pixels),
            select_enhancer(),
            Compressor::new(cfg.max_image_bytes, cfg.max_resize_rounds),
            cfg.max_page_pixels,
            cfg.target_page_pixels,
        )
    }

    /// Detect the file kind and convert it. A panic in a decoder or renderer
    /// comes back as a `Render` error for this document only.
    pub fn convert(&self, bytes: &[u8]) -> Result<Converted> {
        let kind = sniff::detect(bytes);
        info!(kind = %kind, bytes = bytes.len(), "Detected file type");
        catch_unwind(AssertUnwindSafe(|| match kind {
            FileKind::Pdf => Ok(Converted::Pages(self.pdf_to_images(bytes)?)),
            FileKind::Image => Ok(Converted::Pages(vec![self.image_to_base64(bytes)?])),
            FileKind::Unknown => Ok(Converted::Unsupported),
        }))
        .unwrap_or_else(|payload| {
            let msg = panic_message(payload.as_ref());
            warn!(kind = %kind, panic = %msg, "Conversion panicked");
            Err(PipelineError::Render(format!("page conversion panicked: {msg}")))
        })
    }

    /// Every page that renders, enhanced and compressed. Failed pages are logged
    /// and left out; only an unreadable document is an error.
    pub fn pdf_to_images(&self, pdf: &[u8]) -> Result<Vec<EncodedImage>> {
        let mut encoded = Vec::new();
        let pages = self.renderer.render_pages(pdf, &mut |page_number, page| {
            let _span = info_span!("page", page_number).entered();
            match page.and_then(|img| self.prepare(img)) {
                Ok(image) => {
                    info!(size = image.byte_len, "Page converted");
                    encoded.push(image);
                }
                Err(e) => warn!(error = %e, "Page skipped"),
            }
        })?;
        info!(pages, converted = encoded.len(), renderer = self.renderer.name(), "PDF converted");
        Ok(encoded)
    }

    /// A single uploaded image, through the same enhance and compress steps.
    pub fn image_to_base64(&self, bytes: &[u8]) -> Result<EncodedImage> {
        let image = image::load_from_memory(bytes)?;
        let image = rasterize::downscale_to_budget(
            DynamicImage::ImageRgb8(image.to_rgb8()),
            self.max_page_pixels,
            self.target_page_pixels,
        );
        self.prepare(image)
    }

    fn prepare(&self, page: DynamicImage) -> Result<EncodedImage> {
        let enhanced = self.enhancer.enhance(page)?;
        self.compressor.compress(&enhanced)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
