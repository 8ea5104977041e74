// src/convert/rasterize.rs

use crate::error::{PipelineError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, warn};

/// Renders every page of a PDF, one page in memory at a time.
///
/// `visit` receives the 1-based page number and either the bitmap or the error
/// for that page. Only a document that cannot be opened at all fails the call.
/// Returns the number of pages in the document.
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn render_pages(
        &self,
        pdf: &[u8],
        visit: &mut dyn FnMut(u32, Result<DynamicImage>),
    ) -> Result<u32>;
}

/// Largest page area kept as-is; anything bigger is scaled down to `target`.
pub fn fit_pixel_budget(width: u32, height: u32, max: u64, target: u64) -> (u32, u32) {
    let area = u64::from(width) * u64::from(height);
    if area <= max || area == 0 {
        return (width, height);
    }
    let scale = (target as f64 / area as f64).sqrt();
    let w = ((f64::from(width) * scale) as u32).max(1);
    let h = ((f64::from(height) * scale) as u32).max(1);
    (w, h)
}

/// Apply [`fit_pixel_budget`] to an already decoded image.
pub fn downscale_to_budget(image: DynamicImage, max: u64, target: u64) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (w, h) = fit_pixel_budget(width, height, max, target);
    if (w, h) == (width, height) {
        return image;
    }
    debug!(from_w = width, from_h = height, to_w = w, to_h = h, "Downscaling page");
    image.resize_exact(w, h, FilterType::Lanczos3)
}

#[cfg(feature = "pdfium")]
pub use self::pdfium::PdfiumRenderer;

#[cfg(feature = "pdfium")]
mod pdfium {
    use super::{PageRenderer, fit_pixel_budget};
    use crate::error::{PipelineError, Result};
    use image::DynamicImage;
    use pdfium_render::prelude::*;
    use std::sync::Mutex;
    use tracing::debug;

    /// Full-fidelity page rendering through the pdfium library.
    pub struct PdfiumRenderer {
        pdfium: Mutex<Pdfium>,
        dpi: f32,
        max_pixels: u64,
        target_pixels: u64,
    }

    impl PdfiumRenderer {
        /// Bind pdfium from the working directory, then from the system paths.
        pub fn bind(dpi: f32, max_pixels: u64, target_pixels: u64) -> Result<Self> {
            let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| PipelineError::Render(format!("cannot bind pdfium: {e}")))?;
            Ok(Self {
                pdfium: Mutex::new(Pdfium::new(bindings)),
                dpi,
                max_pixels,
                target_pixels,
            })
        }

        fn render_page(&self, page: &PdfPage) -> Result<DynamicImage> {
            let scale = self.dpi / 72.0;
            let width = (page.width().value * scale).max(1.0) as u32;
            let height = (page.height().value * scale).max(1.0) as u32;
            let (width, height) = fit_pixel_budget(width, height, self.max_pixels, self.target_pixels);

            let bitmap = page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(width as i32)
                        .set_target_height(height as i32)
                        .render_form_data(true)
                        .render_annotations(true),
                )
                .map_err(|e| PipelineError::Render(e.to_string()))?;
            Ok(bitmap.as_image())
        }
    }

    impl PageRenderer for PdfiumRenderer {
        fn name(&self) -> &'static str {
            "pdfium"
        }

        fn render_pages(
            &self,
            pdf: &[u8],
            visit: &mut dyn FnMut(u32, Result<DynamicImage>),
        ) -> Result<u32> {
            let pdfium = self
                .pdfium
                .lock()
                .map_err(|_| PipelineError::Render("pdfium lock poisoned".to_string()))?;
            let document = pdfium
                .load_pdf_from_byte_slice(pdf, None)
                .map_err(|e| PipelineError::Pdf(e.to_string()))?;

            let pages = document.pages();
            let count = pages.len() as u32;
            debug!(pages = count, "Rendering PDF");
            for (idx, page) in pages.iter().enumerate() {
                visit(idx as u32 + 1, self.render_page(&page));
            }
            Ok(count)
        }
    }
}

/// Pulls the largest embedded image from each page instead of rendering.
///
/// Only useful for scanned PDFs, which is what most invoice uploads are. Pages
/// with no image XObject fail individually.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedImageRenderer {
    pub max_pixels: u64,
    pub target_pixels: u64,
}

impl PageRenderer for EmbeddedImageRenderer {
    fn name(&self) -> &'static str {
        "embedded-images"
    }

    fn render_pages(
        &self,
        pdf: &[u8],
        visit: &mut dyn FnMut(u32, Result<DynamicImage>),
    ) -> Result<u32> {
        let doc = Document::load_mem(pdf)?;
        let pages = doc.get_pages();
        let count = pages.len() as u32;
        debug!(pages = count, "Extracting page images");

        for (number, page_id) in pages {
            let image = largest_page_image(&doc, page_id)
                .map(|img| downscale_to_budget(img, self.max_pixels, self.target_pixels));
            visit(number, image);
        }
        Ok(count)
    }
}

/// Renderer used for the whole run: pdfium when it binds, embedded images otherwise.
pub fn select_renderer(dpi: f32, max_pixels: u64, target_pixels: u64) -> Box<dyn PageRenderer> {
    #[cfg(feature = "pdfium")]
    match PdfiumRenderer::bind(dpi, max_pixels, target_pixels) {
        Ok(renderer) => {
            info!(renderer = renderer.name(), dpi, "PDF renderer selected");
            return Box::new(renderer);
        }
        Err(e) => warn!(error = %e, "pdfium unavailable"),
    }
    #[cfg(not(feature = "pdfium"))]
    let _ = dpi;

    let fallback = EmbeddedImageRenderer {
        max_pixels,
        target_pixels,
    };
    info!(renderer = fallback.name(), "PDF renderer selected");
    Box::new(fallback)
}

fn largest_page_image(doc: &Document, page_id: ObjectId) -> Result<DynamicImage> {
    let page = doc.get_object(page_id)?.as_dict()?;
    let resources = resolve_dict(doc, page, b"Resources")?;
    let xobjects = resolve_dict(doc, resources, b"XObject")?;

    let mut largest: Option<(u64, DynamicImage)> = None;
    for (name, entry) in xobjects.iter() {
        let Object::Stream(stream) = resolve(doc, entry) else {
            continue;
        };
        if !is_image(&stream.dict) {
            continue;
        }
        match decode_image_stream(doc, stream) {
            Ok(img) => {
                let area = u64::from(img.width()) * u64::from(img.height());
                if largest.as_ref().is_none_or(|(best, _)| area > *best) {
                    largest = Some((area, img));
                }
            }
            Err(e) => {
                warn!(xobject = %String::from_utf8_lossy(name), error = %e, "Skipping undecodable image");
            }
        }
    }

    largest
        .map(|(_, img)| img)
        .ok_or_else(|| PipelineError::Render("no image on page".to_string()))
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

fn decode_image_stream(doc: &Document, stream: &Stream) -> Result<DynamicImage> {
    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    // DCT streams are whole JPEG files; some producers also embed PNG/TIFF files.
    if let Ok(img) = image::load_from_memory(&content) {
        return Ok(img);
    }
    raw_pixels_to_image(doc, &stream.dict, content)
}

fn raw_pixels_to_image(doc: &Document, dict: &Dictionary, pixels: Vec<u8>) -> Result<DynamicImage> {
    let width = int_entry(dict, b"Width")? as u32;
    let height = int_entry(dict, b"Height")? as u32;
    let bpc = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    if bpc != 8 {
        return Err(PipelineError::Render(format!("unsupported bits per component: {bpc}")));
    }

    let too_small = || PipelineError::Render(format!("pixel buffer too small for {width}x{height}"));
    let img = match channels(doc, dict) {
        1 => DynamicImage::ImageLuma8(
            image::GrayImage::from_raw(width, height, pixels).ok_or_else(too_small)?,
        ),
        3 => DynamicImage::ImageRgb8(
            image::RgbImage::from_raw(width, height, pixels).ok_or_else(too_small)?,
        ),
        n => return Err(PipelineError::Render(format!("unsupported colour space ({n} channels)"))),
    };
    Ok(img)
}

fn channels(doc: &Document, dict: &Dictionary) -> u32 {
    let Ok(cs) = dict.get(b"ColorSpace") else {
        return 3;
    };
    match resolve(doc, cs) {
        Object::Name(n) if n == b"DeviceGray" => 1,
        Object::Name(n) if n == b"DeviceCMYK" => 4,
        Object::Array(arr) => match arr.first() {
            Some(Object::Name(n)) if n == b"Indexed" => 1,
            Some(Object::Name(n)) if n == b"ICCBased" => arr
                .get(1)
                .and_then(|o| match resolve(doc, o) {
                    Object::Stream(s) => int_entry(&s.dict, b"N").ok(),
                    _ => None,
                })
                .map_or(3, |n| n as u32),
            _ => 3,
        },
        _ => 3,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Result<&'a Dictionary> {
    let obj = dict.get(key)?;
    Ok(resolve(doc, obj).as_dict()?)
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<i64> {
    Ok(dict.get(key)?.as_i64()?)
}
