//! Legibility preprocessing applied to each page before compression.
//!
//! Two strategies exist. The adaptive one (blur, grayscale, local threshold) is
//! compiled in with the `adaptive-enhance` feature and chosen by a start-up self-test;
//! otherwise pages get a grayscale contrast boost.

use crate::error::Result;
use image::{DynamicImage, GrayImage, Luma};
use tracing::info;

pub trait Enhancer: Send + Sync {
    fn name(&self) -> &'static str;
    fn enhance(&self, page: DynamicImage) -> Result<DynamicImage>;
}

/// Grayscale plus a fixed contrast boost around the mean luminance.
#[derive(Debug, Clone, Copy)]
pub struct ContrastEnhancer {
    pub factor: f32,
}

impl Default for ContrastEnhancer {
    fn default() -> Self {
        Self { factor: 1.5 }
    }
}

impl ContrastEnhancer {
    fn boost(&self, gray: &GrayImage) -> GrayImage {
        let n = u64::from(gray.width()) * u64::from(gray.height());
        if n == 0 {
            return gray.clone();
        }
        let sum: u64 = gray.pixels().map(|p| u64::from(p.0[0])).sum();
        let mean = (sum as f32 / n as f32).round();

        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let v = f32::from(gray.get_pixel(x, y).0[0]);
            let out = mean + self.factor * (v - mean);
            Luma([out.clamp(0.0, 255.0).round() as u8])
        })
    }
}

impl Enhancer for ContrastEnhancer {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn enhance(&self, page: DynamicImage) -> Result<DynamicImage> {
        let gray = page.to_luma8();
        Ok(DynamicImage::ImageRgb8(
            DynamicImage::ImageLuma8(self.boost(&gray)).to_rgb8(),
        ))
    }
}

#[cfg(feature = "adaptive-enhance")]
mod adaptive {
    use super::{ContrastEnhancer, Enhancer};
    use crate::error::{PipelineError, Result};
    use image::DynamicImage;
    use imageproc::contrast::adaptive_threshold;
    use imageproc::filter::gaussian_blur_f32;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use tracing::warn;

    /// Gaussian blur, grayscale, then a locally thresholded black/white page.
    #[derive(Debug, Clone, Copy)]
    pub struct AdaptiveThresholdEnhancer {
        pub sigma: f32,
        pub block_radius: u32,
        pub fallback: ContrastEnhancer,
    }

    impl Default for AdaptiveThresholdEnhancer {
        fn default() -> Self {
            // 3x3 kernel and an 11px block
            Self {
                sigma: 0.8,
                block_radius: 5,
                fallback: ContrastEnhancer::default(),
            }
        }
    }

    impl AdaptiveThresholdEnhancer {
        pub fn threshold(&self, page: &DynamicImage) -> Result<DynamicImage> {
            if page.width() == 0 || page.height() == 0 {
                return Err(PipelineError::Render("empty page image".to_string()));
            }
            let rgb = page.to_rgb8();
            let binary = catch_unwind(AssertUnwindSafe(|| {
                let blurred = gaussian_blur_f32(&rgb, self.sigma);
                let gray = DynamicImage::ImageRgb8(blurred).to_luma8();
                adaptive_threshold(&gray, self.block_radius)
            }))
            .map_err(|_| PipelineError::Render("adaptive threshold panicked".to_string()))?;
            Ok(DynamicImage::ImageRgb8(
                DynamicImage::ImageLuma8(binary).to_rgb8(),
            ))
        }
    }

    impl Enhancer for AdaptiveThresholdEnhancer {
        fn name(&self) -> &'static str {
            "adaptive-threshold"
        }

        fn enhance(&self, page: DynamicImage) -> Result<DynamicImage> {
            match self.threshold(&page) {
                Ok(out) => Ok(out),
                Err(e) => {
                    warn!(error = %e, "Adaptive enhancement failed, using contrast boost");
                    self.fallback.enhance(page)
                }
            }
        }
    }
}

#[cfg(feature = "adaptive-enhance")]
pub use adaptive::AdaptiveThresholdEnhancer;

/// Pick the enhancement strategy once, at start-up.
pub fn select_enhancer() -> Box<dyn Enhancer> {
    #[cfg(feature = "adaptive-enhance")]
    {
        let checkerboard = DynamicImage::ImageLuma8(GrayImage::from_fn(16, 16, |x, y| {
            Luma([if (x + y) % 2 == 0 { 30 } else { 220 }])
        }));
        let adaptive = AdaptiveThresholdEnhancer::default();
        if adaptive.threshold(&checkerboard).is_ok() {
            info!(strategy = adaptive.name(), "Image enhancement strategy selected");
            return Box::new(adaptive);
        }
    }

    let basic = ContrastEnhancer::default();
    info!(strategy = basic.name(), "Image enhancement strategy selected");
    Box::new(basic)
}
