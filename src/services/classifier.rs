//! Overlay template classification.
//!
//! Decides whether a decoded overlay matches the known standard template.
//! The reference template is loaded and resized once per process; a missing
//! template degrades to "not standard" instead of failing the conversion.

use camino::Utf8PathBuf;
use image::{DynamicImage, RgbImage, RgbaImage, imageops};
use std::sync::OnceLock;

/// Canonical overlay geometry the template is compared at.
pub const OVERLAY_WIDTH: u32 = 360;
pub const OVERLAY_HEIGHT: u32 = 640;

/// Peak correlation above this counts as a template match.
pub const MATCH_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub is_standard_template: bool,
    pub similarity_score: f64,
}

pub struct TemplateClassifier {
    template_path: Utf8PathBuf,
    /// Loaded lazily, once; `None` inside means the template is unavailable.
    template: OnceLock<Option<RgbImage>>,
}

impl TemplateClassifier {
    pub fn new(template_path: Utf8PathBuf) -> Self {
        Self {
            template_path,
            template: OnceLock::new(),
        }
    }

    fn template(&self) -> Option<&RgbImage> {
        self.template
            .get_or_init(|| match image::open(&self.template_path) {
                Ok(img) => {
                    tracing::info!("Loaded overlay template {}", self.template_path);
                    Some(
                        img.resize_exact(
                            OVERLAY_WIDTH,
                            OVERLAY_HEIGHT,
                            imageops::FilterType::Triangle,
                        )
                        .to_rgb8(),
                    )
                }
                Err(e) => {
                    tracing::warn!(
                        "Overlay template unavailable at {}: {}",
                        self.template_path,
                        e
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Score `overlay` against the reference template. The overlay must
    /// already carry the 180° correction.
    pub fn classify(&self, overlay: &RgbaImage) -> ClassificationResult {
        let Some(template) = self.template() else {
            return ClassificationResult {
                is_standard_template: false,
                similarity_score: 0.0,
            };
        };

        // The alpha channel matters for rendering, not for matching.
        let mut rgb = DynamicImage::ImageRgba8(overlay.clone()).to_rgb8();
        if rgb.dimensions() != (OVERLAY_WIDTH, OVERLAY_HEIGHT) {
            rgb = imageops::resize(
                &rgb,
                OVERLAY_WIDTH,
                OVERLAY_HEIGHT,
                imageops::FilterType::Triangle,
            );
        }

        let score = normalized_cross_correlation(&rgb, template);
        tracing::debug!(
            "Template match score {:.4} (threshold {})",
            score,
            MATCH_THRESHOLD
        );
        ClassificationResult {
            is_standard_template: score > MATCH_THRESHOLD,
            similarity_score: score,
        }
    }

    pub fn is_standard_template(&self, overlay: &RgbaImage) -> bool {
        self.classify(overlay).is_standard_template
    }
}

/// Zero-mean normalized cross-correlation over two equal-size RGB images.
/// 1.0 is a perfect match; uniform images score 0 (no structure to match).
fn normalized_cross_correlation(a: &RgbImage, b: &RgbImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let n = a.as_raw().len() as f64;
    let mean_a = a.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.as_raw().iter().zip(b.as_raw()) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        numerator += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denominator = (var_a * var_b).sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use image::Rgba;
    use tempfile::TempDir;

    /// Overlay-sized RGBA image with a simple gradient so correlation has
    /// structure to latch onto.
    fn gradient_overlay() -> RgbaImage {
        RgbaImage::from_fn(OVERLAY_WIDTH, OVERLAY_HEIGHT, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    fn write_template(dir: &Utf8PathBuf, img: &RgbaImage) -> Utf8PathBuf {
        let path = dir.join("overlay_template.png");
        img.save(path.as_std_path()).unwrap();
        path
    }

    #[test]
    fn test_missing_template_is_never_standard() {
        let classifier =
            TemplateClassifier::new(Utf8PathBuf::from("/nonexistent/overlay_template.png"));
        let result = classifier.classify(&gradient_overlay());
        assert!(!result.is_standard_template);
        assert_eq!(result.similarity_score, 0.0);
    }

    #[test]
    fn test_identical_overlay_matches() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let overlay = gradient_overlay();
        let template_path = write_template(&dir, &overlay);

        let classifier = TemplateClassifier::new(template_path);
        let result = classifier.classify(&overlay);
        assert!(result.is_standard_template);
        assert!(result.similarity_score > 0.99);
    }

    #[test]
    fn test_inverted_overlay_does_not_match() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let template_path = write_template(&dir, &gradient_overlay());

        let mut inverted = gradient_overlay();
        for pixel in inverted.pixels_mut() {
            pixel.0[0] = 255 - pixel.0[0];
            pixel.0[1] = 255 - pixel.0[1];
            pixel.0[2] = 255 - pixel.0[2];
        }

        let classifier = TemplateClassifier::new(template_path);
        let result = classifier.classify(&inverted);
        assert!(!result.is_standard_template);
        assert!(result.similarity_score < MATCH_THRESHOLD);
    }

    #[test]
    fn test_uniform_images_score_zero() {
        let flat_a = RgbImage::from_pixel(4, 4, image::Rgb([100, 100, 100]));
        let flat_b = RgbImage::from_pixel(4, 4, image::Rgb([200, 200, 200]));
        assert_eq!(normalized_cross_correlation(&flat_a, &flat_b), 0.0);
    }

    #[test]
    fn test_template_loaded_once() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let overlay = gradient_overlay();
        let template_path = write_template(&dir, &overlay);

        let classifier = TemplateClassifier::new(template_path.clone());
        assert!(classifier.classify(&overlay).is_standard_template);

        // Deleting the file no longer affects the cached template.
        std::fs::remove_file(template_path.as_std_path()).unwrap();
        assert!(classifier.classify(&overlay).is_standard_template);
    }
}
