//! Name-plate text extraction via an external recognition engine.
//!
//! The standard template prints the subject name in a fixed region. That
//! region is cropped, flattened onto an opaque black background (some
//! overlay variants carry the glyphs mainly in the alpha channel) and handed
//! to the `tesseract` CLI. Engine discovery happens once per process;
//! recognition failures surface as `None`, never as errors.

use crate::services::transcoder::find_tool;
use camino::{Utf8Path, Utf8PathBuf};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;

/// Name-plate region on the standard 360x640 template, post-rotation:
/// x in [70, 300), y in [415, 460).
const TEXT_REGION_X: u32 = 70;
const TEXT_REGION_Y: u32 = 415;
const TEXT_REGION_WIDTH: u32 = 230;
const TEXT_REGION_HEIGHT: u32 = 45;

const OCR_BINARY: &str = "tesseract";
const OCR_LANGUAGE: &str = "eng";

/// Handle to the external recognition engine.
pub struct OcrEngine {
    binary: Utf8PathBuf,
    language: String,
}

impl OcrEngine {
    fn discover(language: &str) -> Option<Self> {
        let binary = find_tool(OCR_BINARY)?;
        tracing::info!("Text recognition engine at {}", binary);
        Some(Self {
            binary,
            language: language.to_string(),
        })
    }

    /// Run recognition on an image file, returning the non-empty line
    /// fragments in order.
    pub async fn recognize(&self, image_path: &Utf8Path) -> std::io::Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .args([image_path.as_str(), "stdout", "-l", &self.language, "--psm", "7"])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(std::io::Error::other(format!(
                "Recognition engine exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.chars().take(200).collect::<String>()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Extracts printed text from overlay images.
pub struct TextExtractor {
    /// Engine construction is expensive; discovered once per extractor,
    /// which in turn lives for the process.
    engine: OnceLock<Option<OcrEngine>>,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self {
            engine: OnceLock::new(),
        }
    }

    fn engine(&self) -> Option<&OcrEngine> {
        self.engine
            .get_or_init(|| {
                let engine = OcrEngine::discover(OCR_LANGUAGE);
                if engine.is_none() {
                    tracing::warn!("Recognition engine not found; text extraction disabled");
                }
                engine
            })
            .as_ref()
    }

    /// Extract the name-plate text from an overlay that already carries the
    /// 180° correction. `None` when nothing is recognized or the engine is
    /// unavailable; engine failures are swallowed by design.
    pub async fn extract_text(&self, overlay: &RgbaImage) -> Option<String> {
        let engine = self.engine()?;

        let plate = composite_on_black(&crop_text_region(overlay));

        // The engine wants a file path; stage the crop in a scratch PNG.
        let scratch = match tempfile::Builder::new()
            .prefix("epmigrate-ocr-")
            .suffix(".png")
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Could not create scratch image: {}", e);
                return None;
            }
        };
        let scratch_path = Utf8Path::from_path(scratch.path())?;
        if let Err(e) = crate::services::raw_image::write_png(
            scratch_path,
            &DynamicImage::ImageRgb8(plate),
        ) {
            tracing::warn!("Could not write scratch image: {}", e);
            return None;
        }

        match engine.recognize(scratch_path).await {
            Ok(fragments) => {
                let text = fragments.concat().trim().to_string();
                if text.is_empty() {
                    tracing::debug!("No text recognized on the name plate");
                    None
                } else {
                    tracing::info!("Recognized text: {:?}", text);
                    Some(text)
                }
            }
            Err(e) => {
                tracing::warn!("Text recognition failed: {}", e);
                None
            }
        }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Crop the fixed name-plate region; clamped at the image edge for
/// undersized overlays.
pub(crate) fn crop_text_region(overlay: &RgbaImage) -> RgbaImage {
    image::imageops::crop_imm(
        overlay,
        TEXT_REGION_X,
        TEXT_REGION_Y,
        TEXT_REGION_WIDTH,
        TEXT_REGION_HEIGHT,
    )
    .to_image()
}

/// Flatten onto an opaque black background to normalize contrast for the
/// recognizer.
pub(crate) fn composite_on_black(crop: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(crop.width(), crop.height());
    for (x, y, pixel) in crop.enumerate_pixels() {
        let alpha = pixel.0[3] as u16;
        out.put_pixel(
            x,
            y,
            image::Rgb([
                ((pixel.0[0] as u16 * alpha) / 255) as u8,
                ((pixel.0[1] as u16 * alpha) / 255) as u8,
                ((pixel.0[2] as u16 * alpha) / 255) as u8,
            ]),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_crop_region_geometry() {
        let overlay = RgbaImage::from_pixel(360, 640, Rgba([1, 2, 3, 255]));
        let crop = crop_text_region(&overlay);
        assert_eq!(crop.dimensions(), (230, 45));
    }

    #[test]
    fn test_crop_picks_the_name_plate_pixels() {
        let mut overlay = RgbaImage::from_pixel(360, 640, Rgba([0, 0, 0, 255]));
        overlay.put_pixel(70, 415, Rgba([255, 255, 255, 255]));
        overlay.put_pixel(299, 459, Rgba([128, 128, 128, 255]));

        let crop = crop_text_region(&overlay);
        assert_eq!(crop.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(crop.get_pixel(229, 44).0, [128, 128, 128, 255]);
    }

    #[test]
    fn test_composite_flattens_alpha() {
        let mut crop = RgbaImage::new(2, 1);
        // Fully transparent white disappears into the background.
        crop.put_pixel(0, 0, Rgba([255, 255, 255, 0]));
        // Half-transparent white dims by half.
        crop.put_pixel(1, 0, Rgba([255, 255, 255, 128]));

        let flat = composite_on_black(&crop);
        assert_eq!(flat.get_pixel(0, 0).0, [0, 0, 0]);
        let half = flat.get_pixel(1, 0).0;
        assert!(half[0] > 120 && half[0] < 135);
    }

    #[test]
    fn test_composite_keeps_opaque_pixels() {
        let crop = RgbaImage::from_pixel(3, 3, Rgba([10, 200, 30, 255]));
        let flat = composite_on_black(&crop);
        assert_eq!(flat.get_pixel(1, 1).0, [10, 200, 30]);
    }
}
