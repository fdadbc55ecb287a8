//! Raw pixel-buffer decoding and geometric transforms.
//!
//! Legacy bundles store images as flat BGRA buffers with no header. Geometry
//! is implied by the filename role (logo vs overlay); when the byte count
//! disagrees with the expected spec, a fixed table of known geometries and a
//! square fallback are probed before giving up.

use crate::services::transcoder::FfmpegTools;
use camino::Utf8Path;
use image::{DynamicImage, RgbaImage, imageops};
use std::fs;
use thiserror::Error;

pub const BYTES_PER_PIXEL: usize = 4;

/// Output icon geometry (device limit).
pub const ICON_SIZE: (u32, u32) = (50, 50);

/// Square crop of a video frame starts this far from the top, past the
/// letterboxing.
const FRAME_CROP_TOP: u32 = 100;

/// Maximum edge of the square frame crop.
const FRAME_CROP_EDGE: u32 = 360;

/// Geometries probed when a raw buffer does not match its expected spec.
const KNOWN_GEOMETRIES: [(u32, u32); 6] = [
    (256, 256),
    (360, 640),
    (480, 854),
    (720, 1080),
    (512, 512),
    (128, 128),
];

/// Expected geometry of a raw buffer, 4 bytes per pixel, BGRA order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawImageSpec {
    pub width: u32,
    pub height: u32,
}

impl RawImageSpec {
    pub const LOGO: RawImageSpec = RawImageSpec {
        width: 256,
        height: 256,
    };
    pub const OVERLAY: RawImageSpec = RawImageSpec {
        width: 360,
        height: 640,
    };

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

#[derive(Error, Debug)]
pub enum RawDecodeError {
    #[error("Raw buffer not found: {0}")]
    NotFound(String),

    #[error("Raw buffer of {actual} bytes matches no known geometry (expected {expected})")]
    SizeMismatch { actual: usize, expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Optional geometric corrections applied after decoding. Rotation runs
/// before the flip; both are independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTransform {
    /// Overlay buffers are stored upside-down.
    pub rotate_180: bool,
    /// Logo orientation correction.
    pub flip_vertical: bool,
    /// Shrink to this size after the orientation fixes.
    pub target_size: Option<(u32, u32)>,
}

/// Recover `(width, height)` from a bare byte count: known geometries
/// first, then an exact square.
pub fn recover_geometry(byte_len: usize) -> Option<(u32, u32)> {
    if byte_len == 0 || byte_len % BYTES_PER_PIXEL != 0 {
        return None;
    }
    let pixels = byte_len / BYTES_PER_PIXEL;
    for (w, h) in KNOWN_GEOMETRIES {
        if w as usize * h as usize == pixels {
            return Some((w, h));
        }
    }
    let side = (pixels as f64).sqrt() as usize;
    for candidate in [side, side + 1] {
        if candidate * candidate == pixels {
            return Some((candidate as u32, candidate as u32));
        }
    }
    None
}

/// Read and decode a raw BGRA buffer into an RGBA image, recovering the
/// geometry if the byte count does not match `spec`.
pub fn decode_raw(path: &Utf8Path, spec: RawImageSpec) -> Result<RgbaImage, RawDecodeError> {
    if !path.is_file() {
        return Err(RawDecodeError::NotFound(path.to_string()));
    }
    let mut data = fs::read(path)?;

    let (width, height) = if data.len() == spec.byte_len() {
        (spec.width, spec.height)
    } else {
        tracing::warn!(
            "Raw buffer {} is {} bytes, expected {}; probing known geometries",
            path,
            data.len(),
            spec.byte_len()
        );
        let recovered = recover_geometry(data.len()).ok_or(RawDecodeError::SizeMismatch {
            actual: data.len(),
            expected: spec.byte_len(),
        })?;
        tracing::info!("Recovered geometry {}x{} for {}", recovered.0, recovered.1, path);
        recovered
    };

    // Stored order is BGRA; swap to the RGBA the image stack expects.
    for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
        pixel.swap(0, 2);
    }

    RgbaImage::from_raw(width, height, data).ok_or(RawDecodeError::SizeMismatch {
        actual: width as usize * height as usize * BYTES_PER_PIXEL,
        expected: spec.byte_len(),
    })
}

/// Decode a raw buffer, apply the requested transforms and write the result
/// to `dst` as PNG.
pub fn decode_and_transform(
    src: &Utf8Path,
    spec: RawImageSpec,
    transform: RawTransform,
    dst: &Utf8Path,
) -> Result<(), RawDecodeError> {
    let mut img = decode_raw(src, spec)?;

    if transform.rotate_180 {
        img = imageops::rotate180(&img);
    }
    if transform.flip_vertical {
        imageops::flip_vertical_in_place(&mut img);
    }
    let img = match transform.target_size {
        Some((w, h)) => {
            let resized = imageops::resize(&img, w, h, imageops::FilterType::Triangle);
            tracing::debug!("Resized {} to {}x{}", src, w, h);
            resized
        }
        None => img,
    };

    write_png(dst, &DynamicImage::ImageRgba8(img))?;
    tracing::info!("Converted raw buffer {} -> {}", src, dst);
    Ok(())
}

/// Derive the icon from the first frame of a legacy video: undo the 180°
/// storage rotation, crop the letterboxed square, shrink to the icon size.
/// Returns false instead of erroring so callers can try another icon source.
pub async fn first_frame_icon(tools: &FfmpegTools, video: &Utf8Path, dst: &Utf8Path) -> bool {
    let png = match tools.extract_first_frame(video).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Could not read first frame of {}: {}", video, e);
            return false;
        }
    };
    let frame = match image::load_from_memory(&png) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Could not decode extracted frame of {}: {}", video, e);
            return false;
        }
    };

    let frame = frame.rotate180();
    let edge = frame.width().min(FRAME_CROP_EDGE);
    let frame = frame.crop_imm(0, FRAME_CROP_TOP, edge, edge);
    let frame = frame.resize_exact(ICON_SIZE.0, ICON_SIZE.1, imageops::FilterType::Triangle);

    match write_png(dst, &frame) {
        Ok(()) => {
            tracing::info!("Derived icon from {} -> {}", video, dst);
            true
        }
        Err(e) => {
            tracing::warn!("Could not write icon {}: {}", dst, e);
            false
        }
    }
}

/// Encode to PNG in memory, then write the bytes. Destination paths may be
/// in any script; nothing here assumes ASCII.
pub(crate) fn write_png(dst: &Utf8Path, img: &DynamicImage) -> Result<(), RawDecodeError> {
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    fs::write(dst, bytes)?;
    Ok(())
}
