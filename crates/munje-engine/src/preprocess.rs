//! Client-side image shrinking before upload.
//!
//! Photos straight from a phone camera are several megabytes; the model only
//! needs enough resolution to read printed math. Images are scaled so the
//! longer edge fits `max_edge`, flattened onto white, and re-encoded as JPEG.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_MAX_EDGE: u32 = 768;
pub const DEFAULT_QUALITY: f32 = 0.8;
pub const COMPRESSED_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Size of the image the user picked, before any compression.
    pub original_size: usize,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let original_size = bytes.len();
        Self {
            bytes,
            mime_type: mime_type.into(),
            original_size,
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::new(bytes, guess_image_mime(path)))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// First 8 bytes of the SHA-256 of the payload, hex encoded. Used to
    /// identify an upload in logs without logging its content.
    pub fn digest(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..8])
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_edge: u32,
    /// Lossy quality in (0, 1].
    pub quality: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            quality: DEFAULT_QUALITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode compressed image: {0}")]
    Encode(String),
}

/// Returns the target size for an image whose longer edge must not exceed
/// `max_edge`. Images already within bounds keep their size.
pub fn scaled_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }
    let scale = |short: u32, long: u32| -> u32 {
        let scaled = (f64::from(short) / f64::from(long) * f64::from(max_edge)).round();
        (scaled as u32).clamp(1, max_edge)
    };
    if width >= height {
        (max_edge, scale(height, width))
    } else {
        (scale(width, height), max_edge)
    }
}

pub fn compress_image(
    payload: &ImagePayload,
    options: CompressOptions,
) -> Result<ImagePayload, PreprocessError> {
    let quality = jpeg_quality(options.quality)?;
    let image = decode_upright(&payload.bytes)?;

    let (width, height) = scaled_dimensions(image.width(), image.height(), options.max_edge);
    let image = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    };

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(&flatten_onto_white(&image))
        .map_err(|err| PreprocessError::Encode(err.to_string()))?;

    Ok(ImagePayload {
        bytes,
        mime_type: COMPRESSED_MIME.to_string(),
        original_size: payload.original_size,
    })
}

/// Compresses `payload`, or hands it back untouched when compression fails.
pub fn compress_or_original(payload: ImagePayload, options: CompressOptions) -> ImagePayload {
    match compress_image(&payload, options) {
        Ok(compressed) => {
            info!(
                original_kb = format_args!("{:.1}", kib(compressed.original_size)),
                compressed_kb = format_args!("{:.1}", kib(compressed.len())),
                reduction_pct = reduction_percent(compressed.original_size, compressed.len()),
                "image compressed"
            );
            compressed
        }
        Err(err) => {
            warn!(error = %err, "image compression failed; uploading original");
            payload
        }
    }
}

/// Percentage saved going from `original` to `compressed` bytes, rounded.
/// Negative when the output grew.
pub fn reduction_percent(original: usize, compressed: usize) -> i64 {
    if original == 0 {
        return 0;
    }
    ((1.0 - compressed as f64 / original as f64) * 100.0).round() as i64
}

pub fn kib(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}

fn jpeg_quality(quality: f32) -> Result<u8, PreprocessError> {
    if !(quality > 0.0 && quality <= 1.0) {
        return Err(PreprocessError::Encode(format!(
            "quality {quality} is outside (0, 1]"
        )));
    }
    Ok(((quality * 100.0).round() as u8).clamp(1, 100))
}

/// Decodes and applies the EXIF orientation tag, so phone photos stored
/// sideways come out the way they were taken.
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| PreprocessError::Decode(ImageError::IoError(err)))?
        .into_decoder()
        .map_err(PreprocessError::Decode)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(PreprocessError::Decode)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

pub fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
