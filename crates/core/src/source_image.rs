//! Uploaded source images.
//!
//! Uploads are decoded once up front so that unreadable files are rejected
//! as client errors before any graph is built. The decoded image is then
//! re-encoded as PNG and base64 text for embedding in the job graph, since
//! the graph travels as a single JSON message.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};

use crate::error::CoreError;

/// Content type used when the output format cannot be detected.
pub const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/png";

/// A decoded, validated upload.
#[derive(Debug, Clone)]
pub struct SourceImage {
    image: DynamicImage,
}

impl SourceImage {
    /// Decode raw upload bytes, sniffing the container format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.is_empty() {
            return Err(CoreError::InvalidImage("image file is empty".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| CoreError::InvalidImage(format!("could not decode image: {e}")))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(CoreError::InvalidImage("image has zero area".to_string()));
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Lossless PNG encoding of the decoded image.
    pub fn to_png(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| CoreError::Internal(format!("PNG encoding failed: {e}")))?;
        Ok(buf.into_inner())
    }

    /// PNG bytes as standard base64 text.
    pub fn to_base64_png(&self) -> Result<String, CoreError> {
        Ok(STANDARD.encode(self.to_png()?))
    }
}

impl From<DynamicImage> for SourceImage {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Best-effort MIME type for an encoded image buffer.
pub fn content_type_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => DEFAULT_IMAGE_CONTENT_TYPE,
    }
}

/// Round `value` down to a multiple of 8, never below 8.
///
/// Latent-space nodes operate on 8-pixel blocks.
pub fn floor_to_multiple_of_8(value: u32) -> u32 {
    (value / 8 * 8).max(8)
}

/// Scale `(width, height)` so the longer side equals `long_side`, keeping
/// the aspect ratio and rounding both sides to multiples of 8.
pub fn fit_long_side(width: u32, height: u32, long_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f64;
    let scale = long_side as f64 / longest;
    let w = (width as f64 * scale).round() as u32;
    let h = (height as f64 * scale).round() as u32;
    (floor_to_multiple_of_8(w), floor_to_multiple_of_8(h))
}
