//! Image encoding: `DynamicImage` → bytes in the configured wire format.
//!
//! Multimodal chat APIs accept images as base64 data-URLs embedded in the
//! JSON request body. Encoding is a pure transform: the same image and
//! encoding always produce the same bytes, so retries resend an identical
//! payload.

use crate::config::ImageEncoding;
use crate::error::EncodingError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// One image serialised for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    encoding: ImageEncoding,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>` as expected by `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }
}

/// Serialises images in a fixed [`ImageEncoding`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEncoder {
    encoding: ImageEncoding,
}

impl ImageEncoder {
    pub fn new(encoding: ImageEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    /// Encode a single image. `index` only labels errors and logs.
    pub fn encode(&self, index: usize, img: &DynamicImage) -> Result<EncodedImage, EncodingError> {
        let mut buf = Vec::new();

        // JPEG has no alpha channel; flatten first instead of failing on RGBA input.
        let result = match self.encoding {
            ImageEncoding::Jpeg if img.color().has_alpha() => DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut Cursor::new(&mut buf), self.encoding.image_format()),
            _ => img.write_to(&mut Cursor::new(&mut buf), self.encoding.image_format()),
        };

        result.map_err(|e| EncodingError {
            index,
            format: self.encoding.name(),
            detail: e.to_string(),
        })?;

        debug!(
            "Encoded image {} ({}x{}) → {} bytes {}",
            index,
            img.width(),
            img.height(),
            buf.len(),
            self.encoding.name()
        );

        Ok(EncodedImage {
            encoding: self.encoding,
            bytes: buf,
        })
    }

    /// Encode every image, preserving order. Fails on the first bad image.
    pub fn encode_all(&self, images: &[DynamicImage]) -> Result<Vec<EncodedImage>, EncodingError> {
        images
            .iter()
            .enumerate()
            .map(|(i, img)| self.encode(i, img))
            .collect()
    }
}
