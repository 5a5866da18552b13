//! The encoded result of a capture.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

use super::CaptureError;

/// A PNG-encoded still image plus its pixel dimensions.
///
/// Immutable once created. The byte buffer is shared, so cloning a message
/// history that carries the image does not copy the pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    png: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl CapturedImage {
    /// Encode an in-memory image as PNG. No resizing, no color conversion.
    pub fn encode(image: &DynamicImage) -> Result<Self, CaptureError> {
        let mut png_bytes: Vec<u8> = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .map_err(|e| CaptureError::Encoding(e.to_string()))?;

        Ok(Self {
            png: png_bytes.into(),
            width: image.width(),
            height: image.height(),
        })
    }

    /// Wrap already-encoded PNG bytes, reading the dimensions from the header.
    pub fn from_png(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| CaptureError::Encoding(e.to_string()))?;
        Ok(Self {
            png: bytes.into(),
            width: decoded.width(),
            height: decoded.height(),
        })
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `data:` URL form expected by vision chat endpoints.
    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_len", &self.png.len())
            .finish()
    }
}
