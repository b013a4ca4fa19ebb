//! Image decoding.
//!
//! Asset bytes arrive as opaque encoded buffers (PNG or JPEG). They are
//! decoded here to tightly packed RGBA8, the layout
//! [`TransferContext::upload_image`] expects.

use std::path::Path;

use tracing::debug;

use strand_rhi::image::Texture;
use strand_rhi::transfer::TransferContext;
use strand_rhi::{Shared, vk};

use crate::error::{ResourceError, ResourceResult};

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Row-major, 4 bytes per pixel.
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Uploads the pixels into a new sampled texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    pub fn upload(
        &self,
        transfer: &mut TransferContext,
        format: vk::Format,
    ) -> ResourceResult<Shared<Texture>> {
        Ok(transfer.upload_image(&self.pixels, self.extent(), format)?)
    }
}

/// Decodes an encoded image to RGBA8. The format is guessed from the data.
///
/// # Errors
///
/// Returns [`ResourceError::Image`] for unsupported or corrupt data.
pub fn decode_rgba8(bytes: &[u8]) -> ResourceResult<DecodedImage> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    debug!("Decoded {}x{} image ({} bytes encoded)", width, height, bytes.len());
    Ok(DecodedImage {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Reads and decodes an image file.
///
/// # Errors
///
/// - [`ResourceError::FileNotFound`] if `path` does not exist
/// - [`ResourceError::Io`] if it cannot be read
/// - [`ResourceError::Image`] if it cannot be decoded
pub fn load_rgba8(path: impl AsRef<Path>) -> ResourceResult<DecodedImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }
    decode_rgba8(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([x as u8, y as u8, 0x80, 0xff])
        });
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let decoded = decode_rgba8(&encode_png(3, 2)).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        // Pixel (2, 1)
        let offset = (3 + 2) * 4;
        assert_eq!(&decoded.pixels[offset..offset + 4], &[2, 1, 0x80, 0xff]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_rgba8(b"definitely not an image"),
            Err(ResourceError::Image(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_rgba8("does/not/exist.png"),
            Err(ResourceError::FileNotFound(_))
        ));
    }
}
