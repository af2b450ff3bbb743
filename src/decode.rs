use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::{DecodeError, Result};

/// A decoded avatar together with the bytes it was decoded from.
///
/// Cloning is cheap; both halves are shared. The encoded bytes are what
/// the disk cache persists, the pixels are what a display surface draws.
#[derive(Clone)]
pub struct AvatarImage {
    encoded: Arc<[u8]>,
    pixels: Arc<DynamicImage>,
}

impl AvatarImage {
    pub fn new(encoded: Vec<u8>, pixels: DynamicImage) -> Self {
        Self {
            encoded: encoded.into(),
            pixels: Arc::new(pixels),
        }
    }

    /// Wraps already decoded pixels, encoding them as PNG so the image can
    /// be cached like a downloaded one.
    pub fn from_pixels(pixels: DynamicImage) -> Result<Self> {
        let mut encoded = Vec::new();
        pixels.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;
        Ok(Self::new(encoded, pixels))
    }

    /// Decodes an image file from disk, e.g. a bundled placeholder.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded = std::fs::read(path.as_ref())?;
        Ok(ImageCrateDecoder.decode(&encoded)?)
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Memory accounted to this image by the caches.
    pub fn byte_len(&self) -> usize {
        self.encoded.len()
    }
}

impl PartialEq for AvatarImage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.encoded, &other.encoded)
            || self.encoded == other.encoded
    }
}

impl Eq for AvatarImage {}

impl fmt::Debug for AvatarImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("encoded_bytes", &self.encoded.len())
            .finish()
    }
}

/// Turns a response body into an image.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<AvatarImage, DecodeError>;
}

/// Decoder backed by the `image` crate; the format is sniffed from the
/// payload, not taken from any content type header.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<AvatarImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError("empty payload".to_owned()));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError(e.to_string()))?;
        if reader.format().is_none() {
            return Err(DecodeError("unrecognized image format".to_owned()));
        }

        let pixels = reader.decode()?;
        log::trace!(
            "Decoded {}x{} avatar from {} bytes",
            pixels.width(),
            pixels.height(),
            bytes.len()
        );
        Ok(AvatarImage::new(bytes.to_vec(), pixels))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// A tiny single-colour PNG, distinct per `shade`.
    pub(crate) fn png_bytes(shade: u8) -> Vec<u8> {
        let pixels = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            2,
            2,
            Rgba([shade, 0, 255 - shade, 255]),
        ));
        let mut encoded = Vec::new();
        pixels
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();
        encoded
    }

    #[test]
    fn decodes_png() {
        let bytes = png_bytes(10);
        let image = ImageCrateDecoder.decode(&bytes).unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
        assert_eq!(image.encoded(), bytes.as_slice());
        assert_eq!(image.byte_len(), bytes.len());
    }

    #[test]
    fn rejects_html_error_page() {
        let err = ImageCrateDecoder
            .decode(b"<html><body>Not Found</body></html>")
            .unwrap_err();
        assert_eq!(err, DecodeError("unrecognized image format".to_owned()));
    }

    #[test]
    fn rejects_empty_and_truncated_payloads() {
        assert!(ImageCrateDecoder.decode(&[]).is_err());

        let bytes = png_bytes(20);
        assert!(ImageCrateDecoder.decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn equality_follows_encoded_bytes() {
        let a = ImageCrateDecoder.decode(&png_bytes(1)).unwrap();
        let b = ImageCrateDecoder.decode(&png_bytes(1)).unwrap();
        let c = ImageCrateDecoder.decode(&png_bytes(2)).unwrap();
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn from_pixels_round_trips_through_decoder() {
        let pixels = DynamicImage::ImageRgba8(RgbaImage::new(3, 1));
        let image = AvatarImage::from_pixels(pixels).unwrap();
        let again = ImageCrateDecoder.decode(image.encoded()).unwrap();
        assert_eq!((again.width(), again.height()), (3, 1));
    }
}
