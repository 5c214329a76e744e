use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::errors::DecodeError;

/// A decoded camera frame.
///
/// Cloning is cheap: the pixel buffer and the encoded bytes are shared.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    encoded: Bytes,
}

impl Frame {
    pub fn new(image: RgbImage, encoded: Bytes) -> Self {
        Self {
            image: Arc::new(image),
            encoded,
        }
    }

    /// Wrap an in-memory image, encoding it as PNG for detectors that need bytes.
    pub fn from_image(image: RgbImage) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        Ok(Self::new(image, Bytes::from(cursor.into_inner())))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Shared handle to the pixels, for moving onto a blocking thread.
    pub fn image_arc(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    /// The compressed bytes the frame was decoded from.
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Turns an inbound frame payload into a [`Frame`].
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &str) -> Result<Frame, DecodeError>;
}

/// Read access to a session's most recently cached frame.
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<Frame>;
}

/// Decodes base64 JPEG/PNG payloads. Accepts bare base64 or a `data:` URL.
#[derive(Clone, Copy, Debug, Default)]
pub struct Base64FrameDecoder;

impl FrameDecoder for Base64FrameDecoder {
    fn decode(&self, payload: &str) -> Result<Frame, DecodeError> {
        let data = match payload.split_once(',') {
            Some((header, rest)) if header.starts_with("data:") => rest,
            _ => payload,
        };
        let data = data.trim();
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let bytes = STANDARD
            .decode(data)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| DecodeError::Image(e.to_string()))?
            .to_rgb8();

        Ok(Frame::new(image, Bytes::from(bytes)))
    }
}

/// Encode an image as a base64 PNG payload, the same shape clients send.
pub fn encode_payload(image: &RgbImage) -> Result<String, DecodeError> {
    let frame = Frame::from_image(image.clone())?;
    Ok(STANDARD.encode(frame.encoded()))
}
