//! Still-frame capture: sample the current camera frame and encode it as PNG.

use crate::camera::{CameraError, CameraHandle};
use crate::frame::{self, Frame, PixelLayout};
use image::{ImageFormat, ImageReader, Limits, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Smallest frame edge (pixels) a capture will accept. Devices report tiny
/// placeholder sizes while the stream is still starting.
pub const MIN_FRAME_DIMENSION: u32 = 50;

/// Largest encoded file accepted by [`CapturedImage::from_encoded`].
pub const MAX_ENCODED_BYTES: usize = 32 * 1024 * 1024;

/// Largest edge accepted by [`CapturedImage::from_encoded`]; checked from the
/// header before any pixel buffer is allocated.
pub const MAX_IMAGE_EDGE: u32 = 8192;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera is not ready")]
    NotReady,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("not a usable image: {0}")]
    InvalidImage(String),
}

/// A still image serialized for transport.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl CapturedImage {
    /// Wrap an already-encoded image (e.g. a file the user picked).
    ///
    /// The bytes are decoded once to validate them and read the dimensions.
    /// Oversized files and images are refused before decoding.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        if bytes.len() > MAX_ENCODED_BYTES {
            return Err(CaptureError::InvalidImage(format!(
                "file is {} bytes, limit is {MAX_ENCODED_BYTES}",
                bytes.len()
            )));
        }

        let mut reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| CaptureError::InvalidImage(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| CaptureError::InvalidImage("unrecognized image format".into()))?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_IMAGE_EDGE);
        limits.max_image_height = Some(MAX_IMAGE_EDGE);
        reader.limits(limits);

        let decoded = reader
            .decode()
            .map_err(|e| CaptureError::InvalidImage(e.to_string()))?;

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            format,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// MIME type for upload, e.g. `image/png`.
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Conventional file extension, e.g. `png`.
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Sample the current frame of a ready camera and encode it as PNG.
///
/// Fails with [`CaptureError::NotReady`] unless the handle is ready with both
/// edges at least [`MIN_FRAME_DIMENSION`]. No retries are attempted.
pub fn capture_frame(handle: &mut CameraHandle) -> Result<CapturedImage, CaptureError> {
    match handle.dimensions() {
        Some((w, h)) if w >= MIN_FRAME_DIMENSION && h >= MIN_FRAME_DIMENSION => {}
        dims => {
            tracing::debug!(?dims, state = ?handle.state(), "capture refused: camera not ready");
            return Err(CaptureError::NotReady);
        }
    }

    let frame = handle.sample()?;
    let image = encode_png(&frame)?;
    tracing::debug!(
        seq = frame.sequence,
        width = image.width,
        height = image.height,
        bytes = image.bytes.len(),
        "frame captured"
    );
    Ok(image)
}

/// Encode a raw frame as PNG.
pub fn encode_png(frame: &Frame) -> Result<CapturedImage, CaptureError> {
    let rgb = match frame.layout {
        PixelLayout::Rgb8 => {
            if frame.data.len() < frame.expected_len() {
                return Err(CaptureError::Encode(format!(
                    "RGB buffer too short: expected {}, got {}",
                    frame.expected_len(),
                    frame.data.len()
                )));
            }
            frame.data[..frame.expected_len()].to_vec()
        }
        PixelLayout::Luma8 => frame::luma_to_rgb(&frame.data, frame.width, frame.height)
            .map_err(|e| CaptureError::Encode(e.to_string()))?,
    };

    let img = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| CaptureError::Encode("frame buffer does not match dimensions".into()))?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(CapturedImage {
        bytes: out.into_inner(),
        format: ImageFormat::Png,
        width: frame.width,
        height: frame.height,
    })
}
