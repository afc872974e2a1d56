//! Still-image side channel.
//!
//! [`ImageCapture`] holds at most one current [`ImagePayload`], produced either
//! by snapshotting a camera frame or by accepting an uploaded file. A new
//! acquisition replaces the previous payload wholesale; nothing is queued.

mod vision;

pub use vision::{
    DEFAULT_OPENAI_BASE_URL, DEFAULT_VISION_MODEL, EMPTY_DESCRIPTION, FALLBACK_DESCRIPTION,
    OpenAIVision, OpenAIVisionConfig, VisionDescriber, VisionRequestError, describe_or_fallback,
};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::debug;

/// JPEG quality used for camera snapshots.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 80;

/// Failure to turn a frame or file into an [`ImagePayload`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("Frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Could not decode image: {0}")]
    Undecodable(String),

    #[error("Could not encode image: {0}")]
    Encode(String),
}

/// A raw camera frame, packed 8-bit RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self { width, height, rgb }
    }
}

/// Encoded still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: Bytes,
    pub mime_type: &'static str,
}

impl ImagePayload {
    /// `data:` URL with the payload base64 encoded.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.data))
    }
}

/// Formats accepted for uploaded images.
const ACCEPTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
];

/// Holder of the single current image.
#[derive(Debug, Default)]
pub struct ImageCapture {
    current: Option<ImagePayload>,
}

impl ImageCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a camera frame as JPEG and make it current.
    pub fn from_camera(&mut self, frame: &VideoFrame) -> Result<&ImagePayload, ImageError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.width == 0 || frame.height == 0 || frame.rgb.len() != expected {
            return Err(ImageError::InvalidFrame {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.rgb.len(),
            });
        }

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, SNAPSHOT_JPEG_QUALITY)
            .encode(
                &frame.rgb,
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| ImageError::Encode(e.to_string()))?;

        debug!(
            width = frame.width,
            height = frame.height,
            bytes = out.len(),
            "Captured camera snapshot"
        );
        Ok(self.replace(ImagePayload {
            data: Bytes::from(out),
            mime_type: ImageFormat::Jpeg.to_mime_type(),
        }))
    }

    /// Accept an uploaded image file and make it current.
    ///
    /// The bytes are passed through unchanged; they are only decoded to
    /// reject files that are not actually images.
    pub fn from_file(&mut self, bytes: impl Into<Bytes>) -> Result<&ImagePayload, ImageError> {
        let data: Bytes = bytes.into();
        let format =
            image::guess_format(&data).map_err(|e| ImageError::UnsupportedFormat(e.to_string()))?;
        if !ACCEPTED_FORMATS.contains(&format) {
            return Err(ImageError::UnsupportedFormat(format!("{format:?}")));
        }
        image::load_from_memory_with_format(&data, format)
            .map_err(|e| ImageError::Undecodable(e.to_string()))?;

        debug!(mime_type = format.to_mime_type(), bytes = data.len(), "Loaded image file");
        Ok(self.replace(ImagePayload {
            data,
            mime_type: format.to_mime_type(),
        }))
    }

    fn replace(&mut self, payload: ImagePayload) -> &ImagePayload {
        self.current.insert(payload)
    }

    pub fn current(&self) -> Option<&ImagePayload> {
        self.current.as_ref()
    }

    pub fn take(&mut self) -> Option<ImagePayload> {
        self.current.take()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
