//! Media device abstractions (microphone and camera acquisition).
//!
//! These traits decouple the session from any specific capture backend.
//! Acquisition is asynchronous because on real hardware it may wait on a
//! permission prompt; once opened, a stream is exclusively owned by the
//! session that requested it and must be released exactly once (release is
//! idempotent on every implementation).

use async_trait::async_trait;
use thiserror::Error;

use crate::core::image::VideoFrame;

/// Failure to acquire or use a media device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    /// The user or platform refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No such device, or the device disappeared.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Constraints requested when opening the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrophoneRequest {
    /// Preferred capture sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred channel count.
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for MicrophoneRequest {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A live microphone stream producing interleaved 16-bit PCM.
pub trait MicrophoneStream: Send {
    /// Actual capture sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Actual channel count.
    fn channels(&self) -> u16;

    /// Read up to `max_frames` frames of interleaved samples.
    ///
    /// Returns an empty vector when nothing is available yet and `None` once
    /// the device is gone.
    fn read(&mut self, max_frames: usize) -> Option<Vec<i16>>;

    /// Release the underlying hardware. Idempotent.
    fn release(&mut self);
}

/// A live camera stream.
pub trait CameraStream: Send {
    /// Snapshot the current frame.
    fn grab_frame(&mut self) -> Result<VideoFrame, MediaAccessError>;

    /// Release the underlying hardware. Idempotent.
    fn release(&mut self);
}

/// Source of microphone and camera streams.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the microphone.
    async fn open_microphone(
        &self,
        request: MicrophoneRequest,
    ) -> Result<Box<dyn MicrophoneStream>, MediaAccessError>;

    /// Open the camera.
    async fn open_camera(&self) -> Result<Box<dyn CameraStream>, MediaAccessError>;
}
