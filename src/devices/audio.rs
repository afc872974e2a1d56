//! Sound card devices backed by cpal.
//!
//! A cpal stream is not `Send`, so each one lives on its own thread for as
//! long as its owner holds the [`StreamThread`] handle. Audio crosses the
//! thread boundary through a shared sample buffer.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::file::ImageFileCamera;
use crate::core::media::{
    CameraStream, MediaAccessError, MediaDevices, MicrophoneRequest, MicrophoneStream,
};
use crate::core::playback::{PlaybackSegment, PlaybackSink};

/// Captured audio kept when nobody reads it.
const MAX_BUFFERED_CAPTURE: Duration = Duration::from_secs(2);

/// How often `play` checks whether the device has consumed the segment.
const DRAIN_POLL: Duration = Duration::from_millis(10);

fn unavailable(context: &str, e: impl std::fmt::Display) -> MediaAccessError {
    MediaAccessError::DeviceUnavailable(format!("{context}: {e}"))
}

// =============================================================================
// Stream thread
// =============================================================================

/// Keeps a cpal stream alive on a dedicated thread until dropped.
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and wait for the stream to start.
    async fn spawn<T, F>(name: &str, build: F) -> Result<(Self, T), MediaAccessError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T), MediaAccessError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, info)) => {
                    if ready_tx.send(Ok(info)).is_err() {
                        return;
                    }
                    // Returns once the handle drops its sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| unavailable("audio thread", e))?;

        let info = ready_rx
            .await
            .map_err(|_| unavailable("audio thread", "exited before the stream started"))??;
        Ok((Self { stop: Some(stop_tx) }, info))
    }

    fn stop(&mut self) {
        self.stop.take();
    }
}

// =============================================================================
// Microphone
// =============================================================================

/// Downmix interleaved frames to mono 16-bit and append them, keeping at
/// most `capacity` samples.
fn push_mono<T>(buffer: &mut VecDeque<i16>, data: &[T], channels: usize, capacity: usize)
where
    T: SizedSample,
    i16: FromSample<T>,
{
    for frame in data.chunks(channels.max(1)) {
        let sum: i32 = frame.iter().map(|&s| s.to_sample::<i16>() as i32).sum();
        buffer.push_back((sum / frame.len() as i32) as i16);
    }
    let overflow = buffer.len().saturating_sub(capacity);
    buffer.drain(..overflow);
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<Mutex<VecDeque<i16>>>,
    alive: Arc<AtomicBool>,
    capacity: usize,
) -> Result<cpal::Stream, MediaAccessError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                push_mono(&mut buffer.lock(), data, channels, capacity);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    warn!("Microphone disconnected");
                    alive.store(false, Ordering::Release);
                }
                other => warn!("Microphone stream error: {other}"),
            },
            None,
        )
        .map_err(|e| unavailable("microphone stream", e))
}

/// The default input device, downmixed to mono at its native rate.
pub struct CpalMicrophone {
    buffer: Arc<Mutex<VecDeque<i16>>>,
    alive: Arc<AtomicBool>,
    thread: StreamThread,
    sample_rate: u32,
    released: bool,
}

impl CpalMicrophone {
    pub async fn open() -> Result<Self, MediaAccessError> {
        let buffer = Arc::new(Mutex::new(VecDeque::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let stream_buffer = buffer.clone();
        let stream_alive = alive.clone();
        let (thread, sample_rate) = StreamThread::spawn("microphone", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| {
                    MediaAccessError::DeviceUnavailable("no input device".to_string())
                })?;
            let supported = device
                .default_input_config()
                .map_err(|e| unavailable("microphone config", e))?;
            let sample_rate = supported.sample_rate().0;
            let capacity = (sample_rate as u64 * MAX_BUFFERED_CAPTURE.as_secs()) as usize;
            let config = supported.config();

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    input_stream::<f32>(&device, &config, stream_buffer, stream_alive, capacity)?
                }
                SampleFormat::I16 => {
                    input_stream::<i16>(&device, &config, stream_buffer, stream_alive, capacity)?
                }
                SampleFormat::U16 => {
                    input_stream::<u16>(&device, &config, stream_buffer, stream_alive, capacity)?
                }
                other => {
                    return Err(MediaAccessError::DeviceUnavailable(format!(
                        "unsupported microphone sample format {other:?}"
                    )));
                }
            };
            stream.play().map_err(|e| unavailable("microphone start", e))?;

            info!(
                device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                sample_rate,
                channels = config.channels,
                "Microphone open"
            );
            Ok((stream, sample_rate))
        })
        .await?;

        Ok(Self {
            buffer,
            alive,
            thread,
            sample_rate,
            released: false,
        })
    }
}

impl MicrophoneStream for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        1
    }

    fn read(&mut self, max_frames: usize) -> Option<Vec<i16>> {
        if self.released || !self.alive.load(Ordering::Acquire) {
            return None;
        }
        let mut buffer = self.buffer.lock();
        let take = max_frames.min(buffer.len());
        Some(buffer.drain(..take).collect())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.thread.stop();
            self.buffer.lock().clear();
            debug!("Microphone stream closed");
        }
    }
}

// =============================================================================
// Speaker
// =============================================================================

/// Resample `segment` to `rate` and spread it over `channels`, as f32 in
/// `[-1, 1]`. Multi-channel input is downmixed first.
fn render(segment: &PlaybackSegment, rate: u32, channels: u16) -> Vec<f32> {
    let src_channels = segment.channels.max(1) as usize;
    let mono: Vec<f32> = segment
        .samples
        .chunks(src_channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s as f32).sum();
            sum / (frame.len() as f32 * 32768.0)
        })
        .collect();
    if mono.is_empty() {
        return Vec::new();
    }

    let ratio = segment.sample_rate.max(1) as f64 / rate.max(1) as f64;
    let frames = (mono.len() as f64 / ratio).round() as usize;
    let channels = channels.max(1) as usize;
    let last = mono.len() - 1;

    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let pos = i as f64 * ratio;
        let idx0 = (pos as usize).min(last);
        let idx1 = (idx0 + 1).min(last);
        let frac = (pos - idx0 as f64) as f32;
        let value = mono[idx0] + (mono[idx1] - mono[idx0]) * frac;
        out.extend(std::iter::repeat_n(value, channels));
    }
    out
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream, MediaAccessError>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut buffer = buffer.lock();
                for out in data.iter_mut() {
                    *out = T::from_sample(buffer.pop_front().unwrap_or(0.0));
                }
            },
            |err| warn!("Speaker stream error: {err}"),
            None,
        )
        .map_err(|e| unavailable("speaker stream", e))
}

/// The default output device.
pub struct CpalSink {
    buffer: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
    channels: u16,
    _thread: StreamThread,
}

impl CpalSink {
    pub async fn open() -> Result<Self, MediaAccessError> {
        let buffer = Arc::new(Mutex::new(VecDeque::new()));

        let stream_buffer = buffer.clone();
        let (thread, (sample_rate, channels)) = StreamThread::spawn("speaker", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| {
                    MediaAccessError::DeviceUnavailable("no output device".to_string())
                })?;
            let supported = device
                .default_output_config()
                .map_err(|e| unavailable("speaker config", e))?;
            let config = supported.config();

            let stream = match supported.sample_format() {
                SampleFormat::F32 => output_stream::<f32>(&device, &config, stream_buffer)?,
                SampleFormat::I16 => output_stream::<i16>(&device, &config, stream_buffer)?,
                SampleFormat::U16 => output_stream::<u16>(&device, &config, stream_buffer)?,
                other => {
                    return Err(MediaAccessError::DeviceUnavailable(format!(
                        "unsupported speaker sample format {other:?}"
                    )));
                }
            };
            stream.play().map_err(|e| unavailable("speaker start", e))?;

            info!(
                device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                sample_rate = config.sample_rate.0,
                channels = config.channels,
                "Speaker open"
            );
            Ok((stream, (config.sample_rate.0, config.channels)))
        })
        .await?;

        Ok(Self {
            buffer,
            sample_rate,
            channels,
            _thread: thread,
        })
    }
}

#[async_trait]
impl PlaybackSink for CpalSink {
    async fn play(&self, segment: Arc<PlaybackSegment>) {
        let samples = render(&segment, self.sample_rate, self.channels);
        self.buffer.lock().extend(samples);

        // A halt empties the buffer too, which ends the wait early.
        while !self.buffer.lock().is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    fn halt(&self) {
        let dropped = {
            let mut buffer = self.buffer.lock();
            let dropped = buffer.len();
            buffer.clear();
            dropped
        };
        debug!(dropped, "Speaker halted");
    }
}

// =============================================================================
// Devices
// =============================================================================

/// The default sound card microphone, with an optional still image standing
/// in for the camera.
#[derive(Default)]
pub struct CpalMediaDevices {
    camera: Option<PathBuf>,
}

impl CpalMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera: impl Into<PathBuf>) -> Self {
        self.camera = Some(camera.into());
        self
    }
}

#[async_trait]
impl MediaDevices for CpalMediaDevices {
    async fn open_microphone(
        &self,
        request: MicrophoneRequest,
    ) -> Result<Box<dyn MicrophoneStream>, MediaAccessError> {
        let mic = CpalMicrophone::open().await?;
        if mic.sample_rate() != request.sample_rate {
            debug!(
                requested = request.sample_rate,
                actual = mic.sample_rate(),
                "Capturing at the device's native rate"
            );
        }
        Ok(Box::new(mic))
    }

    async fn open_camera(&self) -> Result<Box<dyn CameraStream>, MediaAccessError> {
        let path = self
            .camera
            .as_ref()
            .ok_or_else(|| MediaAccessError::DeviceUnavailable("no camera configured".to_string()))?;
        Ok(Box::new(ImageFileCamera::open(path)?))
    }
}
