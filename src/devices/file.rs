//! Media devices backed by files.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::image::VideoFrame;
use crate::core::media::{
    CameraStream, MediaAccessError, MediaDevices, MicrophoneRequest, MicrophoneStream,
};
use crate::core::playback::{PlaybackSegment, PlaybackSink, decode_wav};

/// Granularity of paced playback.
const PLAYBACK_SLICE: Duration = Duration::from_millis(20);

// =============================================================================
// Microphone
// =============================================================================

/// Plays a WAV file into the session as if it were spoken, then silence.
pub struct WavMicrophone {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    channels: u16,
    released: bool,
}

impl WavMicrophone {
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, MediaAccessError> {
        let segment = decode_wav(bytes, 0)
            .map_err(|e| MediaAccessError::DeviceUnavailable(format!("unreadable WAV input: {e}")))?;
        Ok(Self {
            samples: segment.samples,
            position: 0,
            sample_rate: segment.sample_rate,
            channels: segment.channels,
            released: false,
        })
    }

    /// Whether the whole file has been read.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

impl MicrophoneStream for WavMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read(&mut self, max_frames: usize) -> Option<Vec<i16>> {
        if self.released {
            return None;
        }

        let wanted = max_frames * self.channels.max(1) as usize;
        let end = (self.position + wanted).min(self.samples.len());
        let mut out = self.samples[self.position..end].to_vec();
        self.position = end;
        out.resize(wanted, 0);
        Some(out)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.samples = Vec::new();
            debug!("WAV microphone released");
        }
    }
}

// =============================================================================
// Speaker
// =============================================================================

type Writer = hound::WavWriter<BufWriter<File>>;

/// The open recording file and how many have been started.
#[derive(Default)]
struct Recorder {
    writer: Option<Writer>,
    parts: u32,
}

/// Renders playback in real time and records it to WAV.
///
/// A WAV header fixes one sample rate and channel count, so a segment in a
/// different format starts a new file next to the first one (`out.wav`,
/// `out-2.wav`, ...).
pub struct WavFileSink {
    path: PathBuf,
    recorder: Mutex<Recorder>,
}

impl WavFileSink {
    /// Record everything played to `path`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recorder: Mutex::new(Recorder::default()),
        }
    }

    fn write(&self, segment: &PlaybackSegment, samples: &[i16]) {
        let path = self.path.as_path();
        let spec = hound::WavSpec {
            channels: segment.channels,
            sample_rate: segment.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut recorder = self.recorder.lock();
        let same_format = recorder.writer.as_ref().is_some_and(|w| {
            let current = w.spec();
            current.sample_rate == spec.sample_rate && current.channels == spec.channels
        });
        if !same_format {
            if let Some(previous) = recorder.writer.take() {
                debug!(
                    sequence = segment.sequence,
                    "Segment format changed, starting a new file"
                );
                if let Err(e) = previous.finalize() {
                    warn!("Failed to finalize recording: {e}");
                }
            }

            recorder.parts += 1;
            let target = part_path(path, recorder.parts);
            match hound::WavWriter::create(&target, spec) {
                Ok(w) => {
                    info!("Recording assistant audio to {}", target.display());
                    recorder.writer = Some(w);
                }
                Err(e) => {
                    warn!("Failed to create {}: {e}", target.display());
                    return;
                }
            }
        }

        if let Some(w) = recorder.writer.as_mut() {
            for sample in samples {
                if let Err(e) = w.write_sample(*sample) {
                    warn!("Failed to write playback sample: {e}");
                    return;
                }
            }
        }
    }

    /// Finalize the output file.
    pub fn finish(&self) -> Result<(), hound::Error> {
        match self.recorder.lock().writer.take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}

/// `out.wav` for the first part, `out-2.wav` for the second, and so on.
fn part_path(path: &Path, part: u32) -> PathBuf {
    if part <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{part}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{part}"),
    };
    path.with_file_name(name)
}

#[async_trait]
impl PlaybackSink for WavFileSink {
    async fn play(&self, segment: Arc<PlaybackSegment>) {
        let channels = segment.channels.max(1) as usize;
        let frames_per_slice =
            ((segment.sample_rate as u128 * PLAYBACK_SLICE.as_millis()) / 1000).max(1) as usize;
        let slice_len = frames_per_slice * channels;

        for slice in segment.samples.chunks(slice_len) {
            self.write(&segment, slice);
            let frames = slice.len() / channels;
            tokio::time::sleep(Duration::from_micros(
                frames as u64 * 1_000_000 / segment.sample_rate.max(1) as u64,
            ))
            .await;
        }
    }

    fn halt(&self) {
        debug!("Playback halted");
    }
}

// =============================================================================
// Camera
// =============================================================================

/// Serves a still image as every camera frame.
pub struct ImageFileCamera {
    frame: Option<VideoFrame>,
}

impl ImageFileCamera {
    pub fn open(path: &Path) -> Result<Self, MediaAccessError> {
        let image = image::open(path).map_err(|e| {
            MediaAccessError::DeviceUnavailable(format!("camera image {}: {e}", path.display()))
        })?;
        let rgb = image.to_rgb8();
        Ok(Self::from_frame(VideoFrame::new(
            rgb.width(),
            rgb.height(),
            rgb.into_raw(),
        )))
    }

    pub fn from_frame(frame: VideoFrame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl CameraStream for ImageFileCamera {
    fn grab_frame(&mut self) -> Result<VideoFrame, MediaAccessError> {
        self.frame
            .clone()
            .ok_or_else(|| MediaAccessError::DeviceUnavailable("camera released".to_string()))
    }

    fn release(&mut self) {
        if self.frame.take().is_some() {
            debug!("Camera released");
        }
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Devices backed by a WAV file (microphone) and an image file (camera).
pub struct FileMediaDevices {
    microphone: PathBuf,
    camera: Option<PathBuf>,
}

impl FileMediaDevices {
    pub fn new(microphone: impl Into<PathBuf>) -> Self {
        Self {
            microphone: microphone.into(),
            camera: None,
        }
    }

    pub fn with_camera(mut self, camera: impl Into<PathBuf>) -> Self {
        self.camera = Some(camera.into());
        self
    }
}

#[async_trait]
impl MediaDevices for FileMediaDevices {
    async fn open_microphone(
        &self,
        request: MicrophoneRequest,
    ) -> Result<Box<dyn MicrophoneStream>, MediaAccessError> {
        let bytes = tokio::fs::read(&self.microphone).await.map_err(|e| {
            MediaAccessError::DeviceUnavailable(format!(
                "microphone input {}: {e}",
                self.microphone.display()
            ))
        })?;
        let mic = WavMicrophone::from_wav_bytes(&bytes)?;
        if mic.sample_rate() != request.sample_rate {
            debug!(
                requested = request.sample_rate,
                actual = mic.sample_rate(),
                "Microphone input uses the file's sample rate"
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
