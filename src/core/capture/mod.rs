//! Microphone capture adapter.
//!
//! Turns a live [`MicrophoneStream`] into a push-style sequence of encoded
//! [`AudioChunk`]s at a fixed cadence. The sequence is lazy, infinite and
//! non-restartable: once [`AudioCaptureAdapter::stop`] is called (or the
//! device goes away) the adapter is spent and a new one must be started.
//!
//! Back-pressure is not modeled. The sink is called synchronously from the
//! cadence task as soon as a chunk is ready; a slow consumer must queue or
//! drop on its own side.

mod encoder;

pub use encoder::ChunkEncoding;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::media::MicrophoneStream;

/// Default capture cadence.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// One encoded slice of microphone audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded bytes, independently decodable.
    pub data: Bytes,
    /// Encoding of `data`.
    pub encoding: ChunkEncoding,
    /// Capture order, starting at 1. Muted chunks still consume a number.
    pub sequence: u64,
    /// When the chunk was read from the device.
    pub captured_at: Instant,
}

/// Receives every chunk the adapter forwards.
pub type ChunkSink = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// Where muted audio is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteGate {
    /// The adapter captures and discards chunks while muted.
    Adapter,
    /// Chunks reach the session, which drops them before the transport.
    #[default]
    SendBoundary,
}

impl MuteGate {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "adapter" | "capture" => Some(MuteGate::Adapter),
            "send_boundary" | "send-boundary" | "send" | "transport" => {
                Some(MuteGate::SendBoundary)
            }
            _ => None,
        }
    }
}

/// Capture settings.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Chunk cadence.
    pub interval: Duration,
    /// Chunk encoding.
    pub encoding: ChunkEncoding,
    /// Where muted chunks are dropped.
    pub mute_gate: MuteGate,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHUNK_INTERVAL,
            encoding: ChunkEncoding::FALLBACK,
            mute_gate: MuteGate::default(),
        }
    }
}

/// Running capture of one microphone stream.
pub struct AudioCaptureAdapter {
    stream: Arc<Mutex<Option<Box<dyn MicrophoneStream>>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AudioCaptureAdapter {
    /// Start capturing. The first chunk is delivered one interval after start.
    ///
    /// `muted` is only consulted when `config.mute_gate` is
    /// [`MuteGate::Adapter`].
    pub fn start(
        stream: Box<dyn MicrophoneStream>,
        config: CaptureConfig,
        muted: Arc<AtomicBool>,
        sink: ChunkSink,
    ) -> Self {
        let sample_rate = stream.sample_rate();
        let channels = stream.channels().max(1);
        let frames_per_chunk =
            ((sample_rate as u128 * config.interval.as_millis()) / 1000).max(1) as usize;

        info!(
            sample_rate,
            channels,
            encoding = %config.encoding,
            interval_ms = config.interval.as_millis() as u64,
            "Starting audio capture"
        );

        let stream = Arc::new(Mutex::new(Some(stream)));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Self::capture_loop(
            stream.clone(),
            cancel.clone(),
            config,
            frames_per_chunk,
            sample_rate,
            channels,
            muted,
            sink,
        ));

        Self {
            stream,
            cancel,
            task: Some(task),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_loop(
        stream: Arc<Mutex<Option<Box<dyn MicrophoneStream>>>>,
        cancel: CancellationToken,
        config: CaptureConfig,
        frames_per_chunk: usize,
        sample_rate: u32,
        channels: u16,
        muted: Arc<AtomicBool>,
        sink: ChunkSink,
    ) {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut sequence = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let samples = match stream.lock().as_mut() {
                Some(mic) => mic.read(frames_per_chunk),
                None => break,
            };

            let samples = match samples {
                Some(samples) => samples,
                None => {
                    warn!("Microphone stream ended");
                    break;
                }
            };
            if samples.is_empty() {
                continue;
            }

            sequence += 1;
            if config.mute_gate == MuteGate::Adapter && muted.load(Ordering::Acquire) {
                trace!(sequence, "Discarding muted chunk");
                continue;
            }

            match config.encoding.encode(&samples, sample_rate, channels) {
                Ok(data) => sink(AudioChunk {
                    data,
                    encoding: config.encoding,
                    sequence,
                    captured_at: Instant::now(),
                }),
                Err(e) => warn!(sequence, "Failed to encode audio chunk: {e}"),
            }
        }
        debug!("Audio capture loop ended after {sequence} chunks");
    }

    /// Whether the cadence task is still producing chunks.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Whether the microphone has been released.
    pub fn is_released(&self) -> bool {
        self.stream.lock().is_none()
    }

    /// Stop capturing and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(mut mic) = self.stream.lock().take() {
            mic.release();
            info!("Microphone released");
        }
    }
}

impl Drop for AudioCaptureAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ToneMic {
        released: Arc<AtomicUsize>,
        remaining_reads: Option<usize>,
    }

    impl MicrophoneStream for ToneMic {
        fn sample_rate(&self) -> u32 {
            16000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn read(&mut self, max_frames: usize) -> Option<Vec<i16>> {
            if let Some(left) = self.remaining_reads.as_mut() {
                if *left == 0 {
                    return None;
                }
                *left -= 1;
            }
            Some(vec![7; max_frames])
        }
        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collecting_sink() -> (ChunkSink, Arc<Mutex<Vec<AudioChunk>>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink_chunks = chunks.clone();
        let sink: ChunkSink = Arc::new(move |chunk| sink_chunks.lock().push(chunk));
        (sink, chunks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_arrive_at_cadence_in_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let mic = ToneMic {
            released: released.clone(),
            remaining_reads: None,
        };
        let (sink, chunks) = collecting_sink();
        let config = CaptureConfig {
            interval: Duration::from_millis(80),
            encoding: ChunkEncoding::Linear16,
            mute_gate: MuteGate::SendBoundary,
        };

        let mut adapter =
            AudioCaptureAdapter::start(Box::new(mic), config, Arc::new(AtomicBool::new(false)), sink);

        tokio::time::sleep(Duration::from_millis(410)).await;
        adapter.stop();

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 5);
        let sequences: Vec<u64> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        // 80ms at 16kHz mono, 2 bytes per sample
        assert_eq!(chunks[0].data.len(), 1280 * 2);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_gate_discards_while_muted() {
        let mic = ToneMic {
            released: Arc::new(AtomicUsize::new(0)),
            remaining_reads: None,
        };
        let (sink, chunks) = collecting_sink();
        let muted = Arc::new(AtomicBool::new(true));
        let config = CaptureConfig {
            mute_gate: MuteGate::Adapter,
            ..Default::default()
        };

        let mut adapter = AudioCaptureAdapter::start(Box::new(mic), config, muted.clone(), sink);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(chunks.lock().is_empty());
        assert!(adapter.is_running());

        muted.store(false, Ordering::Release);
        tokio::time::sleep(Duration::from_millis(100)).await;
        adapter.stop();

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 1);
        // Sequence numbers keep counting through the muted period.
        assert_eq!(chunks[0].sequence, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_boundary_gate_forwards_while_muted() {
        let mic = ToneMic {
            released: Arc::new(AtomicUsize::new(0)),
            remaining_reads: None,
        };
        let (sink, chunks) = collecting_sink();
        let mut adapter = AudioCaptureAdapter::start(
            Box::new(mic),
            CaptureConfig::default(),
            Arc::new(AtomicBool::new(true)),
            sink,
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
        adapter.stop();
        assert_eq!(chunks.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let released = Arc::new(AtomicUsize::new(0));
        let mic = ToneMic {
            released: released.clone(),
            remaining_reads: None,
        };
        let (sink, _chunks) = collecting_sink();
        let mut adapter = AudioCaptureAdapter::start(
            Box::new(mic),
            CaptureConfig::default(),
            Arc::new(AtomicBool::new(false)),
            sink,
        );

        adapter.stop();
        adapter.stop();
        drop(adapter);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ends_when_device_disappears() {
        let mic = ToneMic {
            released: Arc::new(AtomicUsize::new(0)),
            remaining_reads: Some(2),
        };
        let (sink, chunks) = collecting_sink();
        let adapter = AudioCaptureAdapter::start(
            Box::new(mic),
            CaptureConfig::default(),
            Arc::new(AtomicBool::new(false)),
            sink,
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(chunks.lock().len(), 2);
        assert!(!adapter.is_running());
    }

    #[test]
    fn test_mute_gate_parse() {
        assert_eq!(MuteGate::parse("adapter"), Some(MuteGate::Adapter));
        assert_eq!(MuteGate::parse("SEND"), Some(MuteGate::SendBoundary));
        assert_eq!(MuteGate::parse("nowhere"), None);
    }
}
