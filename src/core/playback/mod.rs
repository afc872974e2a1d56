//! Ordered playback of assistant audio.
//!
//! The queue is an actor: one task owns the buffer and the sink, and every
//! operation is a command processed in submission order. That gives the two
//! properties the session relies on:
//!
//! - **FIFO**: a segment is decoded when its command is processed, so decode
//!   results are sequenced before playback and can never overtake each other.
//! - **Atomic flush**: [`AudioPlaybackQueue::flush`] halts the current segment
//!   and clears the buffer in one step, and returns only after the actor has
//!   done so.
//!
//! Transitions are reported on a [`PlaybackEvent`] channel. `Drained` fires
//! when the last buffered segment finishes naturally; a flush does not
//! produce it.

mod decoder;

pub use decoder::{DecodeError, PlaybackSegment, decode_wav};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Audio output device.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play one segment, completing when it has been fully rendered.
    async fn play(&self, segment: Arc<PlaybackSegment>);

    /// Stop whatever is playing right now.
    fn halt(&self);
}

/// Playback state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A segment started playing. `epoch` increases by one per segment.
    Started { epoch: u64, sequence: u64 },
    /// Nothing left to play.
    Drained { epoch: u64 },
}

enum Command {
    Enqueue(Bytes),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

#[derive(Default)]
struct Shared {
    /// Submitted segments that have not started yet (or been dropped).
    pending: AtomicUsize,
    playing: AtomicBool,
    epoch: AtomicU64,
}

type PlayFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue of decoded assistant audio.
pub struct AudioPlaybackQueue {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl AudioPlaybackQueue {
    /// Spawn the playback actor.
    pub fn new(sink: Arc<dyn PlaybackSink>, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let task = tokio::spawn(Self::run(rx, sink, shared.clone(), events));

        Self {
            commands: tx,
            shared,
            task: Some(task),
        }
    }

    /// Submit an encoded segment. Malformed audio is logged and dropped
    /// without affecting the rest of the queue.
    pub fn enqueue(&self, encoded: Bytes) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.commands.send(Command::Enqueue(encoded)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            debug!("Playback queue closed, dropping segment");
        }
    }

    /// Halt current playback and discard everything buffered.
    ///
    /// When this returns the queue is empty and silent.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Stop the actor. Idempotent.
    pub async fn close(&mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Segments waiting to be played (including ones still being decoded).
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a segment is currently playing.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Empty and not playing.
    pub fn is_drained(&self) -> bool {
        !self.is_playing() && self.is_empty()
    }

    /// Number of segments started so far.
    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    async fn run(
        mut commands: mpsc::UnboundedReceiver<Command>,
        sink: Arc<dyn PlaybackSink>,
        shared: Arc<Shared>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) {
        let mut buffer: VecDeque<Arc<PlaybackSegment>> = VecDeque::new();
        let mut current: Option<PlayFuture> = None;
        let mut next_sequence = 1u64;

        'actor: loop {
            // Apply everything already submitted before promoting the head,
            // so a queued flush discards it instead of starting it.
            loop {
                let command = match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => None,
                };
                let keep_running = Self::apply(
                    command,
                    &sink,
                    &shared,
                    &mut current,
                    &mut buffer,
                    &mut next_sequence,
                );
                if !keep_running {
                    break 'actor;
                }
            }

            if current.is_none() {
                if let Some(segment) = buffer.pop_front() {
                    shared.pending.fetch_sub(1, Ordering::AcqRel);
                    shared.playing.store(true, Ordering::Release);
                    let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                    trace!(epoch, sequence = segment.sequence, "Playing segment");
                    let _ = events.send(PlaybackEvent::Started {
                        epoch,
                        sequence: segment.sequence,
                    });

                    let sink = sink.clone();
                    current = Some(Box::pin(async move { sink.play(segment).await }));
                } else if shared.playing.swap(false, Ordering::AcqRel) {
                    let epoch = shared.epoch.load(Ordering::Acquire);
                    debug!(epoch, "Playback drained");
                    let _ = events.send(PlaybackEvent::Drained { epoch });
                }
            }

            // Commands first, so a pending flush wins over the segment.
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let keep_running = Self::apply(
                        command,
                        &sink,
                        &shared,
                        &mut current,
                        &mut buffer,
                        &mut next_sequence,
                    );
                    if !keep_running {
                        break;
                    }
                }
                _ = play_current(&mut current), if current.is_some() => {
                    current = None;
                }
            }
        }
        debug!("Playback actor stopped");
    }

    /// Apply one command. Returns `false` once the actor should stop.
    fn apply(
        command: Option<Command>,
        sink: &Arc<dyn PlaybackSink>,
        shared: &Shared,
        current: &mut Option<PlayFuture>,
        buffer: &mut VecDeque<Arc<PlaybackSegment>>,
        next_sequence: &mut u64,
    ) -> bool {
        match command {
            Some(Command::Enqueue(encoded)) => {
                let sequence = *next_sequence;
                *next_sequence += 1;
                match decode_wav(&encoded, sequence) {
                    Ok(segment) => buffer.push_back(Arc::new(segment)),
                    Err(e) => {
                        shared.pending.fetch_sub(1, Ordering::AcqRel);
                        warn!(sequence, "Dropping undecodable audio segment: {e}");
                    }
                }
                true
            }
            Some(Command::Flush(ack)) => {
                Self::halt_and_clear(sink, shared, current, buffer);
                let _ = ack.send(());
                true
            }
            Some(Command::Close(ack)) => {
                Self::halt_and_clear(sink, shared, current, buffer);
                let _ = ack.send(());
                false
            }
            None => {
                Self::halt_and_clear(sink, shared, current, buffer);
                false
            }
        }
    }

    fn halt_and_clear(
        sink: &Arc<dyn PlaybackSink>,
        shared: &Shared,
        current: &mut Option<PlayFuture>,
        buffer: &mut VecDeque<Arc<PlaybackSegment>>,
    ) {
        if current.take().is_some() {
            sink.halt();
        }
        let discarded = buffer.len();
        buffer.clear();
        shared.pending.fetch_sub(discarded, Ordering::AcqRel);
        shared.playing.store(false, Ordering::Release);
        if discarded > 0 {
            debug!(discarded, "Playback flushed");
        }
    }
}

async fn play_current(current: &mut Option<PlayFuture>) {
    match current.as_mut() {
        Some(playing) => playing.await,
        None => std::future::pending().await,
    }
}

impl Drop for AudioPlaybackQueue {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::time::Duration;

    /// Sink that "plays" for the segment's duration and records the first
    /// sample of every segment that finished or was halted.
    #[derive(Default)]
    struct RecordingSink {
        finished: Mutex<Vec<i16>>,
        halts: AtomicUsize,
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn play(&self, segment: Arc<PlaybackSegment>) {
            tokio::time::sleep(segment.duration()).await;
            self.finished.lock().push(segment.samples[0]);
        }

        fn halt(&self) {
            self.halts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 100ms of a constant tone at 8kHz, tagged by its sample value.
    fn tone(tag: i16) -> Bytes {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..800 {
                writer.write_sample(tag).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    fn queue() -> (
        AudioPlaybackQueue,
        Arc<RecordingSink>,
        mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (AudioPlaybackQueue::new(sink.clone(), tx), sink, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_in_receipt_order_and_drains() {
        let (queue, sink, mut events) = queue();
        for tag in [1, 2, 3] {
            queue.enqueue(tone(tag));
        }
        assert!(!queue.is_drained());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(*sink.finished.lock(), vec![1, 2, 3]);
        assert!(queue.is_drained());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                PlaybackEvent::Started { epoch: 1, sequence: 1 },
                PlaybackEvent::Started { epoch: 2, sequence: 2 },
                PlaybackEvent::Started { epoch: 3, sequence: 3 },
                PlaybackEvent::Drained { epoch: 3 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_segment_is_dropped_alone() {
        let (queue, sink, _events) = queue();
        queue.enqueue(tone(1));
        queue.enqueue(Bytes::from_static(b"garbage"));
        queue.enqueue(tone(3));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*sink.finished.lock(), vec![1, 3]);
        assert!(queue.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_halts_and_empties() {
        let (queue, sink, mut events) = queue();
        for tag in [1, 2, 3] {
            queue.enqueue(tone(tag));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_playing());

        queue.flush().await;
        assert_eq!(queue.len(), 0);
        assert!(queue.is_drained());
        assert_eq!(sink.halts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.finished.lock().is_empty());

        // Flushing never reports a drain.
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, PlaybackEvent::Drained { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_queued_behind_segment_never_starts_it() {
        let (queue, sink, mut events) = queue();
        queue.enqueue(tone(1));
        queue.flush().await;

        assert!(queue.is_drained());
        assert_eq!(queue.epoch(), 0);
        assert_eq!(sink.halts.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.finished.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_flush_plays() {
        let (queue, sink, _events) = queue();
        queue.enqueue(tone(1));
        queue.flush().await;
        queue.enqueue(tone(2));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*sink.finished.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let (mut queue, _sink, _events) = queue();
        queue.enqueue(tone(1));
        queue.close().await;
        queue.close().await;
        queue.enqueue(tone(2));
        assert_eq!(queue.len(), 0);
        queue.flush().await;
    }
}
