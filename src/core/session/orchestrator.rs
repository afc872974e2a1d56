//! The session state machine.
//!
//! ```text
//! Idle ──start()──▶ Connecting ──open──▶ Active ──stop()──▶ Closing ──▶ Idle
//!                       │                  │
//!                       └──error/close─────┴──▶ Disconnected ──start()──▶ Connecting
//! ```
//!
//! All session logic runs on the caller's task. Transport events, capture
//! chunks, playback transitions and turn-end checks are queued on channels
//! and handed out one at a time by [`SessionOrchestrator::next_input`]; the
//! caller dispatches each with [`SessionOrchestrator::handle_input`] (or
//! both at once with [`SessionOrchestrator::process_next`]).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::error::{SessionError, SessionResult};
use super::types::{
    ConversationTurn, SessionConfig, SessionEvent, SessionState, StatusKind, StatusUpdate,
};
use crate::core::capture::{AudioCaptureAdapter, AudioChunk, ChunkEncoding, ChunkSink};
use crate::core::image::{ImageCapture, ImagePayload, VisionDescriber, describe_or_fallback};
use crate::core::media::{CameraStream, MediaAccessError, MediaDevices, MicrophoneStream};
use crate::core::playback::{AudioPlaybackQueue, DecodeError, PlaybackEvent, PlaybackSink};
use crate::core::realtime::hume::messages::{AudioInput, AudioOutput, UserInput, UserMessage};
use crate::core::realtime::{
    BoxedTransport, EVIClientMessage, EVIServerMessage, InputAudioFormat, TransportConnector,
    TransportEvent,
};

const ERROR_TURN_TEXT: &str = "Oops! Something went wrong. Let me try again.";
const IMAGE_TURN_TEXT: &str = "📷 Shared an image";

/// One unit of work for the session.
#[derive(Debug)]
pub enum SessionInput {
    Transport(TransportEvent),
    Chunk(AudioChunk),
    Playback(PlaybackEvent),
    /// The microphone stream ended while the session was capturing.
    CaptureEnded,
    /// Delayed re-check that playback is still drained after an
    /// `assistant_end`. Stale when either key no longer matches.
    TurnEndCheck { generation: u64, epoch: u64 },
}

/// Receivers that die with the session.
struct SessionInbox {
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    /// Whether `chunks` is fed by a running capture adapter.
    capturing: bool,
}

/// Resources owned by the live session.
struct Session {
    /// Assigned by the service in `chat_metadata`.
    id: Option<String>,
    /// Held between acquisition and the start of capture.
    microphone: Option<Box<dyn MicrophoneStream>>,
    capture: Option<AudioCaptureAdapter>,
    playback: AudioPlaybackQueue,
    transport: Option<BoxedTransport>,
    inbox: SessionInbox,
    /// Set by `assistant_end`, cleared when the turn is handed back.
    turn_end_pending: bool,
    turn_end_check: Option<CancellationToken>,
}

impl Session {
    fn cancel_turn_end(&mut self) {
        self.turn_end_pending = false;
        if let Some(token) = self.turn_end_check.take() {
            token.cancel();
        }
    }
}

/// Owner of one realtime voice conversation at a time.
pub struct SessionOrchestrator {
    config: SessionConfig,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn TransportConnector>,
    speaker: Arc<dyn PlaybackSink>,
    vision: Option<Arc<dyn VisionDescriber>>,
    events: mpsc::UnboundedSender<SessionEvent>,

    state: SessionState,
    muted: Arc<AtomicBool>,
    /// Bumped on every start and teardown.
    generation: u64,
    session: Option<Session>,

    camera: Option<Box<dyn CameraStream>>,
    images: ImageCapture,

    checks_tx: mpsc::UnboundedSender<SessionInput>,
    checks_rx: mpsc::UnboundedReceiver<SessionInput>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn TransportConnector>,
        speaker: Arc<dyn PlaybackSink>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (checks_tx, checks_rx) = mpsc::unbounded_channel();
        Self {
            config,
            devices,
            connector,
            speaker,
            vision: None,
            events,
            state: SessionState::Idle,
            muted: Arc::new(AtomicBool::new(false)),
            generation: 0,
            session: None,
            camera: None,
            images: ImageCapture::new(),
            checks_tx,
            checks_rx,
        }
    }

    /// Describe shared images with `vision` instead of the static fallback.
    pub fn with_vision(mut self, vision: Arc<dyn VisionDescriber>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref()?.id.as_deref()
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera.is_some()
    }

    pub fn current_image(&self) -> Option<&ImagePayload> {
        self.images.current()
    }

    /// Segments waiting in the playback queue.
    pub fn pending_playback(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.playback.len())
    }

    /// Whether the last `assistant_end` is still waiting for playback.
    pub fn is_turn_end_pending(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.turn_end_pending)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Acquire the microphone, open the transport and start streaming.
    pub async fn start(&mut self) -> SessionResult<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            return Err(self.invalid("start"));
        }

        self.generation += 1;
        self.set_state(SessionState::Connecting);
        self.muted.store(false, Ordering::Release);
        self.status(
            StatusKind::Connecting,
            format!("Connecting to {}...", self.config.assistant_name),
        );

        let microphone = match self.devices.open_microphone(self.config.microphone).await {
            Ok(microphone) => microphone,
            Err(e) => {
                warn!("Microphone unavailable: {e}");
                self.teardown(SessionState::Disconnected).await;
                self.status(StatusKind::Disconnected, format!("Error: {e}"));
                return Err(e.into());
            }
        };

        let format = InputAudioFormat {
            encoding: ChunkEncoding::probe(|e| self.connector.supports_encoding(e)),
            sample_rate: microphone.sample_rate(),
            channels: microphone.channels(),
        };

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (_, chunks_rx) = mpsc::unbounded_channel();
        self.session = Some(Session {
            id: None,
            microphone: Some(microphone),
            capture: None,
            playback: AudioPlaybackQueue::new(self.speaker.clone(), playback_tx),
            transport: None,
            inbox: SessionInbox {
                transport: transport_rx,
                chunks: chunks_rx,
                playback: playback_rx,
                capturing: false,
            },
            turn_end_pending: false,
            turn_end_check: None,
        });

        let transport = match self.connector.connect(format, transport_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to open transport: {e}");
                self.teardown(SessionState::Disconnected).await;
                self.status(StatusKind::Disconnected, format!("Error: {e}"));
                return Err(SessionError::Connect(e));
            }
        };

        let mut capture_config = self.config.capture_config();
        capture_config.encoding = format.encoding;
        let muted = self.muted.clone();
        if let Some(session) = self.session.as_mut() {
            session.transport = Some(transport);

            let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
            session.inbox.chunks = chunks_rx;
            session.inbox.capturing = true;
            let sink: ChunkSink = Arc::new(move |chunk| {
                let _ = chunks_tx.send(chunk);
            });
            if let Some(microphone) = session.microphone.take() {
                session.capture = Some(AudioCaptureAdapter::start(
                    microphone,
                    capture_config,
                    muted,
                    sink,
                ));
            }
        }

        self.set_state(SessionState::Active);
        info!(generation = self.generation, encoding = %format.encoding, "Session active");
        self.status(StatusKind::Connected, "Connected! Start talking...");
        Ok(())
    }

    /// End the session. Safe from every state; from `Idle` it does nothing.
    pub async fn stop(&mut self) {
        if self.state == SessionState::Idle {
            debug!("stop() while idle");
            return;
        }

        self.set_state(SessionState::Closing);
        self.teardown(SessionState::Idle).await;
        self.status(StatusKind::Disconnected, "Chat ended");
        self.turn(ConversationTurn::assistant(self.config.farewell.clone()));
    }

    /// Flip the mute flag. Captured audio is still read while muted, but
    /// never reaches the transport.
    pub fn toggle_mute(&mut self) -> SessionResult<bool> {
        if self.state != SessionState::Active {
            return Err(self.invalid("toggle mute"));
        }

        let muted = !self.muted.fetch_xor(true, Ordering::AcqRel);
        debug!(muted, "Mute toggled");
        if muted {
            self.status(StatusKind::Connected, "Muted");
        } else {
            self.status(StatusKind::Listening, "Listening...");
        }
        Ok(muted)
    }

    /// Release everything the session holds and settle in `final_state`.
    async fn teardown(&mut self, final_state: SessionState) {
        self.generation += 1;

        if let Some(mut session) = self.session.take() {
            session.cancel_turn_end();

            if let Some(mut capture) = session.capture.take() {
                capture.stop();
            }
            if let Some(mut microphone) = session.microphone.take() {
                microphone.release();
            }

            session.playback.flush().await;
            session.playback.close().await;

            if let Some(mut transport) = session.transport.take() {
                if let Err(e) = transport.close().await {
                    debug!("Ignoring transport close error: {e}");
                }
            }
        }

        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }

        self.muted.store(false, Ordering::Release);
        self.set_state(final_state);
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for the next unit of work. Returns `None` when there is no live
    /// session. Cancel safe.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        let session = self.session.as_mut()?;
        let checks = &mut self.checks_rx;
        let capturing = session.inbox.capturing;

        let input = tokio::select! {
            biased;
            Some(event) = session.inbox.transport.recv() => SessionInput::Transport(event),
            Some(event) = session.inbox.playback.recv() => SessionInput::Playback(event),
            chunk = session.inbox.chunks.recv(), if capturing => match chunk {
                Some(chunk) => SessionInput::Chunk(chunk),
                None => SessionInput::CaptureEnded,
            },
            Some(check) = checks.recv() => check,
            else => return None,
        };

        // The adapter's sink is gone; report the end once.
        if matches!(input, SessionInput::CaptureEnded) {
            session.inbox.capturing = false;
        }
        Some(input)
    }

    /// Dispatch one unit of work.
    pub async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Transport(TransportEvent::Message(message)) => {
                self.handle_server_message(message).await;
            }
            SessionInput::Transport(TransportEvent::Closed { reason }) => {
                self.on_transport_closed(reason).await;
            }
            SessionInput::Chunk(chunk) => self.forward_chunk(chunk).await,
            SessionInput::Playback(event) => self.on_playback_event(event),
            SessionInput::CaptureEnded => self.on_capture_ended().await,
            SessionInput::TurnEndCheck { generation, epoch } => {
                self.on_turn_end_check(generation, epoch);
            }
        }
    }

    /// Wait for and dispatch one unit of work. Returns `false` once there is
    /// no live session.
    pub async fn process_next(&mut self) -> bool {
        match self.next_input().await {
            Some(input) => {
                self.handle_input(input).await;
                true
            }
            None => false,
        }
    }

    /// Process work until the session ends.
    pub async fn run_until_stopped(&mut self) {
        while self.process_next().await {}
    }

    // =========================================================================
    // Inbound messages
    // =========================================================================

    /// Apply one server message.
    pub async fn handle_server_message(&mut self, message: EVIServerMessage) {
        if self.state != SessionState::Active {
            debug!(kind = message.kind(), state = %self.state, "Ignoring message outside active session");
            return;
        }
        trace!(kind = message.kind(), "Dispatching server message");

        match message {
            EVIServerMessage::ChatMetadata(metadata) => {
                info!(chat_id = %metadata.chat_id, chat_group_id = %metadata.chat_group_id, "Chat started");
                if let Some(session) = self.session.as_mut() {
                    if !metadata.chat_id.is_empty() {
                        session.id = Some(metadata.chat_id);
                    }
                }
                self.turn(ConversationTurn::assistant(self.config.greeting.clone()));
            }
            EVIServerMessage::UserMessage(message) => self.on_user_message(message),
            EVIServerMessage::AssistantMessage(message) => {
                if !message.message.content.is_empty() {
                    self.turn(ConversationTurn::assistant(message.message.content));
                }
            }
            EVIServerMessage::AudioOutput(output) => self.on_audio_output(output),
            EVIServerMessage::UserInterruption(_) => {
                if let Some(session) = self.session.as_mut() {
                    session.cancel_turn_end();
                    session.playback.flush().await;
                }
                self.status(StatusKind::Listening, "Listening...");
            }
            EVIServerMessage::AssistantEnd(_) => {
                let drained = match self.session.as_mut() {
                    Some(session) => {
                        session.turn_end_pending = true;
                        session.playback.is_drained()
                    }
                    None => false,
                };
                if drained {
                    self.on_playback_idle();
                }
            }
            EVIServerMessage::Error(error) => {
                warn!(code = ?error.code, "EVI error: {}", error.message);
                self.turn(ConversationTurn::assistant(ERROR_TURN_TEXT));
            }
            EVIServerMessage::Unknown => {}
        }
    }

    fn on_user_message(&mut self, message: UserMessage) {
        if message.interim == Some(true) {
            trace!("Skipping interim transcript");
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.cancel_turn_end();
        }

        if !message.message.content.is_empty() {
            let emotions = message
                .prosody_scores()
                .map(|scores| scores.top_emotions(self.config.top_emotions))
                .unwrap_or_default();
            self.turn(ConversationTurn::user(message.message.content, emotions));
        }
        self.status(StatusKind::Listening, "Processing...");
    }

    fn on_audio_output(&mut self, output: AudioOutput) {
        let bytes = match output.decode_audio() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{}", DecodeError::InvalidBase64(e.to_string()));
                return;
            }
        };

        if let Some(session) = self.session.as_ref() {
            session.playback.enqueue(Bytes::from(bytes));
        }
        self.status(
            StatusKind::Speaking,
            format!("{} is speaking...", self.config.assistant_name),
        );
    }

    async fn on_transport_closed(&mut self, reason: Option<String>) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Active) {
            return;
        }
        warn!(reason = reason.as_deref().unwrap_or("none"), "Transport closed by remote");
        self.teardown(SessionState::Disconnected).await;
        self.status(StatusKind::Disconnected, "Disconnected");
    }

    async fn on_capture_ended(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        let error = MediaAccessError::DeviceUnavailable("microphone stream ended".to_string());
        warn!("Capture stopped mid-session: {error}");
        self.teardown(SessionState::Disconnected).await;
        self.status(StatusKind::Disconnected, format!("Error: {error}"));
    }

    // =========================================================================
    // Outbound audio
    // =========================================================================

    async fn forward_chunk(&mut self, chunk: AudioChunk) {
        if self.state != SessionState::Active {
            return;
        }
        if self.is_muted() {
            trace!(sequence = chunk.sequence, "Dropping muted chunk");
            return;
        }

        let Some(transport) = self.session.as_mut().and_then(|s| s.transport.as_mut()) else {
            return;
        };
        let message = EVIClientMessage::AudioInput(AudioInput::from_bytes(&chunk.data));
        let sent = transport.send(message).await;
        if let Err(e) = sent {
            warn!(sequence = chunk.sequence, "Failed to send audio: {e}");
            self.teardown(SessionState::Disconnected).await;
            self.status(StatusKind::Disconnected, "Connection error");
        }
    }

    // =========================================================================
    // Turn end
    // =========================================================================

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { epoch, sequence } => {
                trace!(epoch, sequence, "Playback started");
            }
            PlaybackEvent::Drained { epoch } => {
                let ready = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.turn_end_pending && s.playback.is_drained());
                trace!(epoch, ready, "Playback drained");
                if ready {
                    self.on_playback_idle();
                }
            }
        }
    }

    /// Playback is drained while a turn end is pending.
    fn on_playback_idle(&mut self) {
        let grace = self.config.turn_end_grace;
        if grace.is_zero() {
            self.finish_turn();
            return;
        }

        let generation = self.generation;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let epoch = session.playback.epoch();
        if let Some(previous) = session.turn_end_check.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        session.turn_end_check = Some(token.clone());
        let checks = self.checks_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    let _ = checks.send(SessionInput::TurnEndCheck { generation, epoch });
                }
            }
        });
    }

    fn on_turn_end_check(&mut self, generation: u64, epoch: u64) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Discarding stale turn-end check");
            return;
        }
        let still_idle = self.session.as_ref().is_some_and(|s| {
            s.turn_end_pending && s.playback.epoch() == epoch && s.playback.is_drained()
        });
        if still_idle {
            self.finish_turn();
        } else {
            trace!(epoch, "Playback resumed before turn-end check");
        }
    }

    fn finish_turn(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.cancel_turn_end();
        }
        self.status(StatusKind::Connected, "Your turn...");
    }

    // =========================================================================
    // Image side channel
    // =========================================================================

    /// Turn the camera on or off. Returns whether it is now on.
    ///
    /// Turning it on discards any uploaded image.
    pub async fn toggle_camera(&mut self) -> SessionResult<bool> {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            info!("Camera released");
            return Ok(false);
        }

        let camera = self.devices.open_camera().await?;
        self.camera = Some(camera);
        self.images.clear();
        info!("Camera on");
        Ok(true)
    }

    /// Use an uploaded image for the next `send_image`. Turns the camera
    /// off.
    pub fn load_image_file(&mut self, bytes: impl Into<Bytes>) -> SessionResult<()> {
        self.images.from_file(bytes)?;
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            info!("Camera released in favor of uploaded image");
        }
        Ok(())
    }

    /// Describe the current image and send the description as a user text
    /// turn. Returns the description that was sent.
    pub async fn send_image(&mut self) -> SessionResult<String> {
        if self.state != SessionState::Active {
            return Err(self.invalid("send an image"));
        }

        let payload = match self.camera.as_mut() {
            Some(camera) => {
                let frame = camera.grab_frame()?;
                self.images.from_camera(&frame)?.clone()
            }
            None => self.images.current().cloned().ok_or(SessionError::NoImage)?,
        };

        self.status(
            StatusKind::Connecting,
            format!("{} is looking at the image...", self.config.assistant_name),
        );
        let description = describe_or_fallback(self.vision.as_deref(), &payload).await;

        let text = format!("[Looking at an image] {description}");
        let sent = match self.session.as_mut().and_then(|s| s.transport.as_mut()) {
            Some(transport) => transport
                .send(EVIClientMessage::UserInput(UserInput { text }))
                .await
                .map_err(SessionError::Transport),
            None => Err(SessionError::Transport(
                crate::core::realtime::RealtimeError::NotConnected,
            )),
        };

        if let Err(e) = sent {
            warn!("Failed to send image description: {e}");
            self.status(StatusKind::Connected, "Could not process image");
            self.teardown(SessionState::Disconnected).await;
            self.status(StatusKind::Disconnected, "Connection error");
            return Err(e);
        }

        self.turn(ConversationTurn::user(IMAGE_TURN_TEXT, Vec::new()));
        self.status(
            StatusKind::Connected,
            format!("Image sent to {}", self.config.assistant_name),
        );
        Ok(description)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state change");
            self.state = state;
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn status(&self, kind: StatusKind, text: impl Into<String>) {
        let _ = self
            .events
            .send(SessionEvent::Status(StatusUpdate::new(kind, text)));
    }

    fn turn(&self, turn: ConversationTurn) {
        let _ = self.events.send(SessionEvent::Turn(turn));
    }
}
