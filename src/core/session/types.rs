//! Session state, configuration and the events published to the UI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::capture::{CaptureConfig, DEFAULT_CHUNK_INTERVAL, MuteGate};
use crate::core::media::MicrophoneRequest;

/// Lifecycle of the orchestrator's single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    /// The session ended on an error. Only `start()` leaves this state.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Status categories shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connecting,
    Connected,
    Listening,
    Speaking,
    Disconnected,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Connecting => "connecting",
            StatusKind::Connected => "connected",
            StatusKind::Listening => "listening",
            StatusKind::Speaking => "speaking",
            StatusKind::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// A status change with display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusUpdate {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One utterance in the conversation log. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    role: TurnRole,
    text: String,
    /// Highest-scoring emotions, strongest first, intensities in [0, 1].
    emotions: Vec<(String, f32)>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>, emotions: Vec<(String, f32)>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            emotions,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            emotions: Vec::new(),
        }
    }

    pub fn role(&self) -> TurnRole {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn emotions(&self) -> &[(String, f32)] {
        &self.emotions
    }

    /// Emotions as `"joy: 82% · interest: 40%"`.
    pub fn emotion_summary(&self) -> Option<String> {
        if self.emotions.is_empty() {
            return None;
        }
        Some(
            self.emotions
                .iter()
                .map(|(name, score)| format!("{name}: {:.0}%", score * 100.0))
                .collect::<Vec<_>>()
                .join(" · "),
        )
    }
}

/// Everything the session publishes to its UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status(StatusUpdate),
    Turn(ConversationTurn),
}

/// Behavior knobs for a [`SessionOrchestrator`](super::SessionOrchestrator).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Microphone constraints.
    pub microphone: MicrophoneRequest,
    /// Chunk cadence.
    pub chunk_interval: Duration,
    /// Where muted audio is dropped.
    pub mute_gate: MuteGate,
    /// Extra wait after playback drains before the turn is handed back.
    /// Zero hands it back on the drain signal itself.
    pub turn_end_grace: Duration,
    /// How many emotions to attach to a user turn.
    pub top_emotions: usize,
    /// Name used in status texts.
    pub assistant_name: String,
    pub greeting: String,
    pub farewell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            microphone: MicrophoneRequest::default(),
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
            mute_gate: MuteGate::default(),
            turn_end_grace: Duration::ZERO,
            top_emotions: 3,
            assistant_name: "Claire".to_string(),
            greeting: "Hey there! I'm Claire, your AI cooking companion. What's cooking?"
                .to_string(),
            farewell: "Thanks for chatting! Come back anytime for more cozy cooking fun!"
                .to_string(),
        }
    }
}

impl SessionConfig {
    pub(crate) fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            interval: self.chunk_interval,
            mute_gate: self.mute_gate,
            ..CaptureConfig::default()
        }
    }
}
