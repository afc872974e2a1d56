//! Hume EVI WebSocket message types.
//!
//! Only the message kinds a voice session produces or reacts to are modeled
//! in detail. Everything else the server sends still parses (as
//! [`EVIServerMessage::Unknown`]) so new server events never break a session.
//!
//! # Message Flow
//!
//! ```text
//! Client → Server:
//!   - SessionSettings (announce raw audio format)
//!   - AudioInput (base64-encoded audio chunks)
//!   - UserInput (text turn, used for image descriptions)
//!
//! Server → Client:
//!   - ChatMetadata (on connection)
//!   - UserMessage (transcription + prosody)
//!   - UserInterruption (user spoke over the assistant)
//!   - AssistantMessage (response text)
//!   - AudioOutput (response audio, base64 WAV)
//!   - AssistantEnd (response complete)
//!   - Error (error occurred)
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::capture::ChunkEncoding;

// =============================================================================
// Constants
// =============================================================================

/// Hume EVI WebSocket endpoint URL.
pub const HUME_EVI_WEBSOCKET_URL: &str = "wss://api.hume.ai/v0/evi/chat";

// =============================================================================
// Prosody Scores
// =============================================================================

/// Prosody scores keyed by emotion label.
///
/// Each value is the model's confidence (0.0 to 1.0) that the speaker is
/// expressing that emotion. The label set is owned by the service and may
/// change, so scores are kept as an open map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProsodyScores(pub HashMap<String, f32>);

impl ProsodyScores {
    /// Get the top N emotions by score, highest first.
    ///
    /// Intensities are clamped to `[0, 1]`; ties keep label order so the
    /// output is deterministic.
    pub fn top_emotions(&self, n: usize) -> Vec<(String, f32)> {
        let mut scores: Vec<(String, f32)> = self
            .0
            .iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(label, score)| (label.clone(), score.clamp(0.0, 1.0)))
            .collect();
        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(n);
        scores
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent from client to Hume EVI server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EVIClientMessage {
    /// Configure session settings (audio format).
    SessionSettings(SessionSettings),
    /// Send audio input chunk.
    AudioInput(AudioInput),
    /// Send a text turn on behalf of the user.
    UserInput(UserInput),
}

/// Session settings for configuring audio input format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    /// Audio encoding format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,
    /// System prompt override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Audio format settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSettings {
    /// Encoding format.
    pub encoding: ChunkEncoding,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
}

/// Audio input message containing base64-encoded audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInput {
    /// Base64-encoded audio data.
    pub data: String,
}

impl AudioInput {
    /// Create new AudioInput from encoded audio bytes.
    pub fn from_bytes(audio_data: &[u8]) -> Self {
        Self {
            data: BASE64.encode(audio_data),
        }
    }
}

/// Text input message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInput {
    /// Text content.
    pub text: String,
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages received from Hume EVI server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EVIServerMessage {
    /// Chat metadata on connection.
    ChatMetadata(ChatMetadata),
    /// User message with transcription and prosody.
    UserMessage(UserMessage),
    /// The user started speaking over the assistant.
    UserInterruption(UserInterruption),
    /// Assistant message (response text).
    AssistantMessage(AssistantMessage),
    /// Audio output chunk.
    AudioOutput(AudioOutput),
    /// End of assistant response.
    AssistantEnd(AssistantEnd),
    /// Error message.
    Error(EVIError),
    /// Any other message type (tool calls, prosody, future additions).
    #[serde(other)]
    Unknown,
}

impl EVIServerMessage {
    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EVIServerMessage::ChatMetadata(_) => "chat_metadata",
            EVIServerMessage::UserMessage(_) => "user_message",
            EVIServerMessage::UserInterruption(_) => "user_interruption",
            EVIServerMessage::AssistantMessage(_) => "assistant_message",
            EVIServerMessage::AudioOutput(_) => "audio_output",
            EVIServerMessage::AssistantEnd(_) => "assistant_end",
            EVIServerMessage::Error(_) => "error",
            EVIServerMessage::Unknown => "unknown",
        }
    }
}

/// Chat metadata received on WebSocket connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMetadata {
    /// Chat ID for this session.
    #[serde(default)]
    pub chat_id: String,
    /// Chat group ID for resuming conversations.
    #[serde(default)]
    pub chat_group_id: String,
    /// Request ID.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Message content shared by user and assistant messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageContent {
    /// Role ("user" or "assistant").
    #[serde(default)]
    pub role: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
}

/// User message with transcription and prosody scores.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMessage {
    /// Unique message ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Transcribed text.
    #[serde(default)]
    pub message: MessageContent,
    /// Prosody scores (emotional expression).
    #[serde(default)]
    pub models: Option<ProsodyModels>,
    /// Whether this is an interim transcript.
    #[serde(default)]
    pub interim: Option<bool>,
}

impl UserMessage {
    /// Prosody scores, if the server attached any.
    pub fn prosody_scores(&self) -> Option<&ProsodyScores> {
        self.models
            .as_ref()
            .and_then(|m| m.prosody.as_ref())
            .map(|p| &p.scores)
            .filter(|scores| !scores.is_empty())
    }
}

/// Prosody models container.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProsodyModels {
    /// Prosody scores.
    #[serde(default)]
    pub prosody: Option<ProsodyData>,
}

/// Prosody data container.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProsodyData {
    /// Emotion scores.
    #[serde(default)]
    pub scores: ProsodyScores,
}

/// User interruption event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInterruption {
    /// Interruption time in milliseconds.
    #[serde(default)]
    pub time: Option<u64>,
}

/// Assistant message (response text).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    /// Unique message ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Message content.
    #[serde(default)]
    pub message: MessageContent,
}

/// Audio output chunk from assistant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioOutput {
    /// Unique ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Base64-encoded audio data.
    pub data: String,
}

impl AudioOutput {
    /// Decode the audio data to bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// End of assistant response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantEnd {
    /// Message ID.
    #[serde(default)]
    pub id: Option<String>,
}

/// EVI error message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EVIError {
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Serialize a client message to JSON.
pub fn serialize_client_message(msg: &EVIClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Deserialize a server message from JSON.
pub fn deserialize_server_message(json: &str) -> Result<EVIServerMessage, serde_json::Error> {
    serde_json::from_str(json)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f32)]) -> ProsodyScores {
        ProsodyScores(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn test_prosody_scores_top_emotions() {
        let scores = scores(&[
            ("Joy", 0.9),
            ("Excitement", 0.8),
            ("Calmness", 0.3),
            ("Anger", 0.1),
        ]);

        let top = scores.top_emotions(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], ("Joy".to_string(), 0.9));
        assert_eq!(top[1], ("Excitement".to_string(), 0.8));
        assert_eq!(top[2], ("Calmness".to_string(), 0.3));
    }

    #[test]
    fn test_prosody_scores_are_clamped() {
        let scores = scores(&[("Joy", 1.7), ("Doubt", -0.2), ("Broken", f32::NAN)]);
        let top = scores.top_emotions(5);
        assert_eq!(top, vec![("Joy".to_string(), 1.0), ("Doubt".to_string(), 0.0)]);
    }

    #[test]
    fn test_serialize_session_settings() {
        let msg = EVIClientMessage::SessionSettings(SessionSettings {
            audio: Some(AudioSettings {
                encoding: ChunkEncoding::Linear16,
                sample_rate: 16000,
                channels: 1,
            }),
            system_prompt: None,
        });

        let json: serde_json::Value =
            serde_json::from_str(&serialize_client_message(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "session_settings");
        assert_eq!(json["audio"]["encoding"], "linear16");
        assert_eq!(json["audio"]["sample_rate"], 16000);
        assert!(json.get("system_prompt").is_none());
    }

    #[test]
    fn test_serialize_audio_input() {
        let msg = EVIClientMessage::AudioInput(AudioInput::from_bytes(&[1, 2, 3]));
        let json: serde_json::Value =
            serde_json::from_str(&serialize_client_message(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "audio_input");
        assert_eq!(json["data"], "AQID");
    }

    #[test]
    fn test_serialize_user_input() {
        let msg = EVIClientMessage::UserInput(UserInput {
            text: "[Looking at an image] a bowl of pasta".to_string(),
        });
        let json: serde_json::Value =
            serde_json::from_str(&serialize_client_message(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "user_input");
        assert_eq!(json["text"], "[Looking at an image] a bowl of pasta");
    }

    #[test]
    fn test_deserialize_chat_metadata() {
        let json = r#"{
            "type": "chat_metadata",
            "chat_id": "chat_abc123",
            "chat_group_id": "group_xyz789"
        }"#;

        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::ChatMetadata(meta) => {
                assert_eq!(meta.chat_id, "chat_abc123");
                assert_eq!(meta.chat_group_id, "group_xyz789");
            }
            other => panic!("Expected ChatMetadata, got {}", other.kind()),
        }
    }

    #[test]
    fn test_deserialize_user_message() {
        let json = r#"{
            "type": "user_message",
            "id": "msg_001",
            "message": { "role": "user", "content": "Hello!" },
            "models": { "prosody": { "scores": { "Joy": 0.85, "Excitement": 0.6 } } }
        }"#;

        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserMessage(user_msg) => {
                assert_eq!(user_msg.message.content, "Hello!");
                let scores = user_msg.prosody_scores().unwrap();
                assert_eq!(scores.0["Joy"], 0.85);
                assert_eq!(scores.0["Excitement"], 0.6);
            }
            other => panic!("Expected UserMessage, got {}", other.kind()),
        }
    }

    #[test]
    fn test_deserialize_user_message_without_models() {
        let json = r#"{"type": "user_message", "message": {"role": "user", "content": "hi"}}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserMessage(user_msg) => {
                assert!(user_msg.prosody_scores().is_none());
            }
            other => panic!("Expected UserMessage, got {}", other.kind()),
        }
    }

    #[test]
    fn test_empty_prosody_counts_as_missing() {
        let json = r#"{"type": "user_message", "message": {"role": "user", "content": "hi"}, "models": {"prosody": {"scores": {}}}}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserMessage(user_msg) => {
                assert!(user_msg.prosody_scores().is_none());
            }
            other => panic!("Expected UserMessage, got {}", other.kind()),
        }
    }

    #[test]
    fn test_deserialize_audio_output() {
        let audio_data = vec![1u8, 2, 3, 4, 5];
        let encoded = BASE64.encode(&audio_data);
        let json = format!(r#"{{"type": "audio_output", "id": "audio_001", "data": "{encoded}"}}"#);

        match deserialize_server_message(&json).unwrap() {
            EVIServerMessage::AudioOutput(output) => {
                assert_eq!(output.decode_audio().unwrap(), audio_data);
            }
            other => panic!("Expected AudioOutput, got {}", other.kind()),
        }
    }

    #[test]
    fn test_deserialize_interruption_and_end() {
        let msg = deserialize_server_message(r#"{"type": "user_interruption", "time": 1200}"#)
            .unwrap();
        assert_eq!(msg.kind(), "user_interruption");

        let msg = deserialize_server_message(r#"{"type": "assistant_end"}"#).unwrap();
        assert_eq!(msg.kind(), "assistant_end");
    }

    #[test]
    fn test_deserialize_error() {
        let json = r#"{"type": "error", "code": "E0101", "message": "Too many requests"}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::Error(err) => {
                assert_eq!(err.code.as_deref(), Some("E0101"));
                assert!(err.message.contains("Too many"));
            }
            other => panic!("Expected Error, got {}", other.kind()),
        }
    }

    #[test]
    fn test_deserialize_unknown_message() {
        let json = r#"{"type": "tool_call", "name": "get_weather"}"#;
        let msg = deserialize_server_message(json).unwrap();
        assert!(matches!(msg, EVIServerMessage::Unknown));
    }
}
