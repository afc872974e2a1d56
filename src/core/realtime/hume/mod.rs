//! Hume Empathic Voice Interface (EVI) transport.
//!
//! # Audio Format
//!
//! - **Input**: Linear16 PCM (announced through `session_settings`) or WAV
//!   chunks, base64 encoded in `audio_input` messages
//! - **Output**: base64-encoded WAV, one complete file per `audio_output`
//!
//! # Prosody
//!
//! Every `user_message` carries prosody scores for the utterance:
//!
//! ```rust,ignore
//! use waav_companion::core::realtime::hume::ProsodyScores;
//!
//! fn show(scores: &ProsodyScores) {
//!     for (name, score) in scores.top_emotions(3) {
//!         println!("  {}: {:.2}", name, score);
//!     }
//! }
//! ```

mod client;
mod config;
pub mod messages;

pub use client::{HumeEVIConnector, HumeEVITransport};
pub use config::{EVIVersion, HumeEVIConfig};
pub use messages::{
    AudioInput, AudioOutput, AudioSettings, EVIClientMessage, EVIServerMessage, ProsodyScores,
    SessionSettings, UserInput, HUME_EVI_WEBSOCKET_URL,
};
