//! Realtime voice-session orchestration.
//!
//! [`SessionOrchestrator`] owns the lifecycle of one duplex conversation:
//! microphone capture streamed to the voice service, assistant audio played
//! back in order, interruption handling, mute, and the image side channel.
//! Status changes and conversation turns are published as
//! [`SessionEvent`]s for whatever UI drives the session.

mod error;
mod orchestrator;
mod types;

pub use error::{SessionError, SessionResult};
pub use orchestrator::{SessionInput, SessionOrchestrator};
pub use types::{
    ConversationTurn, SessionConfig, SessionEvent, SessionState, StatusKind, StatusUpdate,
    TurnRole,
};
