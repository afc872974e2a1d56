use thiserror::Error;

use super::types::SessionState;
use crate::core::image::ImageError;
use crate::core::media::MediaAccessError;
use crate::core::realtime::RealtimeError;

/// Errors surfaced by session operations.
///
/// Decode failures and vision failures never appear here; they are handled
/// inside the session and the conversation continues.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone or camera could not be acquired.
    #[error("Media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// The transport could not be opened.
    #[error("Could not connect: {0}")]
    Connect(#[source] RealtimeError),

    /// The transport failed mid-session.
    #[error("Transport failed: {0}")]
    Transport(#[source] RealtimeError),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("No image to send")]
    NoImage,

    #[error(transparent)]
    Image(#[from] ImageError),
}

pub type SessionResult<T> = Result<T, SessionError>;
