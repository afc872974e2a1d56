//! Base traits and types for the realtime voice transport.
//!
//! The transport is the duplex channel carrying audio input, text input and
//! server events between a session and the voice service. It is split in two
//! seams so the session state machine can run against a scripted fake:
//!
//! - [`TransportConnector`] opens a connection for one session.
//! - [`RealtimeTransport`] is the open connection, owned by that session.
//!
//! Incoming frames are not delivered through callbacks. The connector is
//! handed an [`mpsc::UnboundedSender`] and pushes every parsed server message
//! (and the final closure) as a [`TransportEvent`], which the session consumes
//! from its inbox.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use super::hume::messages::{EVIClientMessage, EVIServerMessage};
use crate::core::capture::ChunkEncoding;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime transport operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Something that happened on the transport, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A parsed server message.
    Message(EVIServerMessage),
    /// The connection is gone. Always the last event of a transport.
    Closed {
        /// Close reason or error text, when the remote supplied one.
        reason: Option<String>,
    },
}

/// Audio input format announced to the service when the connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAudioFormat {
    /// Encoding of every `audio_input` chunk.
    pub encoding: ChunkEncoding,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count.
    pub channels: u16,
}

// =============================================================================
// Traits
// =============================================================================

/// An open realtime connection exclusively owned by one session.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Queue a client message for sending.
    async fn send(&mut self, message: EVIClientMessage) -> RealtimeResult<()>;

    /// Close the connection.
    ///
    /// Best effort: closing an already-closed transport returns `Ok(())`.
    async fn close(&mut self) -> RealtimeResult<()>;

    /// Whether messages can currently be sent.
    fn is_open(&self) -> bool;
}

/// Boxed trait object for transports.
pub type BoxedTransport = Box<dyn RealtimeTransport>;

/// Opens transports for new sessions.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Whether the service accepts `audio_input` chunks in this encoding.
    fn supports_encoding(&self, encoding: ChunkEncoding) -> bool;

    /// Open a connection. Incoming events are pushed to `events` until the
    /// connection closes, after which a single [`TransportEvent::Closed`] is
    /// sent.
    async fn connect(
        &self,
        format: InputAudioFormat,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> RealtimeResult<BoxedTransport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_default_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = RealtimeError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }
}
