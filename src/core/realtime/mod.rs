//! Realtime voice transport.
//!
//! The session talks to the voice service through the [`TransportConnector`]
//! and [`RealtimeTransport`] traits; [`hume`] is the production
//! implementation.

mod base;
pub mod hume;

pub use base::{
    BoxedTransport, InputAudioFormat, RealtimeError, RealtimeResult,
    RealtimeTransport, TransportConnector, TransportEvent,
};
pub use hume::{
    EVIClientMessage, EVIServerMessage, EVIVersion, HumeEVIConfig, HumeEVIConnector,
    ProsodyScores,
};
