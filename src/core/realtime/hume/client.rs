//! Hume EVI WebSocket transport.
//!
//! [`HumeEVIConnector`] opens one WebSocket per session and spawns a single
//! message loop that owns both halves of the socket. Outgoing messages are
//! queued on an unbounded channel; incoming frames are parsed and pushed to
//! the session as [`TransportEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_companion::core::realtime::hume::{HumeEVIConfig, HumeEVIConnector};
//! use waav_companion::core::realtime::{InputAudioFormat, TransportConnector};
//!
//! let connector = HumeEVIConnector::new(HumeEVIConfig::new("your-api-key"))?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut transport = connector.connect(format, tx).await?;
//! while let Some(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use super::config::HumeEVIConfig;
use super::messages::{
    AudioSettings, EVIClientMessage, SessionSettings, deserialize_server_message,
    serialize_client_message,
};
use crate::core::capture::ChunkEncoding;
use crate::core::realtime::base::{
    BoxedTransport, ConnectionState, InputAudioFormat, RealtimeError, RealtimeResult,
    RealtimeTransport, TransportConnector, TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for the loop to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

enum Outgoing {
    /// Serialized client message.
    Text(String),
    Close,
}

fn encode(message: &EVIClientMessage) -> RealtimeResult<String> {
    serialize_client_message(message).map_err(|e| RealtimeError::SerializationError(e.to_string()))
}

// =============================================================================
// Connector
// =============================================================================

/// Opens Hume EVI connections.
pub struct HumeEVIConnector {
    config: HumeEVIConfig,
}

impl HumeEVIConnector {
    /// Create a connector, validating the configuration up front.
    pub fn new(config: HumeEVIConfig) -> RealtimeResult<Self> {
        config
            .validate()
            .map_err(RealtimeError::InvalidConfiguration)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HumeEVIConfig {
        &self.config
    }

    /// Session settings to send right after connecting, if any.
    ///
    /// Raw PCM carries no header, so EVI has to be told the format. WAV
    /// chunks describe themselves.
    fn session_settings(&self, format: InputAudioFormat) -> Option<SessionSettings> {
        let audio = match format.encoding {
            ChunkEncoding::Linear16 => Some(AudioSettings {
                encoding: format.encoding,
                sample_rate: format.sample_rate,
                channels: format.channels,
            }),
            ChunkEncoding::Wav => None,
        };

        if audio.is_none() && self.config.system_prompt.is_none() {
            return None;
        }

        Some(SessionSettings {
            audio,
            system_prompt: self.config.system_prompt.clone(),
        })
    }
}

#[async_trait]
impl TransportConnector for HumeEVIConnector {
    fn supports_encoding(&self, encoding: ChunkEncoding) -> bool {
        matches!(encoding, ChunkEncoding::Linear16 | ChunkEncoding::Wav)
    }

    async fn connect(
        &self,
        format: InputAudioFormat,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> RealtimeResult<BoxedTransport> {
        let url = self.config.build_websocket_url();
        debug!("Connecting to Hume EVI: {}", self.config.redacted_url());

        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let connect_timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let (ws_stream, response) = match timeout(connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(tungstenite::Error::Http(response)))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                *state.write() = ConnectionState::Failed;
                return Err(RealtimeError::AuthenticationFailed(format!(
                    "EVI rejected credentials (status {})",
                    response.status()
                )));
            }
            Ok(Err(e)) => {
                *state.write() = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(format!(
                    "WebSocket connection failed: {e}"
                )));
            }
            Err(_) => {
                *state.write() = ConnectionState::Failed;
                return Err(RealtimeError::Timeout("Connection timed out".to_string()));
            }
        };

        info!("Connected to Hume EVI (status: {})", response.status());

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(settings) = self.session_settings(format) {
            debug!(encoding = %format.encoding, sample_rate = format.sample_rate, "Sending session settings");
            let json = encode(&EVIClientMessage::SessionSettings(settings))?;
            let _ = tx.send(Outgoing::Text(json));
        }

        *state.write() = ConnectionState::Connected;
        let task = tokio::spawn(message_loop(ws_stream, rx, state.clone(), events));

        Ok(Box::new(HumeEVITransport {
            outgoing: Some(tx),
            state,
            task: Some(task),
        }))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// An open EVI connection.
pub struct HumeEVITransport {
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    state: Arc<RwLock<ConnectionState>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl RealtimeTransport for HumeEVITransport {
    async fn send(&mut self, message: EVIClientMessage) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotConnected);
        }
        let json = encode(&message)?;
        let sender = self.outgoing.as_ref().ok_or(RealtimeError::NotConnected)?;
        sender
            .send(Outgoing::Text(json))
            .map_err(|e| RealtimeError::WebSocketError(format!("Failed to queue message: {e}")))
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        if let Some(sender) = self.outgoing.take() {
            let _ = sender.send(Outgoing::Close);
        }

        if let Some(mut task) = self.task.take() {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("EVI message loop did not stop in time, aborting");
                task.abort();
            }
            info!("Disconnected from Hume EVI");
        }

        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.outgoing.is_some() && *self.state.read() == ConnectionState::Connected
    }
}

impl Drop for HumeEVITransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the socket until either side closes it.
async fn message_loop(
    ws_stream: WsStream,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    state: Arc<RwLock<ConnectionState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut reason: Option<String> = None;

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Text(json)) => {
                    trace!("Sending EVI message: {}", json.chars().take(100).collect::<String>());
                    if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                        error!("Failed to send WebSocket message: {e}");
                        reason = Some(e.to_string());
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    reason = Some("closed by client".to_string());
                    break;
                }
            },

            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    trace!("Received EVI message: {}", text.chars().take(100).collect::<String>());
                    match deserialize_server_message(&text) {
                        Ok(msg) => {
                            if events.send(TransportEvent::Message(msg)).is_err() {
                                debug!("Session stopped listening, closing EVI connection");
                                let _ = ws_write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed EVI message: {e}"),
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring binary message: {} bytes", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed: {:?}", frame);
                    reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_write.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {e}");
                    reason = Some(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    *state.write() = ConnectionState::Disconnected;
    let _ = events.send(TransportEvent::Closed { reason });
    info!("Hume EVI message loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> HumeEVIConnector {
        HumeEVIConnector::new(HumeEVIConfig::new("test-key")).unwrap()
    }

    fn format(encoding: ChunkEncoding) -> InputAudioFormat {
        InputAudioFormat {
            encoding,
            sample_rate: 16000,
            channels: 1,
        }
    }

    #[test]
    fn test_connector_rejects_empty_key() {
        let result = HumeEVIConnector::new(HumeEVIConfig::new(""));
        assert!(matches!(result, Err(RealtimeError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_linear16_announces_format() {
        let settings = connector()
            .session_settings(format(ChunkEncoding::Linear16))
            .unwrap();
        let audio = settings.audio.unwrap();
        assert_eq!(audio.encoding, ChunkEncoding::Linear16);
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 1);
    }

    #[test]
    fn test_wav_needs_no_settings() {
        assert!(connector().session_settings(format(ChunkEncoding::Wav)).is_none());
    }

    #[test]
    fn test_system_prompt_forces_settings() {
        let mut config = HumeEVIConfig::new("test-key");
        config.system_prompt = Some("Be brief.".into());
        let connector = HumeEVIConnector::new(config).unwrap();
        let settings = connector.session_settings(format(ChunkEncoding::Wav)).unwrap();
        assert!(settings.audio.is_none());
        assert_eq!(settings.system_prompt.as_deref(), Some("Be brief."));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = HumeEVIConfig::new("test-key").with_websocket_url("ws://127.0.0.1:1/chat");
        let connector = HumeEVIConnector::new(config).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = connector.connect(format(ChunkEncoding::Wav), tx).await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }
}
