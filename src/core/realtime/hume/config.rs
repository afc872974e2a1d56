//! Hume EVI connection configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_companion::core::realtime::hume::{HumeEVIConfig, EVIVersion};
//!
//! let config = HumeEVIConfig::new("your-api-key")
//!     .with_config_id("your-config-id")
//!     .with_version(EVIVersion::V3);
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::messages::HUME_EVI_WEBSOCKET_URL;

// =============================================================================
// EVI Version
// =============================================================================

/// EVI version to use for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EVIVersion {
    /// EVI version 2 (deprecated).
    #[serde(rename = "2")]
    V2,
    /// EVI version 3 (current, English only).
    #[default]
    #[serde(rename = "3")]
    V3,
    /// EVI version 4-mini (multilingual, lower latency).
    #[serde(rename = "4-mini")]
    V4Mini,
}

impl EVIVersion {
    /// Get the version string for API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            EVIVersion::V2 => "2",
            EVIVersion::V3 => "3",
            EVIVersion::V4Mini => "4-mini",
        }
    }

    /// Parse a version string as used in configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "2" => Some(EVIVersion::V2),
            "3" => Some(EVIVersion::V3),
            "4-mini" | "4mini" | "4_mini" => Some(EVIVersion::V4Mini),
            _ => None,
        }
    }

    /// Returns true if this version is deprecated.
    pub fn is_deprecated(&self) -> bool {
        matches!(self, EVIVersion::V2)
    }
}

impl std::fmt::Display for EVIVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Hume EVI Configuration
// =============================================================================

/// Configuration for connecting to Hume EVI (Empathic Voice Interface).
///
/// The API key gates the connection: without it the service rejects the
/// WebSocket upgrade. The EVI config id selects the prompt, voice and
/// language model configured in the Hume dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumeEVIConfig {
    /// API key for Hume AI.
    pub api_key: String,

    /// EVI configuration ID (created in Hume dashboard).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,

    /// Chat group ID for resuming a previous conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_chat_group_id: Option<String>,

    /// EVI version to use.
    #[serde(default)]
    pub evi_version: EVIVersion,

    /// Voice ID overriding the voice of the EVI configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    /// Enable verbose transcription for interim user messages.
    #[serde(default)]
    pub verbose_transcription: bool,

    /// System prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// WebSocket URL (defaults to Hume's production endpoint).
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

fn default_websocket_url() -> String {
    HUME_EVI_WEBSOCKET_URL.to_string()
}

fn default_connection_timeout() -> u64 {
    30
}

impl Default for HumeEVIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            config_id: None,
            resumed_chat_group_id: None,
            evi_version: EVIVersion::default(),
            voice_id: None,
            verbose_transcription: false,
            system_prompt: None,
            websocket_url: default_websocket_url(),
            connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

impl HumeEVIConfig {
    /// Create a new configuration with an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Set the EVI configuration ID.
    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }

    /// Set the EVI version.
    pub fn with_version(mut self, version: EVIVersion) -> Self {
        self.evi_version = version;
        self
    }

    /// Set the voice ID.
    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    /// Set chat group ID for resuming a conversation.
    pub fn with_chat_group(mut self, chat_group_id: impl Into<String>) -> Self {
        self.resumed_chat_group_id = Some(chat_group_id.into());
        self
    }

    /// Point the connection at a different endpoint.
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    /// Build the WebSocket URL with query parameters.
    pub fn build_websocket_url(&self) -> String {
        let mut url = self.websocket_url.clone();
        let mut params = Vec::new();

        fn encode(s: &str) -> String {
            url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
        }

        params.push(format!("api_key={}", encode(&self.api_key)));

        if let Some(ref config_id) = self.config_id {
            params.push(format!("config_id={}", encode(config_id)));
        }

        if let Some(ref chat_group_id) = self.resumed_chat_group_id {
            params.push(format!("resumed_chat_group_id={}", encode(chat_group_id)));
        }

        if let Some(ref voice_id) = self.voice_id {
            params.push(format!("voice_id={}", encode(voice_id)));
        }

        if self.verbose_transcription {
            params.push("verbose_transcription=true".to_string());
        }

        match self.evi_version {
            EVIVersion::V2 => params.push(format!("version={}", self.evi_version.as_str())),
            EVIVersion::V3 | EVIVersion::V4Mini => {
                params.push(format!("evi_version={}", self.evi_version.as_str()))
            }
        }

        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&params.join("&"));
        url
    }

    /// URL without the query string, safe to log.
    pub fn redacted_url(&self) -> &str {
        self.websocket_url
            .split('?')
            .next()
            .unwrap_or(&self.websocket_url)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.evi_version.is_deprecated() {
            warn!(
                version = self.evi_version.as_str(),
                "EVI version {} is deprecated, migrate to EVI 3 or 4-mini",
                self.evi_version
            );
        }

        if self.api_key.trim().is_empty() {
            return Err("Hume API key is required".to_string());
        }

        if !(self.websocket_url.starts_with("wss://") || self.websocket_url.starts_with("ws://")) {
            return Err(format!(
                "EVI URL must use ws:// or wss://, got {}",
                self.redacted_url()
            ));
        }

        if self.connection_timeout_seconds == 0 {
            return Err("Connection timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evi_version_parse() {
        assert_eq!(EVIVersion::parse("3"), Some(EVIVersion::V3));
        assert_eq!(EVIVersion::parse("4-MINI"), Some(EVIVersion::V4Mini));
        assert_eq!(EVIVersion::parse("1"), None);
        assert_eq!(EVIVersion::default(), EVIVersion::V3);
    }

    #[test]
    fn test_config_builder() {
        let config = HumeEVIConfig::new("test-key")
            .with_config_id("cfg_123")
            .with_version(EVIVersion::V4Mini)
            .with_voice("kora");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.config_id.as_deref(), Some("cfg_123"));
        assert_eq!(config.evi_version, EVIVersion::V4Mini);
        assert_eq!(config.voice_id.as_deref(), Some("kora"));
    }

    #[test]
    fn test_build_websocket_url_minimal() {
        let url = HumeEVIConfig::new("test-key").build_websocket_url();

        assert!(url.starts_with(HUME_EVI_WEBSOCKET_URL));
        assert!(url.contains("?api_key=test-key"));
        assert!(url.contains("evi_version=3"));
    }

    #[test]
    fn test_build_websocket_url_encodes_values() {
        let url = HumeEVIConfig::new("a b&c")
            .with_config_id("5e4ab7a7-c3e8")
            .with_chat_group("group/1")
            .build_websocket_url();

        assert!(url.contains("api_key=a+b%26c"));
        assert!(url.contains("config_id=5e4ab7a7-c3e8"));
        assert!(url.contains("resumed_chat_group_id=group%2F1"));
    }

    #[test]
    fn test_build_websocket_url_v2() {
        let url = HumeEVIConfig::new("k")
            .with_version(EVIVersion::V2)
            .build_websocket_url();
        assert!(url.contains("&version=2"));
    }

    #[test]
    fn test_redacted_url_hides_query() {
        let config = HumeEVIConfig::new("secret").with_websocket_url("ws://127.0.0.1:9/chat?x=1");
        assert_eq!(config.redacted_url(), "ws://127.0.0.1:9/chat");
        assert!(config.build_websocket_url().contains("?x=1&api_key=secret"));
    }

    #[test]
    fn test_validate() {
        assert!(HumeEVIConfig::default().validate().unwrap_err().contains("API key"));
        assert!(HumeEVIConfig::new("k").validate().is_ok());

        let bad_url = HumeEVIConfig::new("k").with_websocket_url("https://api.hume.ai");
        assert!(bad_url.validate().unwrap_err().contains("ws://"));

        let zero_timeout = HumeEVIConfig {
            connection_timeout_seconds: 0,
            ..HumeEVIConfig::new("k")
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_config_deserialization() {
        let json = r#"{"api_key": "my-key", "config_id": "cfg_456", "evi_version": "4-mini"}"#;
        let config: HumeEVIConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.api_key, "my-key");
        assert_eq!(config.evi_version, EVIVersion::V4Mini);
        assert_eq!(config.websocket_url, HUME_EVI_WEBSOCKET_URL);
        assert_eq!(config.connection_timeout_seconds, 30);
    }
}
