//! Configuration for the companion.
//!
//! Values come from environment variables (the binary loads `.env` first)
//! and an optional YAML file. Priority: YAML > ENV vars > .env values >
//! defaults.
//!
//! # Example
//! ```rust,no_run
//! use waav_companion::config::CompanionConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = CompanionConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = CompanionConfig::from_file(Path::new("companion.yaml"))?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod env;
mod yaml;

pub use yaml::{HumeYaml, OpenAIYaml, SessionYaml, YamlConfig};

use crate::core::capture::MuteGate;
use crate::core::image::OpenAIVisionConfig;
use crate::core::realtime::{EVIVersion, HumeEVIConfig};
use crate::core::session::SessionConfig;

/// Shortest and longest accepted chunk cadence.
const CHUNK_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 20..=1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Companion configuration
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    // Hume EVI
    pub hume_api_key: String,
    pub hume_config_id: Option<String>,
    pub hume_evi_url: String,
    pub evi_version: EVIVersion,
    pub voice_id: Option<String>,
    pub system_prompt: Option<String>,

    // Vision (optional; without a key images get the static description)
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub vision_model: String,

    // Session behavior
    pub chunk_interval_ms: u64,
    pub mute_gate: MuteGate,
    pub turn_end_grace_ms: u64,
    pub top_emotions: usize,
    pub assistant_name: String,
    pub greeting: String,
    pub farewell: String,
}

/// Zeroize secrets when the configuration is dropped.
impl Drop for CompanionConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.hume_api_key.zeroize();
        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl CompanionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, then apply overrides
    /// from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), ConfigError> {
        if let Some(hume) = yaml.hume {
            if let Some(key) = hume.api_key {
                self.hume_api_key = key;
            }
            if hume.config_id.is_some() {
                self.hume_config_id = hume.config_id;
            }
            if let Some(url) = hume.url {
                self.hume_evi_url = url;
            }
            if let Some(version) = hume.evi_version {
                self.evi_version =
                    EVIVersion::parse(&version).ok_or(ConfigError::InvalidValue {
                        key: "hume.evi_version",
                        value: version,
                    })?;
            }
            if hume.voice_id.is_some() {
                self.voice_id = hume.voice_id;
            }
            if hume.system_prompt.is_some() {
                self.system_prompt = hume.system_prompt;
            }
        }

        if let Some(openai) = yaml.openai {
            if openai.api_key.is_some() {
                self.openai_api_key = openai.api_key;
            }
            if let Some(base_url) = openai.base_url {
                self.openai_base_url = base_url;
            }
            if let Some(model) = openai.vision_model {
                self.vision_model = model;
            }
        }

        if let Some(session) = yaml.session {
            if let Some(ms) = session.chunk_interval_ms {
                self.chunk_interval_ms = ms;
            }
            if let Some(gate) = session.mute_gate {
                self.mute_gate = MuteGate::parse(&gate).ok_or(ConfigError::InvalidValue {
                    key: "session.mute_gate",
                    value: gate,
                })?;
            }
            if let Some(ms) = session.turn_end_grace_ms {
                self.turn_end_grace_ms = ms;
            }
            if let Some(n) = session.top_emotions {
                self.top_emotions = n;
            }
            if let Some(name) = session.assistant_name {
                self.assistant_name = name;
            }
            if let Some(greeting) = session.greeting {
                self.greeting = greeting;
            }
            if let Some(farewell) = session.farewell {
                self.farewell = farewell;
            }
        }

        Ok(())
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hume_api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "HUME_API_KEY is required to open a session".to_string(),
            ));
        }
        if !CHUNK_INTERVAL_RANGE_MS.contains(&self.chunk_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "Chunk interval must be between {} and {} ms, got {}",
                CHUNK_INTERVAL_RANGE_MS.start(),
                CHUNK_INTERVAL_RANGE_MS.end(),
                self.chunk_interval_ms
            )));
        }
        self.hume_config().validate().map_err(ConfigError::Invalid)
    }

    /// Whether images will be described by a vision model.
    pub fn has_vision(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    pub fn hume_config(&self) -> HumeEVIConfig {
        let mut config = HumeEVIConfig::new(self.hume_api_key.clone())
            .with_version(self.evi_version)
            .with_websocket_url(self.hume_evi_url.clone());
        if let Some(ref config_id) = self.hume_config_id {
            config = config.with_config_id(config_id.clone());
        }
        if let Some(ref voice_id) = self.voice_id {
            config = config.with_voice(voice_id.clone());
        }
        config.system_prompt = self.system_prompt.clone();
        config
    }

    /// Vision client settings, when an OpenAI key is configured.
    pub fn vision_config(&self) -> Option<OpenAIVisionConfig> {
        if !self.has_vision() {
            return None;
        }
        let key = self.openai_api_key.clone()?;
        Some(
            OpenAIVisionConfig::new(key)
                .with_model(self.vision_model.clone())
                .with_base_url(self.openai_base_url.clone()),
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_interval: Duration::from_millis(self.chunk_interval_ms),
            mute_gate: self.mute_gate,
            turn_end_grace: Duration::from_millis(self.turn_end_grace_ms),
            top_emotions: self.top_emotions,
            assistant_name: self.assistant_name.clone(),
            greeting: self.greeting.clone(),
            farewell: self.farewell.clone(),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_KEYS: [&str; 12] = [
        "HUME_API_KEY",
        "HUME_CONFIG_ID",
        "HUME_EVI_URL",
        "HUME_EVI_VERSION",
        "HUME_VOICE_ID",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "VISION_MODEL",
        "CHUNK_INTERVAL_MS",
        "MUTE_GATE",
        "TURN_END_GRACE_MS",
        "TOP_EMOTIONS",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for key in ENV_KEYS {
                std::env::remove_var(key);
            }
        }
    }

    fn base() -> CompanionConfig {
        let defaults = SessionConfig::default();
        CompanionConfig {
            hume_api_key: "hume-key".to_string(),
            hume_config_id: None,
            hume_evi_url: "wss://api.hume.ai/v0/evi/chat".to_string(),
            evi_version: EVIVersion::default(),
            voice_id: None,
            system_prompt: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".to_string(),
            vision_model: "gpt-4o".to_string(),
            chunk_interval_ms: 100,
            mute_gate: MuteGate::default(),
            turn_end_grace_ms: 0,
            top_emotions: 3,
            assistant_name: defaults.assistant_name.clone(),
            greeting: defaults.greeting.clone(),
            farewell: defaults.farewell.clone(),
        }
    }

    #[test]
    fn test_validate_requires_hume_key() {
        let mut config = base();
        config.hume_api_key = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_chunk_interval_range() {
        let mut config = base();
        config.chunk_interval_ms = 80;
        assert!(config.validate().is_ok());
        config.chunk_interval_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_overrides() {
        let mut config = base();
        let yaml: YamlConfig = serde_yaml::from_str(
            r#"
hume:
  config_id: "cfg-9"
openai:
  api_key: "sk-yaml"
session:
  mute_gate: "adapter"
  assistant_name: "Remy"
"#,
        )
        .unwrap();
        config.apply_yaml(yaml).unwrap();

        assert_eq!(config.hume_api_key, "hume-key");
        assert_eq!(config.hume_config_id.as_deref(), Some("cfg-9"));
        assert_eq!(config.mute_gate, MuteGate::Adapter);
        assert_eq!(config.assistant_name, "Remy");
        assert!(config.has_vision());
    }

    #[test]
    fn test_yaml_rejects_unknown_gate() {
        let mut config = base();
        let yaml: YamlConfig = serde_yaml::from_str("session:\n  mute_gate: sideways\n").unwrap();
        assert!(matches!(
            config.apply_yaml(yaml),
            Err(ConfigError::InvalidValue { key: "session.mute_gate", .. })
        ));
    }

    #[test]
    fn test_derived_configs() {
        let mut config = base();
        config.hume_config_id = Some("cfg-1".to_string());
        config.turn_end_grace_ms = 500;

        let hume = config.hume_config();
        assert_eq!(hume.config_id.as_deref(), Some("cfg-1"));
        assert!(hume.build_websocket_url().contains("config_id=cfg-1"));

        let session = config.session_config();
        assert_eq!(session.turn_end_grace, Duration::from_millis(500));
        assert_eq!(session.top_emotions, 3);

        assert!(config.vision_config().is_none());
        config.openai_api_key = Some("sk-test".to_string());
        assert_eq!(config.vision_config().unwrap().model, "gpt-4o");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("HUME_API_KEY", "env-hume-key");
        }

        let config = CompanionConfig::from_env().unwrap();
        assert_eq!(config.hume_api_key, "env-hume-key");
        assert_eq!(config.hume_evi_url, "wss://api.hume.ai/v0/evi/chat");
        assert_eq!(config.chunk_interval_ms, 100);
        assert_eq!(config.mute_gate, MuteGate::SendBoundary);
        assert_eq!(config.turn_end_grace_ms, 0);
        assert_eq!(config.top_emotions, 3);
        assert!(!config.has_vision());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("HUME_API_KEY", "env-hume-key");
            std::env::set_var("HUME_CONFIG_ID", "cfg-env");
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("VISION_MODEL", "gpt-4o-mini");
            std::env::set_var("CHUNK_INTERVAL_MS", "80");
            std::env::set_var("MUTE_GATE", "adapter");
            std::env::set_var("TURN_END_GRACE_MS", "250");
            std::env::set_var("TOP_EMOTIONS", "5");
        }

        let config = CompanionConfig::from_env().unwrap();
        assert_eq!(config.hume_config_id.as_deref(), Some("cfg-env"));
        assert_eq!(config.chunk_interval_ms, 80);
        assert_eq!(config.mute_gate, MuteGate::Adapter);
        assert_eq!(config.turn_end_grace_ms, 250);
        assert_eq!(config.top_emotions, 5);
        assert_eq!(config.vision_config().unwrap().model, "gpt-4o-mini");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_errors() {
        cleanup_env_vars();
        assert!(matches!(
            CompanionConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));

        unsafe {
            std::env::set_var("HUME_API_KEY", "env-hume-key");
            std::env::set_var("CHUNK_INTERVAL_MS", "fast");
        }
        assert!(matches!(
            CompanionConfig::from_env(),
            Err(ConfigError::InvalidValue { key: "CHUNK_INTERVAL_MS", .. })
        ));

        unsafe {
            std::env::remove_var("CHUNK_INTERVAL_MS");
            std::env::set_var("MUTE_GATE", "sideways");
        }
        assert!(matches!(
            CompanionConfig::from_env(),
            Err(ConfigError::InvalidValue { key: "MUTE_GATE", .. })
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("companion.yaml");
        let yaml_content = r#"
hume:
  api_key: "yaml-hume-key"
session:
  chunk_interval_ms: 50
  turn_end_grace_ms: 400
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            std::env::set_var("HUME_API_KEY", "env-hume-key");
            std::env::set_var("HUME_CONFIG_ID", "cfg-env");
            std::env::set_var("CHUNK_INTERVAL_MS", "120");
        }

        let config = CompanionConfig::from_file(&config_path).unwrap();
        assert_eq!(config.hume_api_key, "yaml-hume-key");
        assert_eq!(config.hume_config_id.as_deref(), Some("cfg-env"));
        assert_eq!(config.chunk_interval_ms, 50);
        assert_eq!(config.turn_end_grace_ms, 400);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing() {
        cleanup_env_vars();
        let result = CompanionConfig::from_file(Path::new("/nonexistent/companion.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
