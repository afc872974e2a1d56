use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; anything set here overrides the environment.
///
/// # Example YAML structure
/// ```yaml
/// hume:
///   api_key: "your-hume-key"
///   config_id: "your-config-id"
///   url: "wss://api.hume.ai/v0/evi/chat"
///   evi_version: "3"
///   voice_id: "kora"
///   system_prompt: "You are a friendly cooking companion."
///
/// openai:
///   api_key: "sk-..."
///   base_url: "https://api.openai.com"
///   vision_model: "gpt-4o"
///
/// session:
///   chunk_interval_ms: 100
///   mute_gate: "send_boundary"
///   turn_end_grace_ms: 0
///   top_emotions: 3
///   assistant_name: "Claire"
///   greeting: "Hey there! What's cooking?"
///   farewell: "Bye for now!"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub hume: Option<HumeYaml>,
    pub openai: Option<OpenAIYaml>,
    pub session: Option<SessionYaml>,
}

/// Hume EVI settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HumeYaml {
    pub api_key: Option<String>,
    pub config_id: Option<String>,
    pub url: Option<String>,
    pub evi_version: Option<String>,
    pub voice_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// OpenAI vision settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub vision_model: Option<String>,
}

/// Session behavior from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub chunk_interval_ms: Option<u64>,
    pub mute_gate: Option<String>,
    pub turn_end_grace_ms: Option<u64>,
    pub top_emotions: Option<usize>,
    pub assistant_name: Option<String>,
    pub greeting: Option<String>,
    pub farewell: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
