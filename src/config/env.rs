use std::env;
use std::str::FromStr;

use super::{CompanionConfig, ConfigError};
use crate::core::capture::MuteGate;
use crate::core::image::{DEFAULT_OPENAI_BASE_URL, DEFAULT_VISION_MODEL};
use crate::core::realtime::EVIVersion;
use crate::core::realtime::hume::HUME_EVI_WEBSOCKET_URL;
use crate::core::session::SessionConfig;

/// Read a variable, treating empty values as unset.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value,
        }),
        None => Ok(default),
    }
}

/// Build the configuration from environment variables and defaults.
pub(super) fn load() -> Result<CompanionConfig, ConfigError> {
    let defaults = SessionConfig::default();

    let mute_gate = match var("MUTE_GATE") {
        Some(value) => MuteGate::parse(&value).ok_or(ConfigError::InvalidValue {
            key: "MUTE_GATE",
            value,
        })?,
        None => MuteGate::default(),
    };

    let evi_version = match var("HUME_EVI_VERSION") {
        Some(value) => EVIVersion::parse(&value).ok_or(ConfigError::InvalidValue {
            key: "HUME_EVI_VERSION",
            value,
        })?,
        None => EVIVersion::default(),
    };

    Ok(CompanionConfig {
        hume_api_key: var("HUME_API_KEY").unwrap_or_default(),
        hume_config_id: var("HUME_CONFIG_ID"),
        hume_evi_url: var("HUME_EVI_URL").unwrap_or_else(|| HUME_EVI_WEBSOCKET_URL.to_string()),
        evi_version,
        voice_id: var("HUME_VOICE_ID"),
        system_prompt: None,
        openai_api_key: var("OPENAI_API_KEY"),
        openai_base_url: var("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        vision_model: var("VISION_MODEL").unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        chunk_interval_ms: parse_var(
            "CHUNK_INTERVAL_MS",
            defaults.chunk_interval.as_millis() as u64,
        )?,
        mute_gate,
        turn_end_grace_ms: parse_var("TURN_END_GRACE_MS", defaults.turn_end_grace.as_millis() as u64)?,
        top_emotions: parse_var("TOP_EMOTIONS", defaults.top_emotions)?,
        assistant_name: defaults.assistant_name.clone(),
        greeting: defaults.greeting.clone(),
        farewell: defaults.farewell.clone(),
    })
}
