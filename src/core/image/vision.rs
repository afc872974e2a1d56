//! Image description through an OpenAI vision model.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroize;

use super::ImagePayload;

/// Used whenever no describer is configured or the request fails.
pub const FALLBACK_DESCRIPTION: &str =
    "I can see you've shared an image. Tell me what you'd like to know about it!";

/// Used when the model answers with nothing.
pub const EMPTY_DESCRIPTION: &str = "I can see an image but couldn't identify what's in it.";

const DESCRIBE_PROMPT: &str = "Describe this image briefly for a cooking AI. What food, ingredients, or kitchen items do you see? 1-2 sentences, conversational.";

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MAX_TOKENS: u32 = 150;

#[derive(Debug, Error)]
pub enum VisionRequestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid vision response: {0}")]
    InvalidResponse(String),
}

/// Produces a short natural-language description of an image.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(&self, image: &ImagePayload) -> Result<String, VisionRequestError>;
}

/// Describe `image`, falling back to [`FALLBACK_DESCRIPTION`] when there is
/// no describer or the request fails.
pub async fn describe_or_fallback(
    describer: Option<&dyn VisionDescriber>,
    image: &ImagePayload,
) -> String {
    let Some(describer) = describer else {
        return FALLBACK_DESCRIPTION.to_string();
    };

    match describer.describe(image).await {
        Ok(description) => description,
        Err(e) => {
            warn!("Image description failed, using fallback: {e}");
            FALLBACK_DESCRIPTION.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIVisionConfig {
    pub api_key: String,
    pub model: String,
    /// Scheme and host, without the `/v1` path.
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAIVisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_VISION_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Drop for OpenAIVisionConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client asking a vision model about one image.
pub struct OpenAIVision {
    client: reqwest::Client,
    config: OpenAIVisionConfig,
}

impl OpenAIVision {
    pub fn new(config: OpenAIVisionConfig) -> Result<Self, VisionRequestError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_http_request(&self, image: &ImagePayload) -> reqwest::RequestBuilder {
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": DESCRIBE_PROMPT },
                    { "type": "image_url", "image_url": { "url": image.to_data_url() } }
                ]
            }],
            "max_tokens": self.config.max_tokens,
        });

        self.client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl VisionDescriber for OpenAIVision {
    async fn describe(&self, image: &ImagePayload) -> Result<String, VisionRequestError> {
        debug!(
            model = %self.config.model,
            mime_type = image.mime_type,
            bytes = image.data.len(),
            "Requesting image description"
        );

        let response = self.build_http_request(image).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionRequestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| VisionRequestError::InvalidResponse(e.to_string()))?;

        let description = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_DESCRIPTION.to_string());

        Ok(description)
    }
}
