//! Anthropic Messages API backend.
//!
//! Text parts are sent as `text` blocks and images as base64 `image` blocks,
//! all inside a single user turn.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CompletionError;
use crate::types::{Completion, CompletionRequest, CompletionService, ContentPart, Usage};

/// Default Messages API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key unless overridden
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Connection settings for [`AnthropicBackend`].
#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        AnthropicConfig {
            api_key: std::env::var(DEFAULT_API_KEY_ENV).ok(),
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AnthropicConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Read the API key from a custom environment variable.
    pub fn from_env_var(api_key_env: &str) -> Self {
        AnthropicConfig {
            api_key: std::env::var(api_key_env).ok(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`CompletionService`] over the Anthropic Messages API.
///
/// The underlying `reqwest::Client` is connection-pooled and cheap to share;
/// the backend holds no per-request state.
#[derive(Clone)]
pub struct AnthropicBackend {
    config: AnthropicConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl AnthropicBackend {
    /// Build a backend.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::Misconfiguration`] when no API key is set or
    /// the HTTP client cannot be built.
    pub fn new(config: AnthropicConfig) -> crate::Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            CompletionError::Misconfiguration(format!(
                "Anthropic API key not found. Set {} or pass one explicitly.",
                DEFAULT_API_KEY_ENV
            ))
        })?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fanfold-llm/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CompletionError::Misconfiguration(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    pub fn from_env() -> crate::Result<Self> {
        Self::new(AnthropicConfig::from_env())
    }

    fn build_body(request: &CompletionRequest) -> MessagesRequest {
        let engine = base64::engine::general_purpose::STANDARD;
        let content = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => RequestBlock::Text { text: text.clone() },
                ContentPart::Image(image) => RequestBlock::Image {
                    source: ImageSource {
                        source_type: "base64",
                        media_type: image.media_type.clone(),
                        data: engine.encode(&image.bytes),
                    },
                },
            })
            .collect();

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content,
            }],
        }
    }
}

#[async_trait]
impl CompletionService for AnthropicBackend {
    async fn complete(&self, request: CompletionRequest) -> crate::Result<Completion> {
        debug!(
            provider = "anthropic",
            model = %request.model,
            max_tokens = request.max_tokens,
            images = request.image_count(),
            "Invoking Anthropic backend"
        );

        let body = Self::build_body(&request);

        let response = self
            .http_client
            .post(&self.config.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(self.config.request_timeout)
                } else {
                    CompletionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            CompletionError::Transport(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let text = parsed.joined_text();
        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        debug!(
            provider = "anthropic",
            tokens_input = ?parsed.usage.map(|u| u.input_tokens),
            tokens_output = ?parsed.usage.map(|u| u.output_tokens),
            "Anthropic invocation completed"
        );

        Ok(Completion {
            text,
            model: parsed.model.unwrap_or(request.model),
            usage: parsed.usage,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl MessagesResponse {
    fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageBlob;

    #[test]
    fn test_missing_api_key_is_misconfiguration() {
        let config = AnthropicConfig {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(5),
        };
        let err = AnthropicBackend::new(config).unwrap_err();
        assert!(matches!(err, CompletionError::Misconfiguration(_)));
    }

    #[test]
    fn test_request_body_keeps_part_order_and_encodes_images() {
        let request = CompletionRequest::new(
            "claude-3-haiku-20240307",
            vec![
                ContentPart::Image(ImageBlob::png(vec![0xde, 0xad, 0xbe, 0xef])),
                ContentPart::text("Extract revenue."),
            ],
            2048,
        );
        let body = serde_json::to_value(AnthropicBackend::build_body(&request)).unwrap();

        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["max_tokens"], 2048);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], "3q2+7w==");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "Extract revenue.");
    }

    #[test]
    fn test_response_text_blocks_are_joined() {
        let raw = serde_json::json!({
            "model": "claude-3-opus-20240229",
            "content": [
                {"type": "text", "text": "Revenue "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "grew."}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let parsed: MessagesResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.joined_text(), "Revenue grew.");
        assert_eq!(parsed.usage.unwrap().output_tokens, 3);
    }

    #[test]
    fn test_backend_debug_redacts_key() {
        let config = AnthropicConfig::from_env().with_api_key("sk-backend-secret");
        let backend = AnthropicBackend::new(config).unwrap();
        let dbg = format!("{:?}", backend);
        assert!(dbg.starts_with("AnthropicBackend"));
        assert!(!dbg.contains("sk-backend-secret"));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = AnthropicConfig::from_env().with_api_key("sk-secret");
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
