//! HTTP client for OpenAI-compatible servers.

use super::conversion::{classify_status, classify_transport, from_chat_response, to_chat_request};
use super::dto::ChatResponse;
use async_trait::async_trait;
use quill_core::{GenerateRequest, GenerateResponse};
use quill_error::{ConfigError, GenerationError, GenerationErrorKind, QuillResult};
use quill_interface::GenerationDriver;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Connection settings, the `[llm]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Server root; `/v1` is appended when missing
    pub base_url: String,
    /// Bearer token; omitted for local servers that need none
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Default sampling temperature
    pub temperature: Option<f32>,
    /// Default token cap
    pub max_tokens: Option<u32>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            model: String::new(),
            temperature: Some(0.7),
            max_tokens: Some(4096),
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// True when there is enough to attempt a call.
    pub fn is_usable(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.model.trim().is_empty()
    }
}

/// Full chat-completions URL for a configured base.
///
/// ```
/// use quill_models::chat_endpoint;
///
/// assert_eq!(chat_endpoint("http://localhost:8000"), "http://localhost:8000/v1/chat/completions");
/// assert_eq!(chat_endpoint("https://api.example.com/v1/"), "https://api.example.com/v1/chat/completions");
/// ```
pub fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

/// Driver for any server that speaks the chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: String,
    config: LlmConfig,
}

impl OpenAiCompatClient {
    /// Creates a client. The per-call timeout is enforced by the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the settings are incomplete or the
    /// HTTP client cannot be built.
    #[instrument(skip_all, fields(base_url = %config.base_url, model = %config.model))]
    pub fn new(config: LlmConfig) -> QuillResult<Self> {
        if !config.is_usable() {
            return Err(ConfigError::new("llm.base_url and llm.model are required").into());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ConfigError::new(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = chat_endpoint(&config.base_url);
        debug!(endpoint = %endpoint, "OpenAI-compatible client ready");

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    /// Resolved chat-completions URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationDriver for OpenAiCompatClient {
    #[instrument(skip(self, req), fields(provider = "openai-compatible", model = %self.config.model))]
    async fn generate(&self, req: &GenerateRequest) -> QuillResult<GenerateResponse> {
        let body = to_chat_request(
            req,
            &self.config.model,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::new(classify_transport(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Chat completion failed");
            return Err(GenerationError::new(classify_status(status.as_u16(), &text)).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::new(classify_transport(&e)))?;
        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            GenerationError::new(GenerationErrorKind::Malformed(format!(
                "Failed to parse chat response: {}",
                e
            )))
        })?;

        let converted = from_chat_response(parsed)?;
        debug!(
            chars = converted.text.chars().count(),
            finish_reason = %converted.finish_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat completion received"
        );
        Ok(converted)
    }

    fn provider_name(&self) -> &'static str {
        "openai-compatible"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_version_once() {
        assert_eq!(
            chat_endpoint("http://127.0.0.1:11434/"),
            "http://127.0.0.1:11434/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint(" https://api.example.com/v1 "),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let config = LlmConfig {
            model: "  ".into(),
            ..Default::default()
        };
        let err = OpenAiCompatClient::new(config).unwrap_err();
        assert_eq!(err.type_name(), "ConfigError");
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: LlmConfig =
            serde_json::from_str(r#"{"base_url": "http://localhost:8000", "model": "tiny"}"#)
                .unwrap();
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.api_key, None);

        let client = OpenAiCompatClient::new(config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8000/v1/chat/completions");
        assert_eq!(client.provider_name(), "openai-compatible");
        assert_eq!(client.model_name(), "tiny");
    }
}
