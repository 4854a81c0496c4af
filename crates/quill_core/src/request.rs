//! Request and response types for text generation.

use crate::Message;
use serde::{Deserialize, Serialize};

/// Generation request. Immutable once sent.
///
/// # Examples
///
/// ```
/// use quill_core::{GenerateRequest, Message};
///
/// let request = GenerateRequest::new(vec![Message::user("Hello")]).with_max_tokens(256);
/// assert_eq!(request.messages.len(), 1);
/// assert_eq!(request.max_tokens, Some(256));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerateRequest {
    /// Ordered conversation messages
    pub messages: Vec<Message>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Model identifier override
    pub model: Option<String>,
}

impl GenerateRequest {
    /// Creates a request from an ordered message list.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Sets the token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Total characters across all message bodies.
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Why generation stopped.
///
/// # Examples
///
/// ```
/// use quill_core::FinishReason;
///
/// assert_eq!(FinishReason::parse(Some("LENGTH")), FinishReason::Length);
/// assert_eq!(FinishReason::parse(Some("max_tokens")), FinishReason::Length);
/// assert_eq!(FinishReason::parse(Some("end_turn")), FinishReason::Unknown);
/// assert_eq!(FinishReason::parse(None), FinishReason::Unknown);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    derive_more::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop
    #[display("stop")]
    Stop,
    /// Truncated by the token cap
    #[display("length")]
    Length,
    /// Blocked by a provider content filter
    #[display("content_filter")]
    ContentFilter,
    /// Absent or unrecognised
    #[default]
    #[display("unknown")]
    Unknown,
}

impl FinishReason {
    /// Maps a provider's raw finish reason onto the four known values.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }

    /// True when the output was cut off by the token cap.
    pub fn is_truncated(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
    /// Total tokens
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Sums two usage records.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// One generation result.
///
/// # Examples
///
/// ```
/// use quill_core::{FinishReason, GenerateResponse};
///
/// let response = GenerateResponse::text("{\"a\": 1}");
/// assert_eq!(response.finish_reason, FinishReason::Stop);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerateResponse {
    /// Raw generated text
    pub text: String,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Token counters
    pub usage: TokenUsage,
}

impl GenerateResponse {
    /// A naturally-stopped response with no usage data.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        }
    }
}
