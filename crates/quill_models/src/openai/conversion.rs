//! Conversions between Quill types and the chat-completions wire format.

use super::dto::{ChatMessage, ChatRequest, ChatResponse};
use quill_core::{FinishReason, GenerateRequest, GenerateResponse, TokenUsage};
use quill_error::{GenerationError, GenerationErrorKind, QuillResult};
use serde_json::Value;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Builds the wire request. `request.model` overrides the configured model.
pub fn to_chat_request(
    request: &GenerateRequest,
    default_model: &str,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
) -> QuillResult<ChatRequest> {
    let messages: Vec<ChatMessage> = request
        .messages
        .iter()
        .map(|m| ChatMessage::new(m.role, m.content.clone()))
        .collect();

    let mut builder = ChatRequest::builder();
    builder
        .model(request.model.clone().unwrap_or_else(|| default_model.to_string()))
        .messages(messages)
        .max_tokens(request.max_tokens.or(default_max_tokens))
        .temperature(request.temperature.or(default_temperature));

    builder.build().map_err(|e| {
        GenerationError::new(GenerationErrorKind::Malformed(format!(
            "Failed to build chat request: {}",
            e
        )))
        .into()
    })
}

/// Converts the first choice of a response.
pub fn from_chat_response(response: ChatResponse) -> QuillResult<GenerateResponse> {
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let choice = response.choices.into_iter().next().ok_or_else(|| {
        GenerationError::new(GenerationErrorKind::Malformed(
            "response has no choices".to_string(),
        ))
    })?;

    Ok(GenerateResponse {
        text: choice.message.and_then(|m| m.content).unwrap_or_default(),
        finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
        usage,
    })
}

/// Maps a non-success HTTP status onto a generation error kind.
///
/// 401/403 mean the key is missing or rejected. 408, 429 and 5xx map to
/// retryable kinds; every other status is a plain [`GenerationErrorKind::Http`].
pub fn classify_status(status: u16, body: &str) -> GenerationErrorKind {
    let message = error_message(body);
    match status {
        401 | 403 => GenerationErrorKind::MissingCredentials(format!("HTTP {}: {}", status, message)),
        408 => GenerationErrorKind::Timeout(format!("HTTP 408: {}", message)),
        429 => GenerationErrorKind::RateLimited(message),
        500 | 502 | 503 | 504 => GenerationErrorKind::Http { status, message },
        500..=599 => GenerationErrorKind::Unavailable(format!("HTTP {}: {}", status, message)),
        _ => GenerationErrorKind::Http { status, message },
    }
}

/// Maps a transport failure onto a generation error kind.
pub fn classify_transport(error: &reqwest::Error) -> GenerationErrorKind {
    if error.is_timeout() {
        GenerationErrorKind::Timeout(error.to_string())
    } else if error.is_decode() {
        GenerationErrorKind::Malformed(error.to_string())
    } else {
        GenerationErrorKind::Unavailable(error.to_string())
    }
}

/// Pulls `error.message` out of an OpenAI-style error body, else the raw body.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    message.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
