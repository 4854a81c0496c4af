//! OpenAI-compatible chat-completions driver.

mod client;
mod conversion;
mod dto;

pub use client::{LlmConfig, OpenAiCompatClient, chat_endpoint};
pub use conversion::{classify_status, classify_transport, from_chat_response, to_chat_request};
pub use dto::{
    ChatChoice, ChatMessage, ChatReply, ChatRequest, ChatRequestBuilder, ChatResponse, ChatUsage,
};
