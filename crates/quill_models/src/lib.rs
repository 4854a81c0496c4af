//! Generation drivers for Quill.
//!
//! One provider family is supported: any server speaking the OpenAI
//! chat-completions protocol (hosted APIs, vLLM, llama.cpp, Ollama's `/v1`
//! endpoint). The pipeline only ever sees the [`GenerationDriver`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_models::{LlmConfig, OpenAiCompatClient};
//!
//! let config = LlmConfig {
//!     base_url: "http://localhost:11434".into(),
//!     model: "llama3.1".into(),
//!     ..Default::default()
//! };
//! let driver = OpenAiCompatClient::new(config)?;
//! ```
//!
//! [`GenerationDriver`]: quill_interface::GenerationDriver

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod openai;

pub use openai::{
    ChatChoice, ChatMessage, ChatReply, ChatRequest, ChatRequestBuilder, ChatResponse, ChatUsage,
    LlmConfig, OpenAiCompatClient, chat_endpoint, classify_status, classify_transport,
    from_chat_response, to_chat_request,
};
