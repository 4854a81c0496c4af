//! Trait definitions for the generation capability and the project store.

use async_trait::async_trait;
use quill_core::{GenerateRequest, GenerateResponse};
use quill_error::QuillResult;
use serde_json::Value;

/// Text-generation capability.
///
/// Treated as a black box: implementations may fail with typed or untyped errors
/// and may return truncated or malformed text at any time. Per-call timeouts are
/// the implementation's responsibility.
#[async_trait]
pub trait GenerationDriver: Send + Sync {
    /// Generate text for an ordered message list.
    async fn generate(&self, req: &GenerateRequest) -> QuillResult<GenerateResponse>;

    /// Provider name (e.g., "openai-compatible").
    fn provider_name(&self) -> &'static str;

    /// Model identifier.
    fn model_name(&self) -> &str;
}

/// Hierarchical JSON/text store rooted at one project.
///
/// Keys are `/`-separated relative paths such as `canon/world.json` or
/// `memory/chapters/001.memory.json`. Every write replaces the whole object;
/// there is no partial-update API.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Loads a JSON document, `None` when absent.
    async fn read_json(&self, key: &str) -> QuillResult<Option<Value>>;

    /// Replaces a JSON document.
    async fn write_json(&self, key: &str, value: &Value) -> QuillResult<()>;

    /// Loads a text document, `None` when absent.
    async fn read_text(&self, key: &str) -> QuillResult<Option<String>>;

    /// Replaces a text document.
    async fn write_text(&self, key: &str, text: &str) -> QuillResult<()>;

    /// Appends to a text document, creating it when absent.
    async fn append_text(&self, key: &str, text: &str) -> QuillResult<()>;

    /// File names stored directly under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> QuillResult<Vec<String>>;

    /// Human-readable location of the project (directory path or label).
    fn location(&self) -> String;
}
