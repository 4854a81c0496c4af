//! Role agents and the runtime they share.
//!
//! Every JSON role goes through [`AgentRuntime::structured`], which applies the
//! generation mode: `template` never calls the driver, `auto` falls back to the
//! role's template when the repair loop comes back empty (or the driver keeps
//! failing), `llm` turns that situation into a `GenerationRequired` error.

mod editor;
mod memory;
mod planning;
mod writer;

pub use editor::{ReviewBrief, review_draft};
pub use memory::{compile_memory, template_memory};
pub use planning::{
    architect, character_director, screenwriter, template_characters, template_outline,
    template_tone, template_world, tone_setter,
};
pub use writer::{Draft, WriterBrief, template_prose, write_chapter};

use crate::repair::{DEFAULT_MAX_FIX_CHARS, SchemaCall, SchemaOutcome, invoke_with_schema};
use quill_core::{GenerateRequest, GenerateResponse, Message};
use quill_error::{GenerationError, GenerationErrorKind, QuillResult};
use quill_interface::{GenerationDriver, TraceSink};
use quill_retry::{CallSite, RetryExecutor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// How agents obtain their output.
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
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GenerationMode {
    /// Deterministic templates only, no driver calls
    #[display("template")]
    Template,
    /// Driver output required; unusable output is an error
    #[display("llm")]
    Llm,
    /// Driver first, template when the output is unusable
    #[default]
    #[display("auto")]
    Auto,
}

/// Output of a role plus whether the template produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Drafted<T> {
    /// The role's output
    pub value: T,
    /// True when the deterministic template was used
    pub used_fallback: bool,
}

impl<T> Drafted<T> {
    pub(crate) fn generated(value: T) -> Self {
        Self {
            value,
            used_fallback: false,
        }
    }

    pub(crate) fn template(value: T) -> Self {
        Self {
            value,
            used_fallback: true,
        }
    }
}

/// Driver, retry discipline and mode shared by every agent.
#[derive(Clone)]
pub struct AgentRuntime {
    driver: Option<Arc<dyn GenerationDriver>>,
    executor: RetryExecutor,
    mode: GenerationMode,
    max_fix_chars: usize,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("driver", &self.driver.as_ref().map(|d| d.model_name().to_string()))
            .field("mode", &self.mode)
            .field("max_fix_chars", &self.max_fix_chars)
            .finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Creates a runtime. `driver` may be `None` for template runs.
    pub fn new(driver: Option<Arc<dyn GenerationDriver>>, executor: RetryExecutor, mode: GenerationMode) -> Self {
        Self {
            driver,
            executor,
            mode,
            max_fix_chars: DEFAULT_MAX_FIX_CHARS,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Sets the repair prompt's raw-output budget.
    pub fn with_max_fix_chars(mut self, max_fix_chars: usize) -> Self {
        self.max_fix_chars = max_fix_chars;
        self
    }

    /// Sets sampling parameters for every call.
    pub fn with_sampling(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Configured mode.
    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    /// Run trace.
    pub fn trace(&self) -> &Arc<dyn TraceSink> {
        self.executor.trace()
    }

    /// The driver to call, `None` when no call should be made.
    fn active_driver(&self, node: &str) -> QuillResult<Option<&dyn GenerationDriver>> {
        match (self.mode, self.driver.as_deref()) {
            (GenerationMode::Template, _) => Ok(None),
            (_, Some(driver)) => Ok(Some(driver)),
            (GenerationMode::Llm, None) => Err(GenerationError::new(GenerationErrorKind::GenerationRequired(
                format!("{}: no generation driver configured", node),
            ))
            .into()),
            (GenerationMode::Auto, None) => Ok(None),
        }
    }

    /// Runs the schema-repair loop. `Ok(None)` means no call was made.
    pub async fn call_schema(&self, messages: &[Message], call: SchemaCall) -> QuillResult<Option<SchemaOutcome>> {
        let Some(driver) = self.active_driver(call.node())? else {
            return Ok(None);
        };
        let call = call
            .max_fix_chars(self.max_fix_chars)
            .sampling(self.max_tokens, self.temperature);
        invoke_with_schema(&self.executor, driver, messages, &call).await.map(Some)
    }

    /// Runs a JSON role under the mode policy.
    ///
    /// `Ok(None)` tells the caller to use its template.
    ///
    /// # Errors
    ///
    /// In `llm` mode: driver errors, and `GenerationRequired` when the repair
    /// loop came back empty.
    pub async fn structured(&self, messages: &[Message], call: SchemaCall) -> QuillResult<Option<Map<String, Value>>> {
        let node = call.node().to_string();
        match self.call_schema(messages, call).await {
            Ok(Some(outcome)) if outcome.ok => Ok(Some(outcome.value)),
            Ok(Some(outcome)) => self.unusable(&node, outcome.error.unwrap_or_default()),
            Ok(None) => Ok(None),
            Err(err) if self.mode == GenerationMode::Auto => {
                warn!(node = %node, error = %err, "Generation failed, using template");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// One free-text call through the retry executor. `Ok(None)` means the
    /// caller should use its template.
    ///
    /// # Errors
    ///
    /// Driver errors in `llm` mode.
    pub async fn prose(&self, messages: Vec<Message>, site: &CallSite) -> QuillResult<Option<GenerateResponse>> {
        let Some(driver) = self.active_driver(site.node())? else {
            return Ok(None);
        };
        let request = GenerateRequest {
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            model: None,
        };
        match self.executor.invoke(driver, &request, site).await {
            Ok(response) => Ok(Some(response)),
            Err(err) if self.mode == GenerationMode::Auto => {
                warn!(node = %site.node(), error = %err, "Generation failed, using template");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Mode policy for output that could not be used.
    pub(crate) fn unusable<T>(&self, node: &str, reason: String) -> QuillResult<Option<T>> {
        if self.mode == GenerationMode::Llm {
            return Err(GenerationError::new(GenerationErrorKind::GenerationRequired(format!(
                "{}: {}",
                node, reason
            )))
            .into());
        }
        warn!(node = %node, reason = %reason, "Unusable output, using template");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_interface::NullTrace;
    use quill_retry::RetryPolicy;

    #[test]
    fn test_mode_parses() {
        assert_eq!("LLM".parse::<GenerationMode>(), Ok(GenerationMode::Llm));
        assert_eq!("template".parse::<GenerationMode>(), Ok(GenerationMode::Template));
        assert!("manual".parse::<GenerationMode>().is_err());
        assert_eq!(GenerationMode::default().to_string(), "auto");
    }

    #[tokio::test]
    async fn test_llm_mode_without_driver_is_an_error() {
        let executor = RetryExecutor::new(RetryPolicy::default(), Arc::new(NullTrace));
        let strict = AgentRuntime::new(None, executor.clone(), GenerationMode::Llm);
        let err = strict
            .structured(&[Message::user("x")], SchemaCall::new("tone", "{}"))
            .await
            .unwrap_err();
        assert!(err.detail().contains("tone: no generation driver configured"));

        let auto = AgentRuntime::new(None, executor, GenerationMode::Auto);
        let out = auto
            .structured(&[Message::user("x")], SchemaCall::new("tone", "{}"))
            .await
            .unwrap();
        assert!(out.is_none());
    }
}
