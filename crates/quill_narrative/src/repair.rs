//! Bounded schema-repair loop: one call, at most one corrective round.

use crate::extraction::{ParseResult, extract};
use quill_core::{FinishReason, GenerateRequest, GenerateResponse, Message, TokenUsage};
use quill_error::QuillResult;
use quill_interface::{GenerationDriver, trace_fields};
use quill_retry::{CallSite, RetryExecutor};
use quill_storage::truncate;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

/// Default character budget for raw output echoed into a repair prompt.
pub const DEFAULT_MAX_FIX_CHARS: usize = 12_000;

/// Semantic check over a parsed object: empty string means valid.
pub type Validator = Box<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

/// One structured-output call: who is asking, what shape is expected and how
/// to judge it.
pub struct SchemaCall {
    node: String,
    chapter_index: u32,
    schema: String,
    validate: Option<Validator>,
    max_fix_chars: usize,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl std::fmt::Debug for SchemaCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCall")
            .field("node", &self.node)
            .field("chapter_index", &self.chapter_index)
            .field("has_validator", &self.validate.is_some())
            .field("max_fix_chars", &self.max_fix_chars)
            .finish_non_exhaustive()
    }
}

impl SchemaCall {
    /// A project-level call for `node` expecting `schema`.
    pub fn new(node: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            chapter_index: 0,
            schema: schema.into(),
            validate: None,
            max_fix_chars: DEFAULT_MAX_FIX_CHARS,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Attributes the call to a chapter.
    pub fn chapter(mut self, chapter_index: u32) -> Self {
        self.chapter_index = chapter_index;
        self
    }

    /// Adds a semantic validator.
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        self.validate = Some(Box::new(validate));
        self
    }

    /// Caps how much raw output is echoed back in the repair prompt.
    pub fn max_fix_chars(mut self, max_fix_chars: usize) -> Self {
        self.max_fix_chars = max_fix_chars;
        self
    }

    /// Sampling parameters for both calls.
    pub fn sampling(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Node label.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Schema description.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn site(&self) -> CallSite {
        CallSite::new(self.node.clone(), self.chapter_index)
    }

    fn request(&self, messages: Vec<Message>) -> GenerateRequest {
        GenerateRequest {
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            model: None,
        }
    }

    /// Extracts and validates `text`.
    ///
    /// When the object parsed, a validation failure is reported as
    /// `validation_failed: <reason>`; otherwise the extractor diagnostic is
    /// returned unchanged.
    pub fn check(&self, text: &str) -> Result<Map<String, Value>, String> {
        match extract(text) {
            ParseResult::Ok(map) => {
                let verdict = self
                    .validate
                    .as_ref()
                    .map(|validate| validate(&map))
                    .unwrap_or_default();
                let verdict = verdict.trim();
                if verdict.is_empty() {
                    Ok(map)
                } else {
                    Err(format!("validation_failed: {}", verdict))
                }
            }
            ParseResult::Err(diagnostic) => Err(diagnostic),
        }
    }
}

/// What the loop obtained.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaOutcome {
    /// Validated object, empty on failure
    pub value: Map<String, Value>,
    /// Raw text of the last call that returned
    pub raw: String,
    /// Finish reason of the last call that returned
    pub finish_reason: FinishReason,
    /// Usage summed over both calls
    pub usage: TokenUsage,
    /// True when `value` passed extraction and validation
    pub ok: bool,
    /// Last failure reason
    pub error: Option<String>,
    /// Generation calls made (1 or 2)
    pub calls: u8,
}

impl SchemaOutcome {
    fn from_response(response: &GenerateResponse, checked: Result<Map<String, Value>, String>, calls: u8) -> Self {
        let (value, ok, error) = match checked {
            Ok(map) => (map, true, None),
            Err(e) => (Map::new(), false, Some(e)),
        };
        Self {
            value,
            raw: response.text.clone(),
            finish_reason: response.finish_reason,
            usage: response.usage,
            ok,
            error,
            calls,
        }
    }
}

/// System instruction prepended to every structured call.
pub fn json_contract(schema: &str) -> String {
    format!(
        "You must return a valid json object and nothing else: no markdown fences, \
         no commentary before or after it.\nTarget schema:\n{}",
        schema
    )
}

fn repair_messages(schema: &str, reason: &str, raw: &str, max_fix_chars: usize) -> Vec<Message> {
    vec![
        Message::system(format!(
            "You are a JSON repairer. Fix the output below so it parses and matches the schema. \
             Output only JSON, with no explanation and no markdown.\nTarget schema:\n{}",
            schema
        )),
        Message::user(format!(
            "parse/validation failure reason:\n{}\n\nraw output:\n{}\n\nplease output the repaired JSON:",
            reason,
            truncate(raw, max_fix_chars)
        )),
    ]
}

/// Calls the driver for a JSON object matching `call`'s schema.
///
/// The first call sends `[json contract + schema] ++ messages`. When its output
/// does not extract or validate, one repair round is issued under the node
/// label `<node>_fix_json`; there is never a third call.
///
/// # Errors
///
/// Only errors from the first call (fatal, or transient with retries
/// exhausted) propagate. A failing repair call yields an empty outcome
/// carrying the error text.
#[instrument(skip_all, fields(node = %call.node, chapter = call.chapter_index))]
pub async fn invoke_with_schema(
    executor: &RetryExecutor,
    driver: &dyn GenerationDriver,
    messages: &[Message],
    call: &SchemaCall,
) -> QuillResult<SchemaOutcome> {
    let mut full = Vec::with_capacity(messages.len() + 1);
    full.push(Message::system(json_contract(&call.schema)));
    full.extend_from_slice(messages);

    let first = executor.invoke(driver, &call.request(full), &call.site()).await?;
    let reason = match call.check(&first.text) {
        Ok(map) => {
            debug!("Structured output accepted on first call");
            return Ok(SchemaOutcome::from_response(&first, Ok(map), 1));
        }
        Err(reason) => reason,
    };

    executor.trace().record(
        "json_parse_failed",
        trace_fields(json!({
            "node": call.node,
            "chapter_index": call.chapter_index,
            "error": reason,
            "finish_reason": first.finish_reason,
        })),
    );

    let mut outcome = repair_round(executor, driver, &first.text, &reason, call).await;
    outcome.usage = first.usage.add(&outcome.usage);
    outcome.calls = 2;
    if outcome.raw.is_empty() {
        outcome.raw = first.text;
        outcome.finish_reason = first.finish_reason;
    }
    Ok(outcome)
}

/// Runs only the repair round over existing raw output.
///
/// Never fails: a driver error is reported in [`SchemaOutcome::error`].
pub async fn repair_json_only(
    executor: &RetryExecutor,
    driver: &dyn GenerationDriver,
    raw: &str,
    reason: &str,
    call: &SchemaCall,
) -> SchemaOutcome {
    repair_round(executor, driver, raw, reason, call).await
}

async fn repair_round(
    executor: &RetryExecutor,
    driver: &dyn GenerationDriver,
    raw: &str,
    reason: &str,
    call: &SchemaCall,
) -> SchemaOutcome {
    let request = call.request(repair_messages(&call.schema, reason, raw, call.max_fix_chars));
    let site = call.site().with_node(format!("{}_fix_json", call.node));

    let outcome = match executor.invoke(driver, &request, &site).await {
        Ok(response) => SchemaOutcome::from_response(&response, call.check(&response.text), 1),
        Err(err) => {
            warn!(error = %err, "JSON repair call failed");
            SchemaOutcome {
                error: Some(err.detail()),
                calls: 1,
                ..Default::default()
            }
        }
    };

    executor.trace().record(
        "json_repair",
        trace_fields(json!({
            "node": call.node,
            "chapter_index": call.chapter_index,
            "ok": outcome.ok,
            "error": outcome.error,
        })),
    );
    if !outcome.ok {
        warn!(error = ?outcome.error, "Structured output still unusable after repair");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_reason_wins_over_parse() {
        let call = SchemaCall::new("tone", "{narration}").validate(|map| {
            if map.contains_key("narration") {
                String::new()
            } else {
                "missing narration".into()
            }
        });
        assert_eq!(
            call.check("{\"pacing\": \"slow\"}").unwrap_err(),
            "validation_failed: missing narration"
        );
        assert!(call.check("{\"narration\": \"close\"}").is_ok());
        assert!(call.check("nothing").unwrap_err().contains("no_object_braces_found"));
    }

    #[test]
    fn test_repair_prompt_truncates_raw() {
        let raw = "x".repeat(500);
        let messages = repair_messages("{}", "strict: Syntax: eof", &raw, 100);
        assert!(messages[0].content.starts_with("You are a JSON repairer"));
        assert!(messages[1].content.contains("...[truncated]..."));
        assert!(messages[1].content.ends_with("please output the repaired JSON:"));
    }
}
