//! Schema-repair loop against a scripted driver.

use quill_core::Message;
use quill_error::{ErrorCategory, GenerationErrorKind};
use quill_interface::{MemoryTrace, MockBehavior, MockDriver};
use quill_narrative::{SchemaCall, invoke_with_schema, repair_json_only};
use quill_retry::{RetryExecutor, RetryPolicy};
use std::sync::Arc;

fn executor(trace: Arc<MemoryTrace>) -> RetryExecutor {
    let policy = RetryPolicy {
        max_attempts: 1,
        base_sleep_ms: 100,
        max_sleep_ms: 1,
        ..Default::default()
    };
    RetryExecutor::new(policy, trace)
}

fn tone_call() -> SchemaCall {
    SchemaCall::new("tone", r#"{"narration": "string"}"#).validate(|map| {
        match map.get("narration").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => String::new(),
            _ => "narration is required".into(),
        }
    })
}

fn messages() -> Vec<Message> {
    vec![Message::user("Set the tone for a harbor mystery.")]
}

#[tokio::test]
async fn test_valid_first_answer_uses_one_call() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::new(vec![MockBehavior::text(
        "```json\n{\"narration\": \"close third\",}\n```",
    )]);

    let outcome = invoke_with_schema(&executor(trace.clone()), &driver, &messages(), &tone_call())
        .await
        .unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.calls, 1);
    assert_eq!(outcome.value["narration"], "close third");
    assert_eq!(driver.calls(), 1);
    assert!(trace.events_named("json_parse_failed").is_empty());

    let first = &driver.requests()[0].messages;
    assert!(first[0].content.contains("Target schema:"));
    assert_eq!(first[1].content, "Set the tone for a harbor mystery.");
}

#[tokio::test]
async fn test_broken_answer_is_repaired_once() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::new(vec![
        MockBehavior::truncated("{\"narration\": \"close thi"),
        MockBehavior::text("{\"narration\": \"close third\"}"),
    ]);

    let outcome = invoke_with_schema(&executor(trace.clone()), &driver, &messages(), &tone_call())
        .await
        .unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.calls, 2);
    assert_eq!(driver.calls(), 2);

    let repair = &driver.requests()[1].messages;
    assert!(repair[0].content.starts_with("You are a JSON repairer"));
    assert!(repair[1].content.contains("{\"narration\": \"close thi"));

    let failed = trace.events_named("json_parse_failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].fields["node"], "tone");
    let repaired = trace.events_named("json_repair");
    assert_eq!(repaired[0].fields["ok"], true);
    assert_eq!(trace.events_named("llm_request")[1].fields["node"], "tone_fix_json");
}

#[tokio::test]
async fn test_never_more_than_two_calls() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::always(MockBehavior::text("I cannot produce JSON today."));

    let outcome = invoke_with_schema(&executor(trace), &driver, &messages(), &tone_call())
        .await
        .unwrap();

    assert!(!outcome.ok);
    assert!(outcome.value.is_empty());
    assert_eq!(outcome.calls, 2);
    assert_eq!(driver.calls(), 2);
    assert!(outcome.error.unwrap().contains("no_object_braces_found"));
}

#[tokio::test]
async fn test_validation_reason_reaches_repair_prompt() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::new(vec![
        MockBehavior::text("{\"pacing\": \"slow\"}"),
        MockBehavior::text("{\"narration\": \"first person\", \"pacing\": \"slow\"}"),
    ]);

    let outcome = invoke_with_schema(&executor(trace), &driver, &messages(), &tone_call())
        .await
        .unwrap();

    assert!(outcome.ok);
    let repair = &driver.requests()[1].messages;
    assert!(repair[1].content.contains("validation_failed: narration is required"));
}

#[tokio::test]
async fn test_first_call_error_propagates() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::always(MockBehavior::Fail(GenerationErrorKind::Timeout(
        "read timed out".into(),
    )));

    let err = invoke_with_schema(&executor(trace), &driver, &messages(), &tone_call())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(driver.calls(), 1);
}

#[tokio::test]
async fn test_repair_call_error_yields_empty_outcome() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::new(vec![
        MockBehavior::text("not json"),
        MockBehavior::Fail(GenerationErrorKind::Unavailable("connection refused".into())),
    ]);

    let outcome = invoke_with_schema(&executor(trace), &driver, &messages(), &tone_call())
        .await
        .unwrap();

    assert!(!outcome.ok);
    assert!(outcome.value.is_empty());
    assert_eq!(outcome.raw, "not json");
    assert!(outcome.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_repair_only_round() {
    let trace = Arc::new(MemoryTrace::default());
    let driver = MockDriver::new(vec![MockBehavior::text("{\"narration\": \"omniscient\"}")]);

    let outcome = repair_json_only(
        &executor(trace),
        &driver,
        "{narration: omniscient",
        "strict: Eof: EOF while parsing",
        &tone_call(),
    )
    .await;

    assert!(outcome.ok);
    assert_eq!(outcome.calls, 1);
    assert_eq!(driver.calls(), 1);
}
