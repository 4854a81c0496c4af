//! Scripted generation driver for tests and offline dry runs.

use crate::GenerationDriver;
use async_trait::async_trait;
use quill_core::{FinishReason, GenerateRequest, GenerateResponse};
use quill_error::{GenerationError, GenerationErrorKind, QuillResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Return this response
    Respond(GenerateResponse),
    /// Fail with this error kind
    Fail(GenerationErrorKind),
}

impl MockBehavior {
    /// A naturally-stopped text response.
    pub fn text(text: impl Into<String>) -> Self {
        MockBehavior::Respond(GenerateResponse::text(text))
    }

    /// A response cut off by the token cap.
    pub fn truncated(text: impl Into<String>) -> Self {
        MockBehavior::Respond(GenerateResponse {
            finish_reason: FinishReason::Length,
            ..GenerateResponse::text(text)
        })
    }
}

/// Driver that replays a script of behaviors in order.
///
/// Once the script is exhausted the `fallback` behavior (if any) repeats forever;
/// otherwise further calls fail with a malformed-response error.
///
/// # Examples
///
/// ```
/// use quill_core::{GenerateRequest, Message};
/// use quill_interface::{GenerationDriver, MockBehavior, MockDriver};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let driver = MockDriver::new(vec![MockBehavior::text("{\"ok\": true}")]);
/// let request = GenerateRequest::new(vec![Message::user("hi")]);
/// let response = driver.generate(&request).await.unwrap();
/// assert_eq!(response.text, "{\"ok\": true}");
/// assert_eq!(driver.calls(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockDriver {
    script: Mutex<VecDeque<MockBehavior>>,
    fallback: Option<MockBehavior>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockDriver {
    /// Driver replaying `script` once.
    pub fn new(script: Vec<MockBehavior>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Driver that always behaves the same way.
    pub fn always(behavior: MockBehavior) -> Self {
        Self {
            fallback: Some(behavior),
            ..Default::default()
        }
    }

    /// Repeats `behavior` after the script runs out.
    pub fn then_always(mut self, behavior: MockBehavior) -> Self {
        self.fallback = Some(behavior);
        self
    }

    /// Number of `generate` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_behavior(&self) -> Option<MockBehavior> {
        let next = match self.script.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl GenerationDriver for MockDriver {
    async fn generate(&self, req: &GenerateRequest) -> QuillResult<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.requests.lock() {
            Ok(mut guard) => guard.push(req.clone()),
            Err(poisoned) => poisoned.into_inner().push(req.clone()),
        }
        match self.next_behavior() {
            Some(MockBehavior::Respond(response)) => Ok(response),
            Some(MockBehavior::Fail(kind)) => Err(GenerationError::new(kind).into()),
            None => Err(GenerationError::new(GenerationErrorKind::Malformed(
                "mock script exhausted".to_string(),
            ))
            .into()),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
