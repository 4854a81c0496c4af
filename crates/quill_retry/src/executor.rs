//! Bounded exponential-backoff retry around one generation call.

use crate::classify::is_retryable;
use quill_core::{GenerateRequest, GenerateResponse};
use quill_error::QuillResult;
use quill_interface::{GenerationDriver, TraceSink, trace_fields};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, instrument, warn};

/// Smallest base sleep honoured, in milliseconds.
const MIN_BASE_SLEEP_MS: u64 = 100;

/// Retry schedule parameters.
///
/// # Examples
///
/// ```
/// use quill_retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.backoff(1), Duration::from_millis(1000));
/// assert_eq!(policy.backoff(3), Duration::from_millis(4000));
/// assert_eq!(policy.backoff(10), Duration::from_millis(12000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (clamped to at least 1)
    pub max_attempts: u32,
    /// Base sleep before the first retry (clamped to at least 100ms)
    pub base_sleep_ms: u64,
    /// Upper bound on any single un-jittered sleep
    pub max_sleep_ms: u64,
    /// Lower jitter factor
    pub jitter_min: f64,
    /// Upper jitter factor
    pub jitter_max: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_sleep_ms: 1000,
            max_sleep_ms: 12_000,
            jitter_min: 0.7,
            jitter_max: 1.3,
        }
    }
}

impl RetryPolicy {
    /// Effective attempt count.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Un-jittered sleep before retry `retry` (1-based):
    /// `min(max_sleep, base * 2^(retry-1))`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.base_sleep_ms.max(MIN_BASE_SLEEP_MS));
        let max = Duration::from_millis(self.max_sleep_ms);
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(max)
    }

    /// Jittered sleep before retry `retry`.
    pub fn jittered(&self, retry: u32) -> Duration {
        let (lo, hi) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min, self.jitter_max)
        } else {
            (self.jitter_max, self.jitter_min)
        };
        let factor = rand::rng().random_range(lo.max(0.0)..=hi.max(0.0));
        Duration::from_secs_f64(self.backoff(retry).as_secs_f64() * factor)
    }

    /// The sleeps between attempts; one fewer than [`RetryPolicy::attempts`].
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|retry| self.jittered(retry)).collect()
    }
}

/// Labels a generation call in trace events and logs.
#[derive(Debug, Clone, PartialEq, Eq, Default, derive_new::new, derive_getters::Getters)]
pub struct CallSite {
    /// Pipeline node (`architect`, `writer`, `editor_fix_json`, ...)
    node: String,
    /// Chapter the call belongs to, 0 for project-level calls
    chapter_index: u32,
}

impl CallSite {
    /// Same chapter, different node label.
    pub fn with_node(&self, node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            chapter_index: self.chapter_index,
        }
    }
}

/// Wraps generation calls in the retry discipline.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    trace: Arc<dyn TraceSink>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor reporting to `trace`.
    pub fn new(policy: RetryPolicy, trace: Arc<dyn TraceSink>) -> Self {
        Self { policy, trace }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The trace sink attempts are reported to.
    pub fn trace(&self) -> &Arc<dyn TraceSink> {
        &self.trace
    }

    /// Invokes the driver, retrying transient failures.
    ///
    /// Fatal errors propagate on first occurrence. Transient errors are retried
    /// until the attempt budget is spent, after which the last error propagates.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when it is fatal or attempts are exhausted.
    #[instrument(skip(self, driver, request), fields(node = %site.node(), chapter = site.chapter_index()))]
    pub async fn invoke(
        &self,
        driver: &dyn GenerationDriver,
        request: &GenerateRequest,
        site: &CallSite,
    ) -> QuillResult<GenerateResponse> {
        let max_attempts = self.policy.attempts();
        let schedule = self.policy.schedule();
        debug!(max_attempts, ?schedule, "Invoking generation");

        self.trace.record(
            "llm_request",
            trace_fields(json!({
                "node": site.node(),
                "chapter_index": site.chapter_index(),
                "provider": driver.provider_name(),
                "model": driver.model_name(),
                "messages": request.messages,
            })),
        );

        let attempt = AtomicU32::new(0);
        let attempt = &attempt;
        let trace = self.trace.as_ref();

        Retry::spawn(schedule, move || async move {
            let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
            let started = Instant::now();
            match driver.generate(request).await {
                Ok(response) => {
                    trace.record(
                        "llm_ok",
                        trace_fields(json!({
                            "node": site.node(),
                            "chapter_index": site.chapter_index(),
                            "attempt": n,
                            "duration_ms": started.elapsed().as_millis() as u64,
                            "finish_reason": response.finish_reason,
                            "token_usage": response.usage,
                            "content": response.text,
                        })),
                    );
                    Ok(response)
                }
                Err(err) => {
                    let retryable = is_retryable(&err);
                    trace.record(
                        "llm_error",
                        trace_fields(json!({
                            "node": site.node(),
                            "chapter_index": site.chapter_index(),
                            "attempt": n,
                            "max_attempts": max_attempts,
                            "retryable": retryable,
                            "error_type": err.type_name(),
                            "error": err.detail(),
                            "duration_ms": started.elapsed().as_millis() as u64,
                        })),
                    );
                    if retryable && n < max_attempts {
                        warn!(attempt = n, max_attempts, error = %err, "Transient error, will retry");
                        Err(RetryError::Transient {
                            err,
                            retry_after: None,
                        })
                    } else {
                        warn!(attempt = n, retryable, error = %err, "Generation failed, giving up");
                        Err(RetryError::Permanent(err))
                    }
                }
            }
        })
        .await
    }
}
