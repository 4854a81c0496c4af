//! Errors raised by the text-generation capability, and retry classification.

use crate::ErrorCategory;

/// Generation failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum GenerationErrorKind {
    /// Endpoint unreachable or refusing service
    #[display("Service unavailable: {}", _0)]
    Unavailable(String),
    /// Request exceeded the configured per-call timeout
    #[display("Request timed out: {}", _0)]
    Timeout(String),
    /// Provider rate limit hit
    #[display("Rate limit exceeded: {}", _0)]
    RateLimited(String),
    /// HTTP error with status code and body
    #[display("HTTP {} error: {}", status, message)]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },
    /// Response body could not be decoded
    #[display("Malformed response: {}", _0)]
    Malformed(String),
    /// API key missing or rejected
    #[display("Missing or rejected credentials: {}", _0)]
    MissingCredentials(String),
    /// Strict generation mode produced no usable output
    #[display("Generation required but no usable output for {}", _0)]
    GenerationRequired(String),
}

impl GenerationErrorKind {
    /// Check if this error type should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationErrorKind::Unavailable(_) => true,
            GenerationErrorKind::Timeout(_) => true,
            GenerationErrorKind::RateLimited(_) => true,
            GenerationErrorKind::Http { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Short type-like name used by trace events and the transient-signature heuristic.
    pub fn name(&self) -> &'static str {
        match self {
            GenerationErrorKind::Unavailable(_) => "ServiceUnavailable",
            GenerationErrorKind::Timeout(_) => "TimeoutError",
            GenerationErrorKind::RateLimited(_) => "RateLimitError",
            GenerationErrorKind::Http { .. } => "HttpError",
            GenerationErrorKind::Malformed(_) => "MalformedResponse",
            GenerationErrorKind::MissingCredentials(_) => "AuthenticationError",
            GenerationErrorKind::GenerationRequired(_) => "GenerationRequired",
        }
    }

    /// Coarse category of this failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GenerationErrorKind::Timeout(_) => ErrorCategory::Timeout,
            GenerationErrorKind::Malformed(_) => ErrorCategory::Malformed,
            GenerationErrorKind::GenerationRequired(_) => ErrorCategory::Malformed,
            GenerationErrorKind::MissingCredentials(_) => ErrorCategory::Fault,
            GenerationErrorKind::Http { status, .. } if *status == 408 => ErrorCategory::Timeout,
            GenerationErrorKind::Http { status, .. } if *status >= 500 || *status == 429 => {
                ErrorCategory::Unavailable
            }
            GenerationErrorKind::Http { .. } => ErrorCategory::Fault,
            GenerationErrorKind::Unavailable(_) | GenerationErrorKind::RateLimited(_) => {
                ErrorCategory::Unavailable
            }
        }
    }
}

/// Generation error with source location tracking.
///
/// # Examples
///
/// ```
/// use quill_error::{GenerationError, GenerationErrorKind, RetryableError};
///
/// let err = GenerationError::new(GenerationErrorKind::Http {
///     status: 503,
///     message: "overloaded".to_string(),
/// });
/// assert!(err.is_retryable());
/// assert!(format!("{}", err).contains("HTTP 503"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Generation Error: {} at line {} in {}", kind, line, file)]
pub struct GenerationError {
    /// The kind of error that occurred
    pub kind: GenerationErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl GenerationError {
    /// Create a new GenerationError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GenerationErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

/// Trait for errors that support retry logic.
///
/// Typed classification only. The retry executor combines it with a keyword
/// heuristic over the rendered message, because drivers outside this workspace
/// may surface transient failures through untyped errors.
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    fn is_retryable(&self) -> bool;
}

impl RetryableError for GenerationError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
