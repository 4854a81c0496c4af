//! Transient-error classification.

use quill_error::{QuillError, RetryableError};

/// Type-name fragments that mark an error as transient.
const TRANSIENT_TYPE_NAMES: &[&str] = &[
    "timeout",
    "timeouterror",
    "readtimeout",
    "connecttimeout",
    "connectionerror",
    "apierror",
    "ratelimit",
    "ratelimiterror",
    "serviceunavailable",
    "temporarilyunavailable",
];

/// Message fragments that mark an error as transient.
const TRANSIENT_MESSAGES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection aborted",
    "connection refused",
    "remote end closed",
    "rate limit",
    "too many requests",
    "overloaded",
    "temporarily unavailable",
    "service unavailable",
    "502",
    "503",
    "504",
];

/// Keyword heuristic over an error's type name and rendered message.
///
/// # Examples
///
/// ```
/// use quill_retry::looks_transient;
///
/// assert!(looks_transient("ReadTimeout", "boom"));
/// assert!(looks_transient("Error", "HTTP 503 Service Unavailable"));
/// assert!(!looks_transient("ValueError", "invalid api key"));
/// ```
pub fn looks_transient(type_name: &str, message: &str) -> bool {
    let name = type_name.to_lowercase();
    if TRANSIENT_TYPE_NAMES.iter().any(|n| name.contains(n)) {
        return true;
    }
    let message = message.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
}

/// Whether a failed generation call should be retried.
pub fn is_retryable(err: &QuillError) -> bool {
    err.is_retryable() || looks_transient(err.type_name(), &err.detail())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_error::{ConfigError, GenerationError, GenerationErrorKind};

    #[test]
    fn test_typed_kinds() {
        let rate: QuillError =
            GenerationError::new(GenerationErrorKind::RateLimited("slow down".into())).into();
        assert!(is_retryable(&rate));

        let auth: QuillError =
            GenerationError::new(GenerationErrorKind::MissingCredentials("401".into())).into();
        assert!(!is_retryable(&auth));
    }

    #[test]
    fn test_untyped_message_signatures() {
        let err: QuillError = ConfigError::new("upstream said: Connection reset by peer").into();
        assert!(is_retryable(&err));

        let err: QuillError = ConfigError::new("model not found").into();
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_status_codes_in_messages() {
        for code in ["502", "503", "504"] {
            assert!(looks_transient("HttpError", &format!("HTTP {} error", code)));
        }
        assert!(!looks_transient("HttpError", "HTTP 400 error: bad request"));
    }
}
