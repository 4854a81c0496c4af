//! Top-level error wrapper types.

use crate::{
    ConfigError, ConsistencyError, ErrorCategory, GenerationError, JsonError, RetryableError,
    StorageError,
};

/// Union of every error domain in the workspace.
///
/// # Examples
///
/// ```
/// use quill_error::{JsonError, QuillError};
///
/// let err: QuillError = JsonError::new("unexpected token").into();
/// assert!(format!("{}", err).contains("JSON Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum QuillErrorKind {
    /// Generation capability error
    #[from(GenerationError)]
    Generation(GenerationError),
    /// JSON serialization/deserialization error
    #[from(JsonError)]
    Json(JsonError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Project store error
    #[from(StorageError)]
    Storage(StorageError),
    /// Consistency rule violation
    #[from(ConsistencyError)]
    Consistency(ConsistencyError),
}

/// Quill error with kind discrimination.
///
/// # Examples
///
/// ```
/// use quill_error::{ConfigError, QuillResult};
///
/// fn might_fail() -> QuillResult<()> {
///     Err(ConfigError::new("Missing field"))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Quill Error: {}", _0)]
pub struct QuillError(Box<QuillErrorKind>);

impl QuillError {
    /// Create a new error from a kind.
    pub fn new(kind: QuillErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &QuillErrorKind {
        &self.0
    }

    /// Coarse category used for retry / repair / abort decisions.
    pub fn category(&self) -> ErrorCategory {
        match self.kind() {
            QuillErrorKind::Generation(e) => e.kind.category(),
            QuillErrorKind::Json(_) => ErrorCategory::Malformed,
            QuillErrorKind::Consistency(_) => ErrorCategory::Conflict,
            QuillErrorKind::Config(_) | QuillErrorKind::Storage(_) => ErrorCategory::Fault,
        }
    }

    /// Message of the innermost error without its source location.
    pub fn detail(&self) -> String {
        match self.kind() {
            QuillErrorKind::Generation(e) => e.kind.to_string(),
            QuillErrorKind::Json(e) => e.message.clone(),
            QuillErrorKind::Config(e) => e.message.clone(),
            QuillErrorKind::Storage(e) => e.kind.to_string(),
            QuillErrorKind::Consistency(e) => e.kind.to_string(),
        }
    }

    /// Short type-like name of the innermost error, used in trace events.
    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            QuillErrorKind::Generation(e) => e.kind.name(),
            QuillErrorKind::Json(_) => "JsonError",
            QuillErrorKind::Config(_) => "ConfigError",
            QuillErrorKind::Storage(_) => "StorageError",
            QuillErrorKind::Consistency(_) => "ConsistencyError",
        }
    }
}

impl RetryableError for QuillError {
    fn is_retryable(&self) -> bool {
        match self.kind() {
            QuillErrorKind::Generation(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// Generic From implementation for any type that converts to QuillErrorKind
impl<T> From<T> for QuillError
where
    T: Into<QuillErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Quill operations.
pub type QuillResult<T> = std::result::Result<T, QuillError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConsistencyErrorKind, GenerationErrorKind, StorageErrorKind};

    #[test]
    fn test_categories_follow_kind() {
        let timeout: QuillError =
            GenerationError::new(GenerationErrorKind::Timeout("read".into())).into();
        assert_eq!(timeout.category(), ErrorCategory::Timeout);
        assert!(timeout.is_retryable());

        let conflict: QuillError =
            ConsistencyError::new(ConsistencyErrorKind::FreezeBlocked { blockers: 1 }).into();
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
        assert!(!conflict.is_retryable());

        let io: QuillError =
            StorageError::new(StorageErrorKind::FileRead("x".into())).into();
        assert_eq!(io.category(), ErrorCategory::Fault);
    }

    #[test]
    fn test_http_status_classification() {
        let retry = GenerationErrorKind::Http {
            status: 429,
            message: String::new(),
        };
        assert!(retry.is_retryable());
        assert_eq!(retry.category(), ErrorCategory::Unavailable);

        let fatal = GenerationErrorKind::Http {
            status: 400,
            message: String::new(),
        };
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.category(), ErrorCategory::Fault);
    }

    #[test]
    fn test_detail_omits_location() {
        let err: QuillError = ConfigError::new("missing api key").into();
        assert_eq!(err.detail(), "missing api key");
        assert!(err.to_string().contains("at line"));
    }

    #[test]
    fn test_location_is_captured() {
        let err = JsonError::new("bad");
        assert!(err.file.ends_with("error.rs"));
        assert!(err.line > 0);
    }
}
