//! Error types for the Quill pipeline.
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All constructors use `#[track_caller]` for automatic location capture
//!
//! Every error also maps onto a coarse [`ErrorCategory`], which is what pipeline
//! stages branch on when deciding between retry, repair, fallback and abort.
//!
//! # Examples
//!
//! ```
//! use quill_error::{ErrorCategory, GenerationError, GenerationErrorKind, QuillResult};
//!
//! fn call_model() -> QuillResult<String> {
//!     Err(GenerationError::new(GenerationErrorKind::Timeout("read timed out".into())))?
//! }
//!
//! let err = call_model().unwrap_err();
//! assert_eq!(err.category(), ErrorCategory::Timeout);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod category;
mod config;
mod consistency;
mod error;
mod generation;
mod json;
mod storage;

pub use category::ErrorCategory;
pub use config::ConfigError;
pub use consistency::{ConsistencyError, ConsistencyErrorKind};
pub use error::{QuillError, QuillErrorKind, QuillResult};
pub use generation::{GenerationError, GenerationErrorKind, RetryableError};
pub use json::JsonError;
pub use storage::{StorageError, StorageErrorKind};
