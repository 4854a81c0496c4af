//! Retry executor for calls to the generation capability.
//!
//! A single generation call is wrapped in bounded exponential backoff with
//! multiplicative jitter. Errors are classified as transient or fatal by
//! combining typed classification ([`quill_error::RetryableError`]) with a
//! keyword heuristic over the error's type name and message, since drivers
//! outside this workspace surface failures in whatever shape their SDK uses.
//!
//! Every attempt is reported to the run trace (`llm_ok` / `llm_error`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod executor;

pub use classify::{is_retryable, looks_transient};
pub use executor::{CallSite, RetryExecutor, RetryPolicy};
