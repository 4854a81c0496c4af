//! Coarse error categories shared by every error domain.

/// Broad classification of a failure.
///
/// Pipeline stages branch on the category rather than on concrete error types:
/// `Unavailable` and `Timeout` are candidates for retry, `Malformed` goes to the
/// repair loop, `Conflict` is surfaced to the caller unchanged and `Fault` is
/// reserved for conditions nothing downstream can fix (I/O failures, bad config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ErrorCategory {
    /// The generation capability could not be reached or refused service.
    #[display("unavailable")]
    Unavailable,
    /// Output could not be parsed or failed validation.
    #[display("malformed")]
    Malformed,
    /// A call exceeded its deadline.
    #[display("timeout")]
    Timeout,
    /// A consistency rule vetoed a mutation.
    #[display("conflict")]
    Conflict,
    /// Unrecoverable fault.
    #[display("fault")]
    Fault,
}
