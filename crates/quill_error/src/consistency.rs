//! Errors raised when a consistency rule vetoes a canon or materials mutation.

/// Consistency violations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ConsistencyErrorKind {
    /// Blocking open questions prevent freezing
    #[display("cannot freeze: {} blocking open questions", blockers)]
    FreezeBlocked {
        /// Number of blocking open questions
        blockers: usize,
    },
    /// Definition-of-Done check failed for structural reasons
    #[display("cannot freeze: {}", summary)]
    DodFailed {
        /// One-line DoD summary
        summary: String,
    },
    /// An automated write would replace a non-empty canon value
    #[display("refusing to overwrite non-empty canon value at {}", path)]
    CanonOverwrite {
        /// Dotted path of the protected value
        path: String,
    },
    /// Canon patch names an unknown target or operation
    #[display("canon patch rejected: {}", _0)]
    PatchRejected(String),
    /// Chapter memory is not approved for canon promotion
    #[display("chapter {} not approved (editor decision: {})", chapter_index, decision)]
    NotApproved {
        /// Chapter index
        chapter_index: u32,
        /// Recorded editor decision
        decision: String,
    },
    /// No frozen materials pack exists yet
    #[display("no frozen materials pack")]
    NoFrozenPack,
    /// Requested materials version does not exist
    #[display("materials version not found: {}", _0)]
    UnknownVersion(String),
    /// Change proposal id that does not exist
    #[display("change proposal not found: {}", _0)]
    UnknownProposal(String),
    /// Refreeze of a proposal that no human approved
    #[display("change proposal {} is not approved", _0)]
    ProposalNotApproved(String),
}

/// Consistency error with location tracking.
///
/// # Examples
///
/// ```
/// use quill_error::{ConsistencyError, ConsistencyErrorKind};
///
/// let err = ConsistencyError::new(ConsistencyErrorKind::FreezeBlocked { blockers: 2 });
/// assert!(format!("{}", err).contains("cannot freeze: 2 blocking open questions"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Consistency Error: {} at line {} in {}", kind, line, file)]
pub struct ConsistencyError {
    /// The kind of error that occurred
    pub kind: ConsistencyErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ConsistencyError {
    /// Create a new ConsistencyError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ConsistencyErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
