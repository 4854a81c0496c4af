//! Canon and materials consistency store.
//!
//! Long-lived ground truth only ever grows:
//!
//! - [`merge_keep_existing`] is the sole write path for agent-generated canon
//!   content; a non-empty existing value always wins.
//! - [`absorb_memory`] promotes facts from an accepted chapter's memory into
//!   canon, by name-keyed upsert or as traceable note lines.
//! - [`validate_materials_pack`] is the Definition-of-Done gate a materials pack
//!   must pass before [`MaterialsRegistry::freeze`] will freeze it.
//! - [`build_anchors`] assigns stable ids to citable entries of a frozen pack.
//! - [`build_advisor_report`] audits a finished chapter against the frozen
//!   pack, citing anchors.
//! - [`ProposalRegistry`] replaces a frozen pack through an approved change
//!   proposal and a refreeze.
//!
//! # Example
//!
//! ```
//! use quill_canon::merge_keep_existing;
//! use serde_json::json;
//!
//! let existing = json!({"era": "bronze", "notes": []});
//! let incoming = json!({"era": "iron", "notes": ["a"], "sky": "green"});
//! let merged = merge_keep_existing(
//!     existing.as_object().unwrap(),
//!     incoming.as_object().unwrap(),
//! );
//! assert_eq!(merged["era"], "bronze");
//! assert_eq!(merged["notes"], json!(["a"]));
//! assert_eq!(merged["sky"], "green");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod absorb;
mod advisor;
mod anchors;
mod dod;
mod freeze;
mod merge;
mod proposals;
mod store;

pub use absorb::{AbsorbReport, absorb_memory, apply_canon_patch, note_line};
pub use advisor::{
    AdvisorAction, AdvisorFinding, AdvisorReport, AdvisorStats, ResolvedAnchor, RiskLevel,
    Suggestion, advisor_digest_line, build_advisor_report, resolve_anchor_details,
};
pub use anchors::{Anchor, AnchorIndex, build_anchors};
pub use dod::{
    DodCounts, DodIssue, DodReport, DodSeverity, count_open_question_blockers,
    validate_materials_pack,
};
pub use freeze::{FrozenPack, FreezeOutcome, MaterialsIndex, MaterialsRegistry};
pub use merge::{Named, Upsert, is_blank, merge_canon, merge_keep_existing, merge_strict, upsert_named};
pub use proposals::{
    AdvisorReview, ChangeProposal, HumanDecision, HumanVerdict, MigrationEntry, MigrationLog,
    MigrationPlan, ProposalImpact, ProposalRegistry, ProposalStatus, ProposalTrigger, ProposalWhat,
    Refreeze, proposal_id,
};
pub use store::CanonStore;
