//! Core data types for the Quill pipeline.
//!
//! Plain data shared by every crate: the generation request/response pair, and the
//! structured shapes agents produce (canon, chapter memory, editor reports,
//! materials). Shapes coming back from a model are tolerant by construction: each
//! has an `ensure` constructor that accepts loosely-typed JSON and fills defaults.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod canon;
mod editor;
mod materials;
mod memory;
mod message;
mod normalize;
mod request;
mod role;

pub use canon::{CanonBundle, Character, Characters, NamedEntry, Timeline, TimelineEvent, World, WorldRule};
pub use editor::{CanonPatch, CanonTarget, Decision, EditorIssue, EditorReport, IssueAction, IssueSeverity, PatchOp};
pub use materials::{
    Checklists, Constraints, ExecDecision, Execution, Glossary, GlossaryEntry, MaterialsBundle,
    MaterialsPack, OpenQuestion, Outline, OutlineChapter, PackMeta, Planning, Risk, Tone,
};
pub use memory::{ChapterMemory, CharacterUpdate, FactKind, MemoryEvent, NewFact};
pub use message::Message;
pub use normalize::{as_object, str_field, string_list};
pub use request::{FinishReason, GenerateRequest, GenerateResponse, TokenUsage};
pub use role::Role;
