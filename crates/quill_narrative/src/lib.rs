//! Chapter generation for Quill.
//!
//! This crate turns a story idea into chapters through role agents that talk to
//! an unreliable text generator. Three pieces keep the output usable:
//!
//! - **JSON Extractor** ([`extract`]): strict, trailing-comma and lenient
//!   parsing of a model answer, with a diagnostic for every failed stage.
//! - **Schema-Repair Loop** ([`invoke_with_schema`]): one call, then at most
//!   one repair call, returning an empty outcome instead of looping.
//! - **Editor Gate** ([`gate`]): round-aware output contract, deterministic
//!   hard checks and the accept / rewrite verdict.
//!
//! The [`Pipeline`] strings the agents together: planning and the materials
//! pack, then for every chapter write → review (with rewrites) → memory →
//! canon update. [`Pipeline::restate`] sends existing chapters back through
//! the same loop under a forced audit.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_narrative::{AgentRuntime, GenerationMode, Pipeline, RunRequest, RunSettings};
//! use quill_retry::{RetryExecutor, RetryPolicy};
//! use quill_storage::FileProjectStore;
//!
//! # async fn example() -> quill_error::QuillResult<()> {
//! let store = Arc::new(FileProjectStore::new("outputs/harbor")?);
//! let executor = RetryExecutor::new(RetryPolicy::default(), Arc::new(quill_interface::NullTrace));
//! let runtime = AgentRuntime::new(None, executor, GenerationMode::Template);
//! let pipeline = Pipeline::new(runtime, store, RunSettings::default(), Default::default());
//! let summary = pipeline.run(RunRequest { idea: "a lighthouse keeper".into(), ..Default::default() }).await?;
//! println!("{} chapters", summary.chapters.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agents;
mod arc;
mod context;
mod extraction;
pub mod gate;
mod layout;
mod materials;
mod pipeline;
pub mod prompts;
mod repair;

pub use agents::{
    AgentRuntime, Draft, Drafted, GenerationMode, ReviewBrief, WriterBrief, architect,
    character_director, compile_memory, review_draft, screenwriter, template_characters,
    template_memory, template_outline, template_prose, template_tone, template_world,
    tone_setter, write_chapter,
};
pub use arc::{ArcSummary, approved_memories, summarize_arc, template_arc};
pub use context::{ChapterContext, ChapterState, StageDelta};
pub use extraction::{EMPTY_OUTPUT, NO_OBJECT_BRACES, ParseResult, extract, parse_as};
pub use gate::{CanonConflict, GatePolicy, GateThresholds, GateVerdict, LengthBounds};
pub use layout::{
    PROJECT_META_KEY, advisor_key, arc_key, chapter_error_key, chapter_key, memory_key,
    restate_draft_key, restate_review_key, review_key,
};
pub use materials::{
    ExecutionPlan, build_pack, chief_editor, glossary_from, planned_canon, template_execution,
    tone_style,
};
pub use pipeline::{
    ChapterError, ChapterOutcome, Pipeline, Planned, ProjectMeta, RestateRequest, RestateSummary,
    RunRequest, RunSettings, RunSummary,
};
pub use repair::{
    DEFAULT_MAX_FIX_CHARS, SchemaCall, SchemaOutcome, Validator, invoke_with_schema, json_contract,
    repair_json_only,
};
