//! Quill: idea-to-chapters fiction generation over an unreliable text generator.
//!
//! The pipeline plans a story (world, characters, outline, tone), freezes a
//! versioned materials pack behind a Definition-of-Done gate, then writes each
//! chapter through a write → review → memory → canon-update loop. Every model
//! answer that must be JSON goes through a strict extractor and at most one
//! repair call; the editor's verdict is constrained by a round-aware contract.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use quill::{QuillConfig, RunOptions, run_project};
//!
//! #[tokio::main]
//! async fn main() -> quill::QuillResult<()> {
//!     let config = QuillConfig::load(None)?;
//!     let options = RunOptions {
//!         idea: "a courier carries letters across a drowned city".into(),
//!         ..Default::default()
//!     };
//!     let summary = run_project(&config, &options).await?;
//!     println!("{} chapters written", summary.chapters.len());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `quill_error` - Error types and categories
//! - `quill_core` - Plain data (requests, canon, memory, materials)
//! - `quill_interface` - `GenerationDriver`, `ProjectStore` and `TraceSink` traits
//! - `quill_retry` - Retry executor
//! - `quill_storage` - Filesystem / in-memory stores and the JSONL trace
//! - `quill_canon` - Canon merge, fact absorption, DoD gate, freeze registry
//! - `quill_narrative` - JSON extractor, repair loop, editor gate, agents, pipeline
//! - `quill_models` - OpenAI-compatible driver
//!
//! This crate re-exports everything for convenience and adds configuration,
//! logging setup and the `quill` binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;
mod logging;

pub use crate::commands::{
    ProposalAction, RunOptions, build_driver, build_runtime, check_project, freeze_project,
    project_anchors, proposal_command, restate_project, run_project,
};
pub use crate::config::{
    ConfigLoader, LogFormat, LoggingSection, QuillConfig, RepairSection, RunSection,
};
pub use crate::logging::{default_directive, init_logging};

pub use quill_canon::*;
pub use quill_core::*;
pub use quill_error::*;
pub use quill_interface::*;
pub use quill_models::*;
pub use quill_narrative::*;
pub use quill_retry::*;
pub use quill_storage::*;
