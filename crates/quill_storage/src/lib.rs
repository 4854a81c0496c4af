//! Storage backends for Quill projects.
//!
//! - [`FileProjectStore`]: one directory per project, whole-file JSON/text rewrites
//! - [`InMemoryProjectStore`]: same contract, kept in memory (tests, dry runs)
//! - [`JsonlTraceSink`]: append-only run trace with sidecar files for large fields
//!
//! # Project layout
//!
//! ```text
//! outputs/projects/<slug>/
//! ├── project_meta.json
//! ├── canon/{world,characters,timeline}.json, style.md
//! ├── chapters/001.md
//! ├── reviews/chapter_001.v1.json
//! ├── memory/chapters/001.memory.json
//! ├── memory/arcs/arc_001-005.json
//! ├── materials/{drafts,frozen,reviews,anchors}/, index.json
//! └── logs/run_<timestamp>.jsonl, logs/sidecar/
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod filesystem;
mod memory;
mod text;
mod trace;

pub use filesystem::FileProjectStore;
pub use memory::InMemoryProjectStore;
pub use text::{project_dir, safe_filename, truncate};
pub use trace::{JsonlTraceSink, load_events};
