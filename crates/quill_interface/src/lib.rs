//! Trait definitions for the Quill pipeline.
//!
//! Three seams separate the pipeline from the outside world: the text-generation
//! capability ([`GenerationDriver`]), the hierarchical project store
//! ([`ProjectStore`]) and the run trace ([`TraceSink`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod mock;
mod trace;
mod traits;

pub use mock::{MockBehavior, MockDriver};
pub use trace::{MemoryTrace, NullTrace, TraceRecord, TraceSink, trace_fields};
pub use traits::{GenerationDriver, ProjectStore};
