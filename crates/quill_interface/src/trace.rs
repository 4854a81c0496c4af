//! Run-trace sink: an append-only structured event log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// RFC 3339 timestamp
    pub ts: String,
    /// Event name (`llm_request`, `llm_error`, `editor_decision`, ...)
    pub event: String,
    /// Event fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TraceRecord {
    /// Stamps an event with the current UTC time.
    pub fn now(event: &str, fields: Map<String, Value>) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            event: event.to_string(),
            fields,
        }
    }
}

/// Destination for trace events.
///
/// Recording never fails from the caller's point of view: a sink that cannot
/// persist an event logs the problem and drops it.
pub trait TraceSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: &str, fields: Map<String, Value>);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&self, _event: &str, _fields: Map<String, Value>) {}
}

/// Sink that keeps events in memory.
///
/// # Examples
///
/// ```
/// use quill_interface::{MemoryTrace, TraceSink};
/// use serde_json::{Map, json};
///
/// let trace = MemoryTrace::default();
/// let mut fields = Map::new();
/// fields.insert("attempt".into(), json!(1));
/// trace.record("llm_error", fields);
/// assert_eq!(trace.events_named("llm_error").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTrace {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTrace {
    /// Snapshot of every recorded event.
    pub fn records(&self) -> Vec<TraceRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Recorded events with the given name.
    pub fn events_named(&self, event: &str) -> Vec<TraceRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.event == event)
            .collect()
    }
}

impl TraceSink for MemoryTrace {
    fn record(&self, event: &str, fields: Map<String, Value>) {
        let record = TraceRecord::now(event, fields);
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Turns a `json!({...})` literal into an event field map. Non-objects yield an
/// empty map.
pub fn trace_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
