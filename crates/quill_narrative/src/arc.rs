//! Arc summaries: mid-range memory over a span of approved chapters.

use crate::agents::AgentRuntime;
use crate::layout::{arc_key, memory_key};
use crate::prompts::{ARC_SCHEMA, canon_digest};
use crate::repair::SchemaCall;
use quill_core::{CanonBundle, ChapterMemory, Message, str_field, string_list};
use quill_error::{JsonError, QuillResult};
use quill_interface::ProjectStore;
use quill_storage::truncate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

const MEMORIES_CHARS: usize = 8000;
const SUMMARY_CHARS: usize = 800;

/// `memory/arcs/arc_SSS-EEE.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArcSummary {
    /// First chapter of the arc
    pub start_chapter: u32,
    /// Last chapter of the arc
    pub end_chapter: u32,
    /// Summary of the span
    #[serde(default)]
    pub summary: String,
    /// Facts later chapters depend on
    #[serde(default)]
    pub key_facts: Vec<String>,
    /// Character name to current state
    #[serde(default)]
    pub character_states: BTreeMap<String, String>,
    /// Threads still open at the end of the arc
    #[serde(default)]
    pub open_threads: Vec<String>,
    /// RFC 3339 creation time
    #[serde(default)]
    pub generated_at: String,
    /// True when the template produced the summary
    #[serde(default)]
    pub used_fallback: bool,
}

impl ArcSummary {
    fn ensure(start_chapter: u32, end_chapter: u32, value: &Value) -> Self {
        let character_states = match value.get("character_states") {
            Some(Value::Object(states)) => states
                .iter()
                .filter_map(|(name, state)| {
                    let state = match state {
                        Value::String(s) => s.trim().to_string(),
                        other => other.to_string(),
                    };
                    (!name.trim().is_empty()).then(|| (name.trim().to_string(), state))
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            start_chapter,
            end_chapter,
            summary: str_field(value, "summary"),
            key_facts: string_list(value, "key_facts"),
            character_states,
            open_threads: string_list(value, "open_threads"),
            generated_at: chrono::Utc::now().to_rfc3339(),
            used_fallback: false,
        }
    }
}

fn validate_arc(map: &Map<String, Value>) -> String {
    if map
        .get("summary")
        .and_then(Value::as_str)
        .is_none_or(|s| s.trim().is_empty())
    {
        return "summary is required".into();
    }
    String::new()
}

/// Deterministic arc summary stitched from the chapter memories.
pub fn template_arc(start_chapter: u32, end_chapter: u32, memories: &[ChapterMemory]) -> ArcSummary {
    let summary = memories
        .iter()
        .filter(|m| !m.summary.is_empty())
        .map(|m| format!("Chapter {}: {}", m.chapter_index, m.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let mut key_facts = Vec::new();
    let mut character_states = BTreeMap::new();
    let mut open_threads: Vec<String> = Vec::new();
    for memory in memories {
        for fact in &memory.new_facts {
            key_facts.push(format!("{}: {}", fact.key, fact.value));
        }
        for update in &memory.character_updates {
            if !update.status.is_empty() || !character_states.contains_key(&update.name) {
                character_states.insert(update.name.clone(), update.status.clone());
            }
        }
        for thread in &memory.open_threads {
            if !open_threads.contains(thread) {
                open_threads.push(thread.clone());
            }
        }
    }
    ArcSummary {
        start_chapter,
        end_chapter,
        summary,
        key_facts,
        character_states,
        open_threads,
        generated_at: chrono::Utc::now().to_rfc3339(),
        used_fallback: true,
    }
}

/// Loads the approved memories in `start..=end`.
pub async fn approved_memories(store: &dyn ProjectStore, start: u32, end: u32) -> QuillResult<Vec<ChapterMemory>> {
    let mut memories = Vec::new();
    for index in start..=end {
        let key = memory_key(index);
        let Some(value) = store.read_json(&key).await? else {
            continue;
        };
        match serde_json::from_value::<ChapterMemory>(value) {
            Ok(memory) if memory.approved => memories.push(memory),
            Ok(_) => debug!(chapter = index, "Skipping unapproved chapter"),
            Err(err) => warn!(key = %key, error = %err, "Unreadable chapter memory"),
        }
    }
    Ok(memories)
}

/// Summarises an arc and writes it to `memory/arcs/`.
///
/// Only approved chapters contribute. Returns `None` when the span has none.
#[instrument(skip(rt, store, canon))]
pub async fn summarize_arc(
    rt: &AgentRuntime,
    store: &dyn ProjectStore,
    canon: &CanonBundle,
    start_chapter: u32,
    end_chapter: u32,
) -> QuillResult<Option<ArcSummary>> {
    if end_chapter < start_chapter {
        return Ok(None);
    }
    let memories = approved_memories(store, start_chapter, end_chapter).await?;
    if memories.is_empty() {
        info!("No approved chapters in arc, nothing to summarise");
        return Ok(None);
    }

    let packed: Vec<Value> = memories
        .iter()
        .map(|m| {
            json!({
                "chapter_index": m.chapter_index,
                "summary": truncate(&m.summary, SUMMARY_CHARS),
                "open_threads": m.open_threads,
                "character_updates": m.character_updates,
                "new_facts": m.new_facts,
            })
        })
        .collect();
    let packed = serde_json::to_string_pretty(&packed).map_err(|e| JsonError::new(e.to_string()))?;
    let messages = [
        Message::system(
            "You summarise a span of chapters of a serialized novel for later writing and \
             continuity checks. Cover the main line and every turning point, keep only hard facts \
             later chapters will need, and list the threads that stay open. Canon wins every \
             conflict.",
        ),
        Message::user(format!(
            "Chapters {}-{}\n\nCanon:\n{}\n\nChapter memories:\n{}",
            start_chapter,
            end_chapter,
            canon_digest(canon),
            truncate(&packed, MEMORIES_CHARS)
        )),
    ];
    let call = SchemaCall::new("arc_summary", ARC_SCHEMA)
        .chapter(end_chapter)
        .validate(validate_arc);
    let arc = match rt.structured(&messages, call).await? {
        Some(map) => ArcSummary::ensure(start_chapter, end_chapter, &Value::Object(map)),
        None => template_arc(start_chapter, end_chapter, &memories),
    };

    let value = serde_json::to_value(&arc).map_err(|e| JsonError::new(e.to_string()))?;
    store.write_json(&arc_key(start_chapter, end_chapter), &value).await?;
    info!(chapters = memories.len(), used_fallback = arc.used_fallback, "Wrote arc summary");
    Ok(Some(arc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{CharacterUpdate, Decision, NewFact};

    fn memory(index: u32, approved: bool) -> ChapterMemory {
        ChapterMemory {
            chapter_index: index,
            summary: format!("summary {}", index),
            character_updates: vec![CharacterUpdate {
                name: "Mara".into(),
                status: format!("status {}", index),
                new_info: String::new(),
            }],
            new_facts: vec![NewFact {
                kind: "place".into(),
                key: "Harrow".into(),
                value: "a salt town".into(),
            }],
            open_threads: vec!["the blank ledger".into()],
            approved,
            editor_decision: if approved { Decision::Accepted } else { Decision::Rejected },
            ..Default::default()
        }
    }

    #[test]
    fn test_template_arc_merges_memories() {
        let arc = template_arc(1, 2, &[memory(1, true), memory(2, true)]);
        assert_eq!(arc.summary, "Chapter 1: summary 1\nChapter 2: summary 2");
        assert_eq!(arc.character_states["Mara"], "status 2");
        assert_eq!(arc.open_threads.len(), 1);
        assert_eq!(arc.key_facts.len(), 2);
        assert!(arc.used_fallback);
    }

    #[test]
    fn test_arc_output_normalises_states() {
        let arc = ArcSummary::ensure(
            3,
            4,
            &json!({"summary": "s", "character_states": {"Mara": "tired", "Ivo": {"mood": "calm"}}}),
        );
        assert_eq!(arc.character_states["Mara"], "tired");
        assert_eq!(arc.character_states["Ivo"], r#"{"mood":"calm"}"#);
    }
}
