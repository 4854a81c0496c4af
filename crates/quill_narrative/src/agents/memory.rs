//! Memory compiler: structured extraction of one chapter.

use super::AgentRuntime;
use crate::prompts::{MEMORY_SCHEMA, outline_entry};
use crate::repair::SchemaCall;
use quill_core::{CanonBundle, ChapterMemory, CharacterUpdate, MemoryEvent, Message, OutlineChapter};
use quill_error::QuillResult;
use quill_storage::truncate;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

const SUMMARY_CHARS: usize = 180;
const DRAFT_CHARS: usize = 12_000;

fn validate_memory(map: &Map<String, Value>) -> String {
    let summary = map.get("summary").and_then(Value::as_str).unwrap_or_default();
    if summary.trim().is_empty() {
        return "summary is required".into();
    }
    String::new()
}

/// Deterministic memory used when no model output is available.
///
/// The cast anchor is the first canon character, never a name guessed from
/// the prose, so later canon absorption cannot invent characters.
pub fn template_memory(chapter_index: u32, draft: &str, canon: &CanonBundle, outline: &OutlineChapter) -> ChapterMemory {
    let text = draft.trim();
    let summary = if text.chars().count() > SUMMARY_CHARS {
        format!("{}…", text.chars().take(SUMMARY_CHARS).collect::<String>())
    } else {
        text.to_string()
    };
    let lead = canon
        .characters
        .characters
        .first()
        .map(|c| c.name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "protagonist".to_string());
    let what = if outline.goal.is_empty() {
        "(template) key events of the chapter".to_string()
    } else {
        format!("(template) {}", outline.goal)
    };

    ChapterMemory {
        chapter_index,
        summary,
        events: vec![MemoryEvent {
            what,
            location: String::new(),
            who: vec![lead.clone()],
            result: String::new(),
        }],
        character_updates: vec![CharacterUpdate {
            name: lead,
            ..Default::default()
        }],
        open_threads: if outline.ending_hook.is_empty() {
            Vec::new()
        } else {
            vec![outline.ending_hook.clone()]
        },
        used_fallback: true,
        ..Default::default()
    }
}

/// Extracts the chapter's memory record.
///
/// Provenance (`approved`, `editor_decision`, `writer_version`) is left for
/// the caller; `used_fallback` is set here.
///
/// # Errors
///
/// In `llm` mode, when no usable record could be obtained.
#[instrument(skip_all, fields(chapter = chapter_index))]
pub async fn compile_memory(
    rt: &AgentRuntime,
    chapter_index: u32,
    draft: &str,
    canon: &CanonBundle,
    outline: &OutlineChapter,
) -> QuillResult<ChapterMemory> {
    let names = canon.character_names().join(", ");
    let messages = [
        Message::system(
            "You are the continuity keeper of a serialized novel. Turn the chapter into retrievable \
             memory: a 100-250 character summary, 3-8 events, character changes, and only the facts \
             this chapter explicitly establishes or confirms.",
        ),
        Message::user(format!(
            "{}\n\nKnown characters: {}\n\nChapter text:\n{}",
            outline_entry(outline),
            if names.is_empty() { "(none)" } else { names.as_str() },
            truncate(draft, DRAFT_CHARS)
        )),
    ];
    let call = SchemaCall::new("memory", MEMORY_SCHEMA)
        .chapter(chapter_index)
        .validate(validate_memory);

    Ok(match rt.structured(&messages, call).await? {
        Some(map) => ChapterMemory::ensure(chapter_index, &Value::Object(map)),
        None => {
            debug!("Using template memory");
            template_memory(chapter_index, draft, canon, outline)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Character;

    #[test]
    fn test_template_memory_anchors_on_first_character() {
        let mut canon = CanonBundle::default();
        let outline = OutlineChapter {
            chapter_index: 2,
            goal: "find the ledger".into(),
            ending_hook: "the ledger is blank".into(),
            ..Default::default()
        };
        let draft = "x".repeat(400);

        let memory = template_memory(2, &draft, &canon, &outline);
        assert_eq!(memory.events[0].who, vec!["protagonist".to_string()]);
        assert_eq!(memory.summary.chars().count(), SUMMARY_CHARS + 1);
        assert!(memory.summary.ends_with('…'));
        assert_eq!(memory.open_threads, vec!["the ledger is blank".to_string()]);
        assert!(memory.used_fallback);
        assert!(memory.new_facts.is_empty());

        canon.characters.characters.push(Character {
            name: "Mara".into(),
            ..Default::default()
        });
        let memory = template_memory(2, "short", &canon, &outline);
        assert_eq!(memory.summary, "short");
        assert_eq!(memory.character_updates[0].name, "Mara");
    }

    #[test]
    fn test_validate_memory_requires_summary() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert!(!validate_memory(&obj(serde_json::json!({"summary": " "}))).is_empty());
        assert!(validate_memory(&obj(serde_json::json!({"summary": "Mara leaves."}))).is_empty());
    }
}
