//! Chapter memory: the structured extraction recorded for every chapter.

use crate::Decision;
use crate::normalize::{items, str_field, string_list};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Something that happened in the chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// What happened
    #[serde(default)]
    pub what: String,
    /// Where it happened
    #[serde(default, rename = "where")]
    pub location: String,
    /// Who was involved
    #[serde(default)]
    pub who: Vec<String>,
    /// Outcome
    #[serde(default)]
    pub result: String,
}

/// A change in a character's situation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharacterUpdate {
    /// Character name
    pub name: String,
    /// Current status
    #[serde(default)]
    pub status: String,
    /// Newly revealed information
    #[serde(default)]
    pub new_info: String,
}

/// Canon section a new fact is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum FactKind {
    /// World rule
    #[display("rule")]
    Rule,
    /// Faction
    #[display("faction")]
    Faction,
    /// Place
    #[display("place")]
    Place,
    /// Timeline event
    #[display("timeline")]
    Timeline,
    /// Character
    #[display("character")]
    Character,
    /// Anything else (items, unrecognised types): kept as a note line
    #[display("note")]
    Note,
}

/// A fact the chapter established.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewFact {
    /// Declared type, as produced by the model
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Fact key (rule name, place name, character name, ...)
    #[serde(default)]
    pub key: String,
    /// Fact value
    #[serde(default)]
    pub value: String,
}

impl NewFact {
    /// Routes the declared type onto a canon section.
    ///
    /// # Examples
    ///
    /// ```
    /// use quill_core::{FactKind, NewFact};
    ///
    /// let fact = NewFact { kind: "World".into(), key: "k".into(), value: "v".into() };
    /// assert_eq!(fact.category(), FactKind::Rule);
    /// let item = NewFact { kind: "item".into(), ..fact };
    /// assert_eq!(item.category(), FactKind::Note);
    /// ```
    pub fn category(&self) -> FactKind {
        match self.kind.trim().to_ascii_lowercase().as_str() {
            "world" | "rule" | "world_rule" => FactKind::Rule,
            "faction" => FactKind::Faction,
            "place" | "location" => FactKind::Place,
            "timeline" | "event" => FactKind::Timeline,
            "character" => FactKind::Character,
            _ => FactKind::Note,
        }
    }
}

/// Per-chapter memory record. Written once, whatever the editor decided.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChapterMemory {
    /// 1-based chapter index
    pub chapter_index: u32,
    /// Short summary
    #[serde(default)]
    pub summary: String,
    /// Events
    #[serde(default)]
    pub events: Vec<MemoryEvent>,
    /// Character changes
    #[serde(default)]
    pub character_updates: Vec<CharacterUpdate>,
    /// Facts to promote into canon
    #[serde(default)]
    pub new_facts: Vec<NewFact>,
    /// Unresolved threads
    #[serde(default)]
    pub open_threads: Vec<String>,
    /// Style observations
    #[serde(default)]
    pub style_notes: Vec<String>,
    /// Whether the chapter was accepted
    #[serde(default)]
    pub approved: bool,
    /// Final editor decision for the chapter
    #[serde(default)]
    pub editor_decision: Decision,
    /// Draft version the memory was compiled from
    #[serde(default)]
    pub writer_version: u32,
    /// True when the memory came from the template fallback
    #[serde(default)]
    pub used_fallback: bool,
}

impl ChapterMemory {
    /// Normalises model output into a memory record. Provenance fields are left
    /// at their defaults for the caller to fill.
    pub fn ensure(chapter_index: u32, value: &Value) -> Self {
        let events = items(value, "events")
            .iter()
            .filter_map(|e| {
                let what = match e {
                    Value::String(s) => s.trim().to_string(),
                    _ => str_field(e, "what"),
                };
                (!what.is_empty()).then(|| MemoryEvent {
                    what,
                    location: str_field(e, "where"),
                    who: string_list(e, "who"),
                    result: str_field(e, "result"),
                })
            })
            .collect();
        let character_updates = items(value, "character_updates")
            .iter()
            .map(|u| CharacterUpdate {
                name: str_field(u, "name"),
                status: str_field(u, "status"),
                new_info: str_field(u, "new_info"),
            })
            .filter(|u| !u.name.is_empty())
            .collect();
        let new_facts = items(value, "new_facts")
            .iter()
            .map(|f| NewFact {
                kind: str_field(f, "type"),
                key: str_field(f, "key"),
                value: str_field(f, "value"),
            })
            .filter(|f| !f.key.is_empty() && !f.value.is_empty())
            .collect();
        ChapterMemory {
            chapter_index,
            summary: str_field(value, "summary"),
            events,
            character_updates,
            new_facts,
            open_threads: string_list(value, "open_threads"),
            style_notes: string_list(value, "style_notes"),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ensure_drops_incomplete_facts() {
        let memory = ChapterMemory::ensure(
            3,
            &json!({
                "summary": "Mara reaches Harrow.",
                "events": [{"what": "arrival", "where": "Harrow", "who": ["Mara"]}],
                "new_facts": [
                    {"type": "place", "key": "Harrow", "value": "a salt town"},
                    {"type": "item", "key": "", "value": "orphan"}
                ],
                "open_threads": "who sent the letter"
            }),
        );
        assert_eq!(memory.chapter_index, 3);
        assert_eq!(memory.events[0].location, "Harrow");
        assert_eq!(memory.new_facts.len(), 1);
        assert_eq!(memory.open_threads, vec!["who sent the letter"]);
        assert!(!memory.approved);
    }

    #[test]
    fn test_memory_serialises_where_key() {
        let memory = ChapterMemory {
            chapter_index: 1,
            events: vec![MemoryEvent {
                what: "x".into(),
                location: "y".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&memory).unwrap();
        assert_eq!(value["events"][0]["where"], "y");
        assert_eq!(value["editor_decision"], "rejected");
    }
}
