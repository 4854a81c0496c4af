//! Canon: the accumulated ground truth a project must never contradict.

use crate::normalize::{items, str_field, string_list, u32_field};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named world rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldRule {
    /// Rule name, the upsert key
    pub name: String,
    /// Rule detail
    #[serde(default)]
    pub detail: String,
}

/// A named faction or place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamedEntry {
    /// Entry name, the upsert key
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub detail: String,
}

impl NamedEntry {
    /// Accepts either a bare string or `{name, detail|desc|description}`.
    fn ensure(value: &Value) -> Option<Self> {
        let entry = match value {
            Value::String(s) => NamedEntry {
                name: s.trim().to_string(),
                detail: String::new(),
            },
            Value::Object(_) => NamedEntry {
                name: str_field(value, "name"),
                detail: first_non_empty(value, &["detail", "desc", "description"]),
            },
            _ => return None,
        };
        (!entry.name.is_empty()).then_some(entry)
    }
}

/// `canon/world.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct World {
    /// Named world rules
    #[serde(default)]
    pub rules: Vec<WorldRule>,
    /// Factions
    #[serde(default)]
    pub factions: Vec<NamedEntry>,
    /// Places
    #[serde(default)]
    pub places: Vec<NamedEntry>,
    /// Traceable note lines
    #[serde(default)]
    pub notes: Vec<String>,
    /// Any further top-level keys a model produced
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl World {
    /// Normalises loosely-shaped world JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use quill_core::World;
    /// use serde_json::json;
    ///
    /// let world = World::ensure(&json!({
    ///     "rules": [{"name": "no magic after dusk", "desc": "spells fizzle"}, "tides obey the moon"],
    ///     "places": ["Harrow"],
    ///     "era": "late bronze"
    /// }));
    /// assert_eq!(world.rules.len(), 2);
    /// assert_eq!(world.rules[0].detail, "spells fizzle");
    /// assert_eq!(world.places[0].name, "Harrow");
    /// assert_eq!(world.extra["era"], "late bronze");
    /// ```
    pub fn ensure(value: &Value) -> Self {
        let rules = items(value, "rules")
            .iter()
            .filter_map(NamedEntry::ensure)
            .map(|e| WorldRule {
                name: e.name,
                detail: e.detail,
            })
            .collect();
        let mut extra = value.as_object().cloned().unwrap_or_default();
        for key in ["rules", "factions", "places", "notes"] {
            extra.remove(key);
        }
        World {
            rules,
            factions: items(value, "factions")
                .iter()
                .filter_map(NamedEntry::ensure)
                .collect(),
            places: items(value, "places")
                .iter()
                .filter_map(NamedEntry::ensure)
                .collect(),
            notes: string_list(value, "notes"),
            extra,
        }
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
            && self.factions.is_empty()
            && self.places.is_empty()
            && self.notes.is_empty()
            && self.extra.is_empty()
    }
}

/// One character record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Character {
    /// Character name, the upsert key
    pub name: String,
    /// Narrative role (protagonist, foil, ...)
    #[serde(default)]
    pub role: String,
    /// Description
    #[serde(default)]
    pub detail: String,
    /// Other fields a model produced (motivation, arc, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `canon/characters.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Characters {
    /// Character records
    #[serde(default)]
    pub characters: Vec<Character>,
    /// Traceable note lines
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Characters {
    /// Normalises `{characters: [...]}` or a bare array of characters.
    pub fn ensure(value: &Value) -> Self {
        let list: &[Value] = match value {
            Value::Array(list) => list,
            _ => items(value, "characters"),
        };
        let characters = list
            .iter()
            .filter_map(|item| {
                let name = match item {
                    Value::String(s) => s.trim().to_string(),
                    _ => str_field(item, "name"),
                };
                if name.is_empty() {
                    return None;
                }
                let mut extra = item.as_object().cloned().unwrap_or_default();
                for key in ["name", "role", "detail", "desc", "description"] {
                    extra.remove(key);
                }
                Some(Character {
                    name,
                    role: str_field(item, "role"),
                    detail: first_non_empty(item, &["detail", "desc", "description"]),
                    extra,
                })
            })
            .collect();
        Characters {
            characters,
            notes: string_list(value, "notes"),
        }
    }

    /// Looks a character up by exact name.
    pub fn find(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }
}

/// One timeline event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Ordering key
    #[serde(default)]
    pub order: u32,
    /// When it happens, in story terms
    #[serde(default)]
    pub when: String,
    /// What happens
    #[serde(default)]
    pub what: String,
    /// Consequences
    #[serde(default)]
    pub impact: String,
}

/// `canon/timeline.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timeline {
    /// Events in story order
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
    /// Traceable note lines
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Timeline {
    /// Normalises timeline JSON, assigning missing `order` values sequentially.
    pub fn ensure(value: &Value) -> Self {
        let events = items(value, "events")
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let what = match item {
                    Value::String(s) => s.trim().to_string(),
                    _ => first_non_empty(item, &["what", "event", "name"]),
                };
                (!what.is_empty()).then(|| TimelineEvent {
                    order: u32_field(item, "order").unwrap_or(i as u32 + 1),
                    when: str_field(item, "when"),
                    what,
                    impact: str_field(item, "impact"),
                })
            })
            .collect();
        Timeline {
            events,
            notes: string_list(value, "notes"),
        }
    }

    /// Next free `order` value.
    pub fn next_order(&self) -> u32 {
        self.events.iter().map(|e| e.order).max().unwrap_or(0) + 1
    }
}

/// The four canon files of a project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonBundle {
    /// `canon/world.json`
    #[serde(default)]
    pub world: World,
    /// `canon/characters.json`
    #[serde(default)]
    pub characters: Characters,
    /// `canon/timeline.json`
    #[serde(default)]
    pub timeline: Timeline,
    /// `canon/style.md`
    #[serde(default)]
    pub style: String,
}

impl CanonBundle {
    /// Character names known to canon, in insertion order.
    pub fn character_names(&self) -> Vec<&str> {
        self.characters
            .characters
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }
}

fn first_non_empty(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| str_field(value, k))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}
