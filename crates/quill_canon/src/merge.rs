//! Merge-keep-existing: the only write path for generated canon content.

use quill_core::{CanonBundle, Character, NamedEntry, World, WorldRule};
use quill_error::{ConsistencyError, ConsistencyErrorKind, QuillResult};
use serde_json::{Map, Value};

/// True for values that count as "not yet recorded": null, `""`, `[]`, `{}`.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// One-level merge where existing non-blank values always win.
///
/// Every key of `incoming` is written only when the existing value is absent
/// or blank. Applying the same `incoming` twice yields the same result.
pub fn merge_keep_existing(existing: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        if merged.get(key).is_none_or(is_blank) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Like [`merge_keep_existing`], but refuses instead of silently keeping the
/// existing value when `incoming` carries a different non-blank value.
///
/// `scope` prefixes the reported path (e.g. `world`).
pub fn merge_strict(
    existing: &Map<String, Value>,
    incoming: &Map<String, Value>,
    scope: &str,
) -> QuillResult<Map<String, Value>> {
    for (key, value) in incoming {
        let Some(current) = existing.get(key) else {
            continue;
        };
        if !is_blank(current) && !is_blank(value) && current != value {
            return Err(ConsistencyError::new(ConsistencyErrorKind::CanonOverwrite {
                path: format!("{}.{}", scope, key),
            })
            .into());
        }
    }
    Ok(merge_keep_existing(existing, incoming))
}

/// Canon entries keyed by name.
pub trait Named {
    /// Upsert key.
    fn name(&self) -> &str;
    /// Description; an empty one may be filled by a later upsert.
    fn detail(&self) -> &str;
    /// Replaces the description.
    fn fill_detail(&mut self, detail: String);
}

impl Named for WorldRule {
    fn name(&self) -> &str {
        &self.name
    }
    fn detail(&self) -> &str {
        &self.detail
    }
    fn fill_detail(&mut self, detail: String) {
        self.detail = detail;
    }
}

impl Named for NamedEntry {
    fn name(&self) -> &str {
        &self.name
    }
    fn detail(&self) -> &str {
        &self.detail
    }
    fn fill_detail(&mut self, detail: String) {
        self.detail = detail;
    }
}

impl Named for Character {
    fn name(&self) -> &str {
        &self.name
    }
    fn detail(&self) -> &str {
        &self.detail
    }
    fn fill_detail(&mut self, detail: String) {
        self.detail = detail;
    }
}

/// What a name-keyed upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Upsert {
    /// No entry had the name; the entry was appended
    #[display("inserted")]
    Inserted,
    /// An entry with an empty detail received the incoming detail
    #[display("filled")]
    Filled,
    /// The existing entry won
    #[display("kept")]
    Kept,
}

impl Upsert {
    /// True when canon changed.
    pub fn changed(self) -> bool {
        !matches!(self, Upsert::Kept)
    }
}

/// Name-keyed upsert: the existing entry wins unless its detail is empty.
pub fn upsert_named<T: Named>(list: &mut Vec<T>, entry: T) -> Upsert {
    let name = entry.name().trim();
    match list.iter_mut().find(|e| e.name().trim() == name) {
        None => {
            list.push(entry);
            Upsert::Inserted
        }
        Some(current) if current.detail().trim().is_empty() && !entry.detail().trim().is_empty() => {
            current.fill_detail(entry.detail().to_string());
            Upsert::Filled
        }
        Some(_) => Upsert::Kept,
    }
}

/// Appends `line` unless an identical line is already present.
pub(crate) fn push_unique(lines: &mut Vec<String>, line: String) -> bool {
    if line.trim().is_empty() || lines.iter().any(|l| l == &line) {
        return false;
    }
    lines.push(line);
    true
}

fn merge_world(world: &mut World, incoming: &World) {
    for rule in &incoming.rules {
        upsert_named(&mut world.rules, rule.clone());
    }
    for faction in &incoming.factions {
        upsert_named(&mut world.factions, faction.clone());
    }
    for place in &incoming.places {
        upsert_named(&mut world.places, place.clone());
    }
    for note in &incoming.notes {
        push_unique(&mut world.notes, note.clone());
    }
    world.extra = merge_keep_existing(&world.extra, &incoming.extra);
}

/// Merges a generated canon bundle into the existing one, file by file.
///
/// Named lists use [`upsert_named`], note lists are unioned, timeline events
/// are appended when no event with the same description exists, and style is
/// only written while still empty.
pub fn merge_canon(existing: &CanonBundle, incoming: &CanonBundle) -> CanonBundle {
    let mut merged = existing.clone();
    merge_world(&mut merged.world, &incoming.world);

    for character in &incoming.characters.characters {
        let name = character.name.trim();
        if let Some(current) = merged
            .characters
            .characters
            .iter_mut()
            .find(|c| c.name.trim() == name)
        {
            if current.role.is_empty() {
                current.role = character.role.clone();
            }
            current.extra = merge_keep_existing(&current.extra, &character.extra);
        }
        upsert_named(&mut merged.characters.characters, character.clone());
    }
    for note in &incoming.characters.notes {
        push_unique(&mut merged.characters.notes, note.clone());
    }

    for event in &incoming.timeline.events {
        if merged.timeline.events.iter().any(|e| e.what == event.what) {
            continue;
        }
        let mut event = event.clone();
        if merged.timeline.events.iter().any(|e| e.order == event.order) {
            event.order = merged.timeline.next_order();
        }
        merged.timeline.events.push(event);
    }
    merged.timeline.events.sort_by_key(|e| e.order);
    for note in &incoming.timeline.notes {
        push_unique(&mut merged.timeline.notes, note.clone());
    }

    if merged.style.trim().is_empty() {
        merged.style = incoming.style.clone();
    }
    merged
}
