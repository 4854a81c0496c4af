//! Stable identifiers for citable entries of a frozen materials pack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Where an anchored entry lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Path inside the pack, e.g. `execution.decisions[0]`
    pub path: String,
    /// Short human title
    pub title: String,
}

/// `anchors/anchors.vNNN.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorIndex {
    /// Anchor id to location
    pub anchors: BTreeMap<String, Anchor>,
}

impl AnchorIndex {
    fn insert(&mut self, id: String, path: String, title: &str) {
        self.anchors.insert(
            id,
            Anchor {
                path,
                title: title.trim().to_string(),
            },
        );
    }

    /// Looks an anchor up by id.
    pub fn get(&self, id: &str) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// True when no anchors were built.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

const CHECKLIST_LIMIT: usize = 99;
const RULE_LIMIT: usize = 99;
const CHARACTER_LIMIT: usize = 199;
const TIMELINE_LIMIT: usize = 199;

fn text<'a>(entry: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .filter_map(|k| entry.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Gives every object in `list` an `id`, keeping ids that already exist.
/// Returns the next free counter.
fn ensure_ids(list: &mut [Value], prefix: &str, mut counter: usize) -> usize {
    for entry in list.iter_mut() {
        let Some(obj) = entry.as_object_mut() else {
            continue;
        };
        let has_id = obj
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !has_id {
            obj.insert("id".into(), Value::String(format!("{}-{:03}", prefix, counter)));
            counter += 1;
        }
    }
    counter
}

fn section_mut<'a>(pack: &'a mut Value, section: &str, key: &str) -> Option<&'a mut Value> {
    pack.get_mut(section)?.get_mut(key)
}

/// Builds the anchor index for a pack, writing missing ids back into the
/// pack's decisions and glossary entries.
///
/// Ids: `DEC-NNN` for decisions, `CON-<key>` for constraints, `GLO-NNN` for
/// glossary entries (bare strings are promoted to `{id, term, desc}`),
/// `CHK-<GROUP>-NNN` for checklist items, `WR-NNN` for world rules,
/// `CHAR-NNN` for characters and `TL-NNN` for timeline events.
pub fn build_anchors(pack: &mut Value) -> AnchorIndex {
    let mut index = AnchorIndex::default();

    if let Some(Value::Array(decisions)) = section_mut(pack, "execution", "decisions") {
        ensure_ids(decisions, "DEC", 1);
        for (i, d) in decisions.iter().enumerate() {
            if let Some(id) = d.get("id").and_then(Value::as_str) {
                index.insert(id.to_string(), format!("execution.decisions[{}]", i), text(d, &["topic"]));
            }
        }
    }

    if let Some(Value::Object(constraints)) = section_mut(pack, "execution", "constraints") {
        for key in constraints.keys() {
            index.insert(format!("CON-{}", key), format!("execution.constraints.{}", key), key);
        }
    }

    if let Some(Value::Object(glossary)) = section_mut(pack, "execution", "glossary") {
        let mut counter = 1;
        for (category, entries) in glossary.iter_mut() {
            let Value::Array(list) = entries else {
                continue;
            };
            let promoted: Vec<Value> = list
                .drain(..)
                .filter_map(|entry| match entry {
                    Value::String(s) if !s.trim().is_empty() => {
                        Some(json!({"term": s.trim(), "desc": ""}))
                    }
                    Value::Object(_) => Some(entry),
                    _ => None,
                })
                .collect();
            *list = promoted;
            counter = ensure_ids(list, "GLO", counter);
            for (i, entry) in list.iter().enumerate() {
                if let Some(id) = entry.get("id").and_then(Value::as_str) {
                    index.insert(
                        id.to_string(),
                        format!("execution.glossary.{}[{}]", category, i),
                        text(entry, &["term"]),
                    );
                }
            }
        }
    }

    if let Some(Value::Object(checklists)) = section_mut(pack, "execution", "checklists") {
        for group in ["global", "per_arc", "per_chapter"] {
            let Some(Value::Array(items)) = checklists.get(group) else {
                continue;
            };
            for (i, item) in items.iter().take(CHECKLIST_LIMIT).enumerate() {
                index.insert(
                    format!("CHK-{}-{:03}", group.to_ascii_uppercase(), i + 1),
                    format!("execution.checklists.{}[{}]", group, i),
                    item.as_str().unwrap_or(""),
                );
            }
        }
    }

    let canon = pack.get("canon").cloned().unwrap_or(Value::Object(Map::new()));
    anchor_list(&mut index, &canon, "world", "rules", "WR", RULE_LIMIT, &["name"]);
    anchor_list(&mut index, &canon, "characters", "characters", "CHAR", CHARACTER_LIMIT, &["name"]);
    anchor_list(&mut index, &canon, "timeline", "events", "TL", TIMELINE_LIMIT, &["what", "event", "name"]);

    index
}

fn anchor_list(
    index: &mut AnchorIndex,
    canon: &Value,
    file: &str,
    list: &str,
    prefix: &str,
    limit: usize,
    title_keys: &[&str],
) {
    let Some(Value::Array(entries)) = canon.get(file).and_then(|f| f.get(list)) else {
        return;
    };
    for (i, entry) in entries.iter().take(limit).enumerate() {
        let title = text(entry, title_keys);
        if !title.is_empty() {
            index.insert(
                format!("{}-{:03}", prefix, i + 1),
                format!("canon.{}.{}[{}]", file, list, i),
                title,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack() -> Value {
        json!({
            "execution": {
                "decisions": [
                    {"topic": "point of view", "decision": "close third"},
                    {"id": "DEC-900", "topic": "tense"}
                ],
                "constraints": {"target_words": 800, "naming_policy": "strict"},
                "glossary": {
                    "places": ["Harrow", ""],
                    "characters": [{"term": "Mara", "desc": "lead"}]
                },
                "checklists": {"global": ["no anachronisms"], "per_arc": [], "per_chapter": ["end on a hook"]}
            },
            "canon": {
                "world": {"rules": [{"name": "no magic after dusk"}, {"name": ""}]},
                "characters": {"characters": [{"name": "Mara"}]},
                "timeline": {"events": [{"what": "the flood"}]}
            }
        })
    }

    #[test]
    fn test_ids_are_assigned_and_kept() {
        let mut pack = pack();
        let index = build_anchors(&mut pack);
        assert_eq!(pack["execution"]["decisions"][0]["id"], "DEC-001");
        assert_eq!(pack["execution"]["decisions"][1]["id"], "DEC-900");
        assert_eq!(index.get("DEC-001").unwrap().title, "point of view");
        assert_eq!(index.get("DEC-900").unwrap().path, "execution.decisions[1]");
    }

    #[test]
    fn test_glossary_strings_are_promoted() {
        let mut pack = pack();
        let index = build_anchors(&mut pack);
        let places = pack["execution"]["glossary"]["places"].as_array().unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0]["term"], "Harrow");
        let glossary_ids: Vec<_> = index.anchors.keys().filter(|k| k.starts_with("GLO-")).collect();
        assert_eq!(glossary_ids.len(), 2);
    }

    #[test]
    fn test_canon_and_checklist_anchors() {
        let mut pack = pack();
        let index = build_anchors(&mut pack);
        assert_eq!(index.get("CON-target_words").unwrap().path, "execution.constraints.target_words");
        assert_eq!(index.get("CHK-GLOBAL-001").unwrap().title, "no anachronisms");
        assert_eq!(index.get("CHK-PER_CHAPTER-001").unwrap().path, "execution.checklists.per_chapter[0]");
        assert_eq!(index.get("WR-001").unwrap().title, "no magic after dusk");
        assert!(index.get("WR-002").is_none());
        assert_eq!(index.get("CHAR-001").unwrap().path, "canon.characters.characters[0]");
        assert_eq!(index.get("TL-001").unwrap().title, "the flood");
    }

    #[test]
    fn test_serialises_under_anchors_key() {
        let mut pack = pack();
        let value = serde_json::to_value(build_anchors(&mut pack)).unwrap();
        assert!(value["anchors"]["DEC-001"]["path"].is_string());
    }
}
