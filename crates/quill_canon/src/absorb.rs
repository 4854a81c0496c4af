//! Promotion of chapter-memory facts into canon.

use crate::merge::{push_unique, upsert_named};
use quill_core::{
    CanonBundle, CanonPatch, CanonTarget, Character, ChapterMemory, FactKind, NamedEntry,
    NewFact, PatchOp, TimelineEvent, WorldRule,
};
use quill_error::{ConsistencyError, ConsistencyErrorKind, QuillResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counts of what one absorption did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct AbsorbReport {
    /// Facts written into a structured canon section
    applied: usize,
    /// Lines added to notes or style
    noted: usize,
    /// Facts and lines already present
    skipped: usize,
}

impl AbsorbReport {
    /// True when canon changed.
    pub fn changed(&self) -> bool {
        self.applied + self.noted > 0
    }
}

/// Traceable note line tagged with the originating chapter.
///
/// # Examples
///
/// ```
/// use quill_canon::note_line;
///
/// assert_eq!(note_line(4, "item", "lantern", "never goes out"), "[Ch4][item] lantern: never goes out");
/// ```
pub fn note_line(chapter_index: u32, kind: &str, key: &str, value: &str) -> String {
    format!("[Ch{}][{}] {}: {}", chapter_index, kind, key, value)
}

fn style_line(chapter_index: u32, note: &str) -> String {
    format!("- [Ch{}] {}", chapter_index, note.trim())
}

/// Appends a line to `style.md` unless it is already there.
fn append_style(style: &mut String, line: &str) -> bool {
    if line.trim().is_empty() || style.lines().any(|l| l == line) {
        return false;
    }
    if !style.is_empty() && !style.ends_with('\n') {
        style.push('\n');
    }
    style.push_str(line);
    style.push('\n');
    true
}

fn absorb_fact(canon: &mut CanonBundle, fact: &NewFact, chapter_index: u32, report: &mut AbsorbReport) {
    let key = fact.key.trim().to_string();
    let value = fact.value.trim().to_string();
    let changed = match fact.category() {
        FactKind::Rule => upsert_named(&mut canon.world.rules, WorldRule { name: key, detail: value }).changed(),
        FactKind::Faction => upsert_named(&mut canon.world.factions, NamedEntry { name: key, detail: value }).changed(),
        FactKind::Place => upsert_named(&mut canon.world.places, NamedEntry { name: key, detail: value }).changed(),
        FactKind::Character => upsert_named(
            &mut canon.characters.characters,
            Character {
                name: key,
                detail: value,
                ..Default::default()
            },
        )
        .changed(),
        FactKind::Timeline => {
            if canon.timeline.events.iter().any(|e| e.what == key) {
                false
            } else {
                let order = canon.timeline.next_order();
                canon.timeline.events.push(TimelineEvent {
                    order,
                    when: format!("chapter {}", chapter_index),
                    what: key,
                    impact: value,
                });
                true
            }
        }
        FactKind::Note => {
            let line = note_line(chapter_index, fact.kind.trim(), &key, &value);
            if push_unique(&mut canon.world.notes, line) {
                report.noted += 1;
            } else {
                report.skipped += 1;
            }
            return;
        }
    };
    if changed {
        report.applied += 1;
    } else {
        report.skipped += 1;
    }
}

/// Promotes one chapter's memory into canon.
///
/// Refuses with [`ConsistencyErrorKind::NotApproved`] unless the chapter was
/// accepted by the editor or `allow_unapproved` is set. Facts are routed by
/// type: rules, factions, places and characters use name-keyed upsert,
/// timeline facts become events, anything else is kept as a note line.
/// Character updates become character notes; style notes are appended to
/// `style.md`. Repeated absorption of the same memory changes nothing.
pub fn absorb_memory(
    canon: &mut CanonBundle,
    memory: &ChapterMemory,
    allow_unapproved: bool,
) -> QuillResult<AbsorbReport> {
    if !memory.editor_decision.is_accepted() && !allow_unapproved {
        return Err(ConsistencyError::new(ConsistencyErrorKind::NotApproved {
            chapter_index: memory.chapter_index,
            decision: memory.editor_decision.to_string(),
        })
        .into());
    }

    let idx = memory.chapter_index;
    let mut report = AbsorbReport::default();

    for fact in &memory.new_facts {
        if fact.key.trim().is_empty() || fact.value.trim().is_empty() {
            continue;
        }
        absorb_fact(canon, fact, idx, &mut report);
    }

    for update in &memory.character_updates {
        let detail = [update.status.trim(), update.new_info.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        if update.name.trim().is_empty() || detail.is_empty() {
            continue;
        }
        let line = note_line(idx, "character update", update.name.trim(), &detail);
        if push_unique(&mut canon.characters.notes, line) {
            report.noted += 1;
        } else {
            report.skipped += 1;
        }
    }

    for note in &memory.style_notes {
        if note.trim().is_empty() {
            continue;
        }
        if append_style(&mut canon.style, &style_line(idx, note)) {
            report.noted += 1;
        } else {
            report.skipped += 1;
        }
    }

    debug!(
        chapter_index = idx,
        applied = report.applied,
        noted = report.noted,
        skipped = report.skipped,
        "Absorbed chapter memory"
    );
    Ok(report)
}

/// Applies an editor-suggested canon patch.
///
/// `note` adds a note line to the target file's `notes` (or a style line for
/// `style.md`) and only accepts an empty path or `notes`; `append` appends
/// text to `style.md` and a note line elsewhere. Returns whether canon
/// changed.
pub fn apply_canon_patch(canon: &mut CanonBundle, patch: &CanonPatch, chapter_index: u32) -> QuillResult<bool> {
    let value = patch.value.trim();
    if value.is_empty() {
        return Err(ConsistencyError::new(ConsistencyErrorKind::PatchRejected(format!(
            "empty value for {}",
            patch.target
        )))
        .into());
    }
    let path = patch.path.trim();
    if patch.op == PatchOp::Note && !(path.is_empty() || path == "notes" || path == "N/A") {
        return Err(ConsistencyError::new(ConsistencyErrorKind::PatchRejected(format!(
            "note patches only write notes, got path '{}'",
            path
        )))
        .into());
    }

    let line = note_line(chapter_index, "patch", &patch.target.to_string(), value);
    let changed = match patch.target {
        CanonTarget::Style => append_style(&mut canon.style, &style_line(chapter_index, value)),
        CanonTarget::World => push_unique(&mut canon.world.notes, line),
        CanonTarget::Characters => push_unique(&mut canon.characters.notes, line),
        CanonTarget::Timeline => push_unique(&mut canon.timeline.notes, line),
    };
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{CharacterUpdate, Decision};

    fn accepted(idx: u32, facts: Vec<NewFact>) -> ChapterMemory {
        ChapterMemory {
            chapter_index: idx,
            new_facts: facts,
            editor_decision: Decision::Accepted,
            approved: true,
            ..Default::default()
        }
    }

    fn fact(kind: &str, key: &str, value: &str) -> NewFact {
        NewFact {
            kind: kind.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_rejected_memory_is_refused() {
        let mut canon = CanonBundle::default();
        let memory = ChapterMemory {
            chapter_index: 2,
            new_facts: vec![fact("place", "Harrow", "salt town")],
            ..Default::default()
        };
        let err = absorb_memory(&mut canon, &memory, false).unwrap_err();
        assert!(err.to_string().contains("not approved"));
        assert!(canon.world.places.is_empty());
    }

    #[test]
    fn test_override_allows_unapproved() {
        let mut canon = CanonBundle::default();
        let memory = ChapterMemory {
            chapter_index: 2,
            new_facts: vec![fact("place", "Harrow", "salt town")],
            ..Default::default()
        };
        let report = absorb_memory(&mut canon, &memory, true).unwrap();
        assert_eq!(*report.applied(), 1);
    }

    #[test]
    fn test_facts_are_routed_by_type() {
        let mut canon = CanonBundle::default();
        let memory = accepted(
            3,
            vec![
                fact("rule", "no magic after dusk", "spells fizzle"),
                fact("faction", "Salt Guild", "controls the harbor"),
                fact("place", "Harrow", "salt town"),
                fact("timeline", "the flood", "harbor destroyed"),
                fact("character", "Tobin", "the ferryman"),
                fact("item", "lantern", "never goes out"),
            ],
        );
        let report = absorb_memory(&mut canon, &memory, false).unwrap();
        assert_eq!(*report.applied(), 5);
        assert_eq!(*report.noted(), 1);
        assert_eq!(canon.world.rules[0].name, "no magic after dusk");
        assert_eq!(canon.world.factions[0].name, "Salt Guild");
        assert_eq!(canon.timeline.events[0].when, "chapter 3");
        assert!(canon.characters.find("Tobin").is_some());
        assert_eq!(canon.world.notes, vec!["[Ch3][item] lantern: never goes out"]);
    }

    #[test]
    fn test_existing_rule_detail_is_preserved() {
        let mut canon = CanonBundle::default();
        canon.world.rules.push(WorldRule {
            name: "no magic after dusk".into(),
            detail: "spells fizzle".into(),
        });
        let memory = accepted(5, vec![fact("rule", "no magic after dusk", "spells explode")]);
        let report = absorb_memory(&mut canon, &memory, false).unwrap();
        assert_eq!(*report.skipped(), 1);
        assert_eq!(canon.world.rules.len(), 1);
        assert_eq!(canon.world.rules[0].detail, "spells fizzle");
    }

    #[test]
    fn test_absorption_is_repeatable() {
        let mut canon = CanonBundle::default();
        let mut memory = accepted(1, vec![fact("item", "lantern", "never goes out")]);
        memory.style_notes = vec!["short sentences".into()];
        memory.character_updates = vec![CharacterUpdate {
            name: "Mara".into(),
            status: "wounded".into(),
            new_info: String::new(),
        }];
        absorb_memory(&mut canon, &memory, false).unwrap();
        let again = absorb_memory(&mut canon, &memory, false).unwrap();
        assert!(!again.changed());
        assert_eq!(canon.world.notes.len(), 1);
        assert_eq!(canon.style, "- [Ch1] short sentences\n");
        assert_eq!(canon.characters.notes, vec!["[Ch1][character update] Mara: wounded"]);
    }

    #[test]
    fn test_note_patch_rejects_structured_paths() {
        let mut canon = CanonBundle::default();
        let patch = CanonPatch {
            target: CanonTarget::World,
            op: PatchOp::Note,
            path: "rules".into(),
            value: "x".into(),
        };
        assert!(apply_canon_patch(&mut canon, &patch, 1).is_err());

        let ok = CanonPatch {
            path: "notes".into(),
            ..patch
        };
        assert!(apply_canon_patch(&mut canon, &ok, 1).unwrap());
        assert!(!apply_canon_patch(&mut canon, &ok, 1).unwrap());
    }

    #[test]
    fn test_style_append_patch() {
        let mut canon = CanonBundle {
            style: "# Style".into(),
            ..Default::default()
        };
        let patch = CanonPatch {
            target: CanonTarget::Style,
            op: PatchOp::Append,
            path: String::new(),
            value: "present tense".into(),
        };
        assert!(apply_canon_patch(&mut canon, &patch, 2).unwrap());
        assert_eq!(canon.style, "# Style\n- [Ch2] present tense\n");
    }
}
