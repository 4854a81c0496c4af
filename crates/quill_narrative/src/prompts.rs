//! Schema descriptions and context digests embedded in agent prompts.

use quill_core::{CanonBundle, MaterialsPack, OutlineChapter};
use quill_storage::truncate;
use std::fmt::Write;

/// Architect schema.
pub const WORLD_SCHEMA: &str = r#"{
  "rules": [{"name": "string", "detail": "string"}],
  "factions": [{"name": "string", "detail": "string"}],
  "places": [{"name": "string", "detail": "string"}],
  "notes": ["string"]
}"#;

/// Character director schema.
pub const CHARACTERS_SCHEMA: &str = r#"{
  "characters": [{"name": "string", "role": "protagonist|antagonist|ally|...", "detail": "string", "motivation": "string", "arc": "string"}]
}"#;

/// Screenwriter schema.
pub const OUTLINE_SCHEMA: &str = r#"{
  "title": "string",
  "chapters": [{"chapter_index": 1, "title": "string", "goal": "string", "conflict": "string", "beats": ["string"], "ending_hook": "string"}]
}"#;

/// Tone setter schema.
pub const TONE_SCHEMA: &str = r#"{
  "narration": "string",
  "pacing": "string",
  "style_constraints": ["string"],
  "avoid": ["string"],
  "reference_style": "string"
}"#;

/// Chief editor schema for the execution layer.
pub const EXECUTION_SCHEMA: &str = r#"{
  "logline": "string",
  "pacing_plan": "string",
  "decisions": [{"topic": "string", "decision": "string", "rationale": "string"}],
  "checklists": {"global": ["string"], "per_arc": ["string"], "per_chapter": ["string"]},
  "risks": ["string"],
  "open_questions": [{"question": "string", "severity": "blocker|major|minor", "blocking": false}]
}"#;

/// Editor schema.
pub const EDITOR_SCHEMA: &str = r#"{
  "decision": "accepted|rejected",
  "issues": [{
    "type": "canon_conflict|contradiction|meta_leakage|length|pacing|character|style|...",
    "canon_key": "string",
    "quote": "verbatim snippet from the draft",
    "issue": "what is wrong",
    "fix": "how to fix it",
    "action": "rewrite|canon_patch|escalate",
    "severity": "critical|major|minor",
    "canon_patch": {"target": "world.json|characters.json|timeline.json|style.md", "op": "note|append", "path": "notes", "value": "string"}
  }]
}"#;

/// Memory compiler schema.
pub const MEMORY_SCHEMA: &str = r#"{
  "summary": "string",
  "events": [{"what": "string", "where": "string", "who": ["string"], "result": "string"}],
  "character_updates": [{"name": "string", "status": "string", "new_info": "string"}],
  "new_facts": [{"type": "rule|faction|place|timeline|character|item", "key": "string", "value": "string"}],
  "open_threads": ["string"],
  "style_notes": ["string"]
}"#;

/// Arc summary schema.
pub const ARC_SCHEMA: &str = r#"{
  "summary": "string",
  "key_facts": ["string"],
  "character_states": {"<name>": "string"},
  "open_threads": ["string"]
}"#;

const CANON_DIGEST_CHARS: usize = 4000;
const MATERIALS_DIGEST_CHARS: usize = 4000;

/// Compact canon rendering for prompts.
pub fn canon_digest(canon: &CanonBundle) -> String {
    let mut out = String::new();
    let world = &canon.world;
    for rule in &world.rules {
        let _ = writeln!(out, "rule: {} - {}", rule.name, rule.detail);
    }
    for faction in &world.factions {
        let _ = writeln!(out, "faction: {} - {}", faction.name, faction.detail);
    }
    for place in &world.places {
        let _ = writeln!(out, "place: {} - {}", place.name, place.detail);
    }
    for character in &canon.characters.characters {
        let _ = writeln!(out, "character: {} ({}) - {}", character.name, character.role, character.detail);
    }
    for event in &canon.timeline.events {
        let _ = writeln!(out, "timeline {}: {} {}", event.order, event.when, event.what);
    }
    for note in world.notes.iter().chain(&canon.characters.notes) {
        let _ = writeln!(out, "note: {}", note);
    }
    if !canon.style.trim().is_empty() {
        let _ = writeln!(out, "style:\n{}", canon.style.trim());
    }
    if out.is_empty() {
        out.push_str("(canon is empty)");
    }
    truncate(out.trim_end(), CANON_DIGEST_CHARS)
}

/// Execution-layer digest the writer and editor work from.
pub fn materials_digest(pack: &MaterialsPack) -> String {
    let mut out = String::new();
    let execution = &pack.execution;
    for decision in &execution.decisions {
        let id = if decision.id.is_empty() { "-" } else { decision.id.as_str() };
        let _ = writeln!(out, "[{}] {}: {}", id, decision.topic, decision.decision);
    }
    let c = &execution.constraints;
    let _ = writeln!(
        out,
        "length: about {} characters ({:.2}-{:.2} of target)",
        c.target_words, c.writer_min_ratio, c.writer_max_ratio
    );
    if !c.naming_policy.is_empty() {
        let _ = writeln!(out, "naming: {}", c.naming_policy);
    }
    for rule in &c.paragraph_rules {
        let _ = writeln!(out, "paragraphs: {}", rule);
    }
    for item in execution.checklists.global.iter().chain(&execution.checklists.per_chapter) {
        let _ = writeln!(out, "check: {}", item);
    }
    let tone = &pack.planning.tone;
    if !tone.narration.is_empty() {
        let _ = writeln!(out, "narration: {}", tone.narration);
    }
    if !tone.pacing.is_empty() {
        let _ = writeln!(out, "pacing: {}", tone.pacing);
    }
    for avoid in &tone.avoid {
        let _ = writeln!(out, "avoid: {}", avoid);
    }
    truncate(out.trim_end(), MATERIALS_DIGEST_CHARS)
}

/// One outline entry as prompt text.
pub fn outline_entry(chapter: &OutlineChapter) -> String {
    let mut out = format!("Chapter {}: {}\n", chapter.chapter_index, chapter.title);
    if !chapter.goal.is_empty() {
        let _ = writeln!(out, "goal: {}", chapter.goal);
    }
    if !chapter.conflict.is_empty() {
        let _ = writeln!(out, "conflict: {}", chapter.conflict);
    }
    for (i, beat) in chapter.beats.iter().enumerate() {
        let _ = writeln!(out, "beat {}: {}", i + 1, beat);
    }
    if !chapter.ending_hook.is_empty() {
        let _ = writeln!(out, "ending hook: {}", chapter.ending_hook);
    }
    out.trim_end().to_string()
}
