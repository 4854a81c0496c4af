//! Planning roles: architect, character director, screenwriter, tone setter.

use super::{AgentRuntime, Drafted};
use crate::prompts::{CHARACTERS_SCHEMA, OUTLINE_SCHEMA, TONE_SCHEMA, WORLD_SCHEMA, canon_digest};
use crate::repair::SchemaCall;
use quill_core::{
    CanonBundle, Character, Characters, Message, NamedEntry, Outline, OutlineChapter, Tone, World,
    WorldRule,
};
use quill_error::QuillResult;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

fn non_empty_list(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key)
        .and_then(Value::as_array)
        .is_some_and(|list| !list.is_empty())
}

fn validate_world(map: &Map<String, Value>) -> String {
    if !non_empty_list(map, "rules") {
        return "rules must be a non-empty list".into();
    }
    String::new()
}

fn validate_characters(map: &Map<String, Value>) -> String {
    let characters = Characters::ensure(&Value::Object(map.clone()));
    if characters.characters.is_empty() {
        return "characters must list at least one named character".into();
    }
    String::new()
}

fn validate_tone(map: &Map<String, Value>) -> String {
    let tone = Tone::ensure(&Value::Object(map.clone()));
    if tone.narration.is_empty() {
        return "narration is required".into();
    }
    String::new()
}

/// Deterministic world used when no model output is available.
pub fn template_world(idea: &str) -> World {
    World {
        rules: vec![WorldRule {
            name: "core premise".into(),
            detail: format!("(template) {}", idea.trim()),
        }],
        factions: vec![NamedEntry {
            name: "the establishment".into(),
            detail: "(template) holds power and resists change".into(),
        }],
        places: vec![NamedEntry {
            name: "the starting town".into(),
            detail: "(template) where the story opens".into(),
        }],
        notes: vec!["(template) world generated without a model".into()],
        ..Default::default()
    }
}

/// Builds `canon/world.json` content from the idea.
#[instrument(skip_all)]
pub async fn architect(rt: &AgentRuntime, idea: &str, canon: &CanonBundle) -> QuillResult<Drafted<World>> {
    let messages = [
        Message::system(
            "You are the world architect of a serialized novel. Define the rules, factions and \
             places the story depends on. Existing canon is ground truth: extend it, never contradict it.",
        ),
        Message::user(format!("Idea: {}\n\nCanon:\n{}", idea.trim(), canon_digest(canon))),
    ];
    let call = SchemaCall::new("architect", WORLD_SCHEMA).validate(validate_world);
    Ok(match rt.structured(&messages, call).await? {
        Some(map) => Drafted::generated(World::ensure(&Value::Object(map))),
        None => {
            debug!("Using template world");
            Drafted::template(template_world(idea))
        }
    })
}

/// Deterministic cast used when no model output is available.
pub fn template_characters() -> Characters {
    let character = |name: &str, role: &str, detail: &str| Character {
        name: name.into(),
        role: role.into(),
        detail: format!("(template) {}", detail),
        ..Default::default()
    };
    Characters {
        characters: vec![
            character("protagonist", "protagonist", "wants out of the life they were handed"),
            character("antagonist", "antagonist", "benefits from things staying as they are"),
            character("ally", "ally", "knows more than they say"),
        ],
        notes: Vec::new(),
    }
}

/// Builds the cast.
#[instrument(skip_all)]
pub async fn character_director(
    rt: &AgentRuntime,
    idea: &str,
    world: &World,
    canon: &CanonBundle,
) -> QuillResult<Drafted<Characters>> {
    let world_json = serde_json::to_string(world).unwrap_or_default();
    let messages = [
        Message::system(
            "You are the character director of a serialized novel. Create a compact cast with \
             clear wants and conflicts. Characters already in canon keep their names and roles.",
        ),
        Message::user(format!(
            "Idea: {}\n\nWorld:\n{}\n\nCanon:\n{}",
            idea.trim(),
            world_json,
            canon_digest(canon)
        )),
    ];
    let call = SchemaCall::new("character_director", CHARACTERS_SCHEMA).validate(validate_characters);
    Ok(match rt.structured(&messages, call).await? {
        Some(map) => Drafted::generated(Characters::ensure(&Value::Object(map))),
        None => Drafted::template(template_characters()),
    })
}

/// Deterministic outline used when no model output is available.
pub fn template_outline(chapters: u32) -> Outline {
    let total = chapters.max(1);
    let entries = (1..=total)
        .map(|i| {
            let (goal, conflict) = if i == 1 {
                ("establish the protagonist and the pressure on them", "the old life refuses to let go")
            } else if i == total {
                ("force the central choice and pay its price", "everything the protagonist wants collides")
            } else {
                ("push the main line forward and raise the cost", "outside resistance meets inner doubt")
            };
            OutlineChapter {
                chapter_index: i,
                title: format!("(template) Chapter {}", i),
                goal: goal.into(),
                conflict: conflict.into(),
                beats: vec![
                    "move the main events forward".into(),
                    "stage a confrontation".into(),
                    "leave a hook".into(),
                ],
                ending_hook: "a question the next chapter has to answer".into(),
            }
        })
        .collect();
    Outline {
        title: "(template) untitled".into(),
        chapters: entries,
    }
}

/// Builds the chapter outline.
#[instrument(skip_all, fields(chapters))]
pub async fn screenwriter(
    rt: &AgentRuntime,
    idea: &str,
    canon: &CanonBundle,
    chapters: u32,
) -> QuillResult<Drafted<Outline>> {
    let messages = [
        Message::system(format!(
            "You are the screenwriter of a serialized novel. Outline chapters 1..{} in order, \
             each with a goal, a conflict, 2-5 beats and an ending hook. Keep it short so the JSON \
             stays complete.",
            chapters
        )),
        Message::user(format!(
            "Idea: {}\nChapters: {}\n\nCanon:\n{}",
            idea.trim(),
            chapters,
            canon_digest(canon)
        )),
    ];
    let expected = chapters as usize;
    let call = SchemaCall::new("screenwriter", OUTLINE_SCHEMA).validate(move |map| {
        let count = map
            .get("chapters")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if count < expected {
            format!("chapters must cover 1..{}, got {} entries", expected, count)
        } else {
            String::new()
        }
    });
    Ok(match rt.structured(&messages, call).await? {
        Some(map) => Drafted::generated(Outline::ensure(&Value::Object(map), chapters)),
        None => Drafted::template(template_outline(chapters)),
    })
}

/// Deterministic tone used when no model output is available.
pub fn template_tone() -> Tone {
    Tone {
        narration: "(template) close third person, past tense".into(),
        pacing: "(template) fast opening, conflict up front, exposition through action and dialogue".into(),
        style_constraints: vec![
            "no summarising sentences".into(),
            "vary sentence shapes".into(),
            "show the setting through scenes, never lecture".into(),
        ],
        avoid: vec![
            "moralising wrap-ups".into(),
            "encyclopedic exposition".into(),
            "repeated sentence patterns".into(),
        ],
        reference_style: String::new(),
    }
}

/// Sets narration, pacing and style rules.
#[instrument(skip_all)]
pub async fn tone_setter(rt: &AgentRuntime, idea: &str, canon: &CanonBundle) -> QuillResult<Drafted<Tone>> {
    let style = if canon.style.trim().is_empty() {
        "(none yet)"
    } else {
        canon.style.trim()
    };
    let messages = [
        Message::system(
            "You set the tone of a serialized novel: narrative voice, pacing, hard style rules and \
             things to avoid. Existing style notes are binding.",
        ),
        Message::user(format!("Idea: {}\n\nCurrent style notes:\n{}", idea.trim(), style)),
    ];
    let call = SchemaCall::new("tone", TONE_SCHEMA).validate(validate_tone);
    Ok(match rt.structured(&messages, call).await? {
        Some(map) => Drafted::generated(Tone::ensure(&Value::Object(map))),
        None => Drafted::template(template_tone()),
    })
}
