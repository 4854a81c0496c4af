//! Materials: the per-role planning outputs and the versioned pack built from them.

use crate::normalize::{items, str_field, string_list, u32_field};
use crate::{CanonBundle, Characters, World};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One outline entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutlineChapter {
    /// 1-based chapter index
    pub chapter_index: u32,
    /// Chapter title
    #[serde(default)]
    pub title: String,
    /// What the chapter must achieve
    #[serde(default)]
    pub goal: String,
    /// Central conflict
    #[serde(default)]
    pub conflict: String,
    /// Beats in order
    #[serde(default)]
    pub beats: Vec<String>,
    /// Closing hook
    #[serde(default)]
    pub ending_hook: String,
}

/// Screenwriter output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outline {
    /// Working title
    #[serde(default)]
    pub title: String,
    /// Chapter entries
    #[serde(default)]
    pub chapters: Vec<OutlineChapter>,
}

impl Outline {
    /// Normalises outline JSON, padding to `chapters` entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use quill_core::Outline;
    /// use serde_json::json;
    ///
    /// let outline = Outline::ensure(&json!({"chapters": [{"title": "Arrival"}]}), 3);
    /// assert_eq!(outline.chapters.len(), 3);
    /// assert_eq!(outline.chapters[0].chapter_index, 1);
    /// assert_eq!(outline.chapters[2].title, "Chapter 3");
    /// ```
    pub fn ensure(value: &Value, chapters: u32) -> Self {
        let mut entries: Vec<OutlineChapter> = items(value, "chapters")
            .iter()
            .enumerate()
            .map(|(i, c)| OutlineChapter {
                chapter_index: u32_field(c, "chapter_index").unwrap_or(i as u32 + 1),
                title: str_field(c, "title"),
                goal: str_field(c, "goal"),
                conflict: str_field(c, "conflict"),
                beats: string_list(c, "beats"),
                ending_hook: str_field(c, "ending_hook"),
            })
            .collect();
        entries.sort_by_key(|c| c.chapter_index);
        for index in 1..=chapters {
            if !entries.iter().any(|c| c.chapter_index == index) {
                entries.push(OutlineChapter {
                    chapter_index: index,
                    ..Default::default()
                });
            }
        }
        entries.sort_by_key(|c| c.chapter_index);
        for entry in &mut entries {
            if entry.title.is_empty() {
                entry.title = format!("Chapter {}", entry.chapter_index);
            }
        }
        Outline {
            title: str_field(value, "title"),
            chapters: entries,
        }
    }

    /// Entry for one chapter.
    pub fn chapter(&self, index: u32) -> Option<&OutlineChapter> {
        self.chapters.iter().find(|c| c.chapter_index == index)
    }
}

/// Tone setter output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tone {
    /// Narrative voice
    #[serde(default)]
    pub narration: String,
    /// Pacing guidance
    #[serde(default)]
    pub pacing: String,
    /// Hard style rules
    #[serde(default)]
    pub style_constraints: Vec<String>,
    /// Things to avoid
    #[serde(default)]
    pub avoid: Vec<String>,
    /// Reference style
    #[serde(default)]
    pub reference_style: String,
}

impl Tone {
    /// Normalises tone JSON.
    pub fn ensure(value: &Value) -> Self {
        Tone {
            narration: str_field(value, "narration"),
            pacing: str_field(value, "pacing"),
            style_constraints: string_list(value, "style_constraints"),
            avoid: string_list(value, "avoid"),
            reference_style: str_field(value, "reference_style"),
        }
    }

    /// True when the tone carries no guidance at all.
    pub fn is_empty(&self) -> bool {
        self.narration.is_empty()
            && self.pacing.is_empty()
            && self.style_constraints.is_empty()
            && self.avoid.is_empty()
            && self.reference_style.is_empty()
    }
}

/// The four planning outputs, reconciled before prose generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialsBundle {
    /// Architect output
    #[serde(default)]
    pub world: World,
    /// Character director output
    #[serde(default)]
    pub characters: Characters,
    /// Screenwriter output
    #[serde(default)]
    pub outline: Outline,
    /// Tone setter output
    #[serde(default)]
    pub tone: Tone,
}

/// Pack metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackMeta {
    /// Project directory the pack belongs to
    #[serde(default)]
    pub project_dir: String,
    /// Version label, `vNNN`
    #[serde(default)]
    pub version: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: String,
    /// RFC 3339 freeze time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_at: Option<String>,
    /// Version label once frozen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_version: Option<String>,
    /// Frozen version a refreeze draft was copied from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from_frozen_version: Option<String>,
    /// Change proposal that asked for the refreeze
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from_proposal_id: Option<String>,
}

/// Planning section: outline and tone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Planning {
    /// Outline
    #[serde(default)]
    pub outline: Outline,
    /// Tone
    #[serde(default)]
    pub tone: Tone,
}

/// A recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecDecision {
    /// Anchor id, filled when anchors are built
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// What was decided about
    #[serde(default)]
    pub topic: String,
    /// The decision
    #[serde(default)]
    pub decision: String,
    /// Why
    #[serde(default)]
    pub rationale: String,
}

/// Checklists at three granularities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checklists {
    /// Applies to every chapter
    #[serde(default)]
    pub global: Vec<String>,
    /// Applies per arc
    #[serde(default)]
    pub per_arc: Vec<String>,
    /// Applies per chapter
    #[serde(default)]
    pub per_chapter: Vec<String>,
}

/// One glossary entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// Anchor id, filled when anchors are built
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Term
    pub term: String,
    /// Description
    #[serde(default)]
    pub desc: String,
}

/// Glossary grouped by category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Glossary {
    /// Character names
    #[serde(default)]
    pub characters: Vec<GlossaryEntry>,
    /// Faction names
    #[serde(default)]
    pub factions: Vec<GlossaryEntry>,
    /// Place names
    #[serde(default)]
    pub places: Vec<GlossaryEntry>,
    /// World rule names
    #[serde(default)]
    pub rules: Vec<GlossaryEntry>,
}

/// Numeric and stylistic constraints for the writer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Target length per chapter, in characters
    #[serde(default)]
    pub target_words: u32,
    /// Lower bound as a fraction of the target
    #[serde(default)]
    pub writer_min_ratio: f64,
    /// Upper bound as a fraction of the target
    #[serde(default)]
    pub writer_max_ratio: f64,
    /// Free-form style override
    #[serde(default)]
    pub style_override: String,
    /// Paragraphing rules
    #[serde(default)]
    pub paragraph_rules: Vec<String>,
    /// Naming policy
    #[serde(default)]
    pub naming_policy: String,
    /// Point of view, e.g. `third`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pov: String,
    /// Phrases a chapter must never contain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prohibited_phrases: Vec<String>,
    /// Phrases a chapter is expected to contain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_phrases: Vec<String>,
}

/// An unresolved question. Blocks freezing when `severity == "blocker"` or
/// `blocking == true`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenQuestion {
    /// The question
    pub question: String,
    /// blocker | major | minor
    #[serde(default)]
    pub severity: String,
    /// Explicit blocking flag
    #[serde(default)]
    pub blocking: bool,
}

impl OpenQuestion {
    /// True when this question vetoes freezing.
    pub fn is_blocking(&self) -> bool {
        self.blocking || self.severity.trim().eq_ignore_ascii_case("blocker")
    }
}

/// Execution layer consumed by the writer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Execution {
    /// Decisions
    #[serde(default)]
    pub decisions: Vec<ExecDecision>,
    /// Checklists
    #[serde(default)]
    pub checklists: Checklists,
    /// Glossary
    #[serde(default)]
    pub glossary: Glossary,
    /// Constraints
    #[serde(default)]
    pub constraints: Constraints,
    /// Known risks
    #[serde(default)]
    pub risks: Vec<String>,
    /// Open questions raised while building the execution layer
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
}

/// Risk register.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Risk {
    /// Risks
    #[serde(default)]
    pub risks: Vec<String>,
    /// Open questions
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
}

/// A materials pack, draft or frozen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialsPack {
    /// Metadata
    #[serde(default)]
    pub meta: PackMeta,
    /// Canon snapshot
    #[serde(default)]
    pub canon: CanonBundle,
    /// Outline and tone
    #[serde(default)]
    pub planning: Planning,
    /// Execution layer
    #[serde(default)]
    pub execution: Execution,
    /// Risk register
    #[serde(default)]
    pub risk: Risk,
    /// Changelog lines
    #[serde(default)]
    pub changelog: Vec<String>,
}

impl MaterialsPack {
    /// Every open question in the pack, risk register first.
    pub fn open_questions(&self) -> impl Iterator<Item = &OpenQuestion> {
        self.risk
            .open_questions
            .iter()
            .chain(self.execution.open_questions.iter())
    }

    /// Renders the pack as a JSON object.
    pub fn to_object(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_question_blocking_rules() {
        let q: OpenQuestion =
            serde_json::from_value(json!({"question": "Q1", "severity": "Blocker"})).unwrap();
        assert!(q.is_blocking());
        let flagged: OpenQuestion =
            serde_json::from_value(json!({"question": "Q2", "blocking": true})).unwrap();
        assert!(flagged.is_blocking());
        let soft: OpenQuestion =
            serde_json::from_value(json!({"question": "Q3", "severity": "minor"})).unwrap();
        assert!(!soft.is_blocking());
    }

    #[test]
    fn test_outline_keeps_given_indices() {
        let outline = Outline::ensure(
            &json!({"chapters": [{"chapter_index": "2", "title": "B"}, {"chapter_index": 1, "title": "A"}]}),
            2,
        );
        assert_eq!(outline.chapters.len(), 2);
        assert_eq!(outline.chapter(1).unwrap().title, "A");
        assert_eq!(outline.chapter(2).unwrap().title, "B");
    }

    #[test]
    fn test_pack_collects_open_questions() {
        let mut pack = MaterialsPack::default();
        pack.risk.open_questions.push(OpenQuestion {
            question: "a".into(),
            ..Default::default()
        });
        pack.execution.open_questions.push(OpenQuestion {
            question: "b".into(),
            ..Default::default()
        });
        assert_eq!(pack.open_questions().count(), 2);
        assert!(pack.to_object().contains_key("execution"));
    }
}
