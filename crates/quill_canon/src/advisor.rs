//! Rule-based audit of a finished chapter against the frozen materials pack.
//!
//! The advisor never changes a chapter. It reports findings, each citing the
//! anchors of the pack entries it checked, and suggests an action.

use crate::{AnchorIndex, FrozenPack};
use quill_core::{Decision, MaterialsPack};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PROPER_NOUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9_-]{2,}\b").expect("Valid proper noun regex"));
static FIRST_PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:I|[Ww]e|[Mm]y|[Oo]ur)\b").expect("Valid pronoun regex"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|“[^”]*”"#).expect("Valid dialogue regex"));

/// Narration that talks about the task instead of the story.
const META_PHRASES: &[&str] = &[
    "as an ai",
    "language model",
    "i cannot",
    "i can't",
    "in this chapter",
    "this chapter will",
    "here is the chapter",
];

/// Over-length beyond this factor of the upper bound suggests a rewrite.
const SEVERE_LENGTH_FACTOR: f64 = 1.2;
const DEFAULT_MIN_RATIO: f64 = 0.7;
const DEFAULT_MAX_RATIO: f64 = 1.5;
const DIGEST_CHARS: usize = 120;
const LISTED: usize = 6;

/// Severity of a finding, and the risk level of a whole report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Nothing found
    #[display("low")]
    Low,
    /// Findings that do not need a rewrite
    #[display("medium")]
    Medium,
    /// A rewrite is advised
    #[display("high")]
    High,
    /// The frozen pack itself still has blocking questions
    #[display("blocker")]
    Blocker,
}

/// What a single finding asks for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Suggestion {
    /// Worth knowing, no action
    #[display("note")]
    Note,
    /// Rewrite the chapter
    #[display("rewrite")]
    Rewrite,
    /// A human has to decide
    #[display("escalate")]
    Escalate,
}

/// What the advisor recommends for the chapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorAction {
    /// Keep the chapter
    #[default]
    #[display("accept")]
    Accept,
    /// Rewrite the chapter
    #[display("rewrite")]
    Rewrite,
    /// Stop and ask a human
    #[display("escalate")]
    Escalate,
}

/// An anchor id with its location, empty when the id is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAnchor {
    /// Anchor id
    pub id: String,
    /// Path inside the pack
    pub path: String,
    /// Short title
    pub title: String,
}

/// One advisor finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorFinding {
    /// length | meta | prohibited_phrases | required_phrases | pov |
    /// naming_drift | materials_blocker | editor
    #[serde(rename = "type")]
    pub kind: String,
    /// How bad it is
    pub severity: RiskLevel,
    /// Human-readable detail
    pub message: String,
    /// What to do about it
    pub suggest: Suggestion,
    /// Pack entries the finding was checked against
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<ResolvedAnchor>,
}

/// Length figures the report was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorStats {
    /// Chapter length in characters
    pub chars: usize,
    /// Target from the pack constraints
    pub target_words: u32,
    /// Lower bound, 0 without a target
    pub min_chars: usize,
    /// Upper bound, 0 without a target
    pub max_chars: usize,
}

/// `chapters/NNN.advisor.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorReport {
    /// Frozen version the chapter was audited against
    pub materials_version: String,
    /// Escalate over rewrite over accept
    pub suggested_action: AdvisorAction,
    /// Overall risk
    pub risk_level: RiskLevel,
    /// Blocking open questions left in the frozen pack
    pub materials_blockers_count: usize,
    /// One-line summary
    pub digest: String,
    /// Length figures
    pub stats: AdvisorStats,
    /// Editor decision the audit saw, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_decision: Option<Decision>,
    /// Findings in check order
    pub findings: Vec<AdvisorFinding>,
}

/// Looks anchor ids up in `index`. Blank ids are skipped; unknown ids keep an
/// empty path and title.
///
/// # Examples
///
/// ```
/// use quill_canon::{AnchorIndex, resolve_anchor_details};
///
/// let resolved = resolve_anchor_details(&AnchorIndex::default(), &["DEC-001".into(), " ".into()]);
/// assert_eq!(resolved.len(), 1);
/// assert!(resolved[0].path.is_empty());
/// ```
pub fn resolve_anchor_details(index: &AnchorIndex, ids: &[String]) -> Vec<ResolvedAnchor> {
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| {
            let (path, title) = index
                .get(id)
                .map(|a| (a.path.clone(), a.title.clone()))
                .unwrap_or_default();
            ResolvedAnchor {
                id: id.to_string(),
                path,
                title,
            }
        })
        .collect()
}

/// Squeezes a report into one line for logs and review cards.
pub fn advisor_digest_line(action: AdvisorAction, risk: RiskLevel, findings: &[AdvisorFinding]) -> String {
    let mut line = format!("action={} | risk={}", action, risk);
    if let Some(top) = findings.first() {
        line.push_str(&format!(" | top={}", top.message));
    }
    if line.chars().count() > DIGEST_CHARS {
        let cut: String = line.chars().take(DIGEST_CHARS - 1).collect();
        line = format!("{}…", cut.trim_end());
    }
    line
}

struct Findings<'a> {
    anchors: &'a AnchorIndex,
    list: Vec<AdvisorFinding>,
}

impl Findings<'_> {
    fn add(&mut self, kind: &str, severity: RiskLevel, message: String, suggest: Suggestion, anchors: &[&str]) {
        let ids: Vec<String> = anchors.iter().map(|a| a.to_string()).collect();
        self.list.push(AdvisorFinding {
            kind: kind.to_string(),
            severity,
            message,
            suggest,
            anchors: resolve_anchor_details(self.anchors, &ids),
        });
    }
}

fn ratio_or(value: f64, default: f64) -> f64 {
    if value > 0.0 { value } else { default }
}

fn blockers(pack: &MaterialsPack) -> usize {
    pack.risk
        .open_questions
        .iter()
        .chain(&pack.execution.open_questions)
        .filter(|q| q.is_blocking())
        .count()
}

fn glossary_words(pack: &MaterialsPack) -> BTreeSet<String> {
    let glossary = &pack.execution.glossary;
    glossary
        .characters
        .iter()
        .chain(&glossary.factions)
        .chain(&glossary.places)
        .chain(&glossary.rules)
        .map(|e| e.term.as_str())
        .chain(pack.canon.characters.characters.iter().map(|c| c.name.as_str()))
        .flat_map(str::split_whitespace)
        .map(str::to_lowercase)
        .collect()
}

fn forbids_new_names(policy: &str) -> bool {
    let policy = policy.to_lowercase();
    ["no new", "forbid", "never introduce", "do not introduce"]
        .iter()
        .any(|p| policy.contains(p))
}

fn starts_sentence(text: &str, at: usize) -> bool {
    let before = text[..at].trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '“' | '\''));
    before.is_empty() || before.ends_with(['.', '!', '?', '…', ':'])
}

fn unknown_names(text: &str, allowed: &BTreeSet<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PROPER_NOUN
        .find_iter(text)
        .filter(|m| !starts_sentence(text, m.start()))
        .map(|m| m.as_str())
        .filter(|w| !allowed.contains(&w.to_lowercase()))
        .filter(|w| seen.insert(w.to_string()))
        .take(LISTED)
        .map(str::to_string)
        .collect()
}

fn is_third_person(pov: &str) -> bool {
    let pov = pov.trim().to_lowercase();
    pov == "3rd" || pov.contains("third")
}

/// Audits a finished chapter against a frozen pack.
///
/// Checks, in order: length against the pack constraints (more than 20 %
/// over the upper bound suggests a rewrite), meta narration, prohibited and
/// required phrases, point of view, new proper nouns under a strict naming
/// policy, blocking open questions left in the pack, and a non-accepting
/// editor decision.
pub fn build_advisor_report(
    chapter_text: &str,
    editor_decision: Option<Decision>,
    frozen: &FrozenPack,
) -> AdvisorReport {
    let pack = &frozen.pack;
    let c = &pack.execution.constraints;
    let mut findings = Findings {
        anchors: &frozen.anchors,
        list: Vec::new(),
    };

    let chars = chapter_text.chars().count();
    let (min_ratio, max_ratio) = (
        ratio_or(c.writer_min_ratio, DEFAULT_MIN_RATIO),
        ratio_or(c.writer_max_ratio, DEFAULT_MAX_RATIO),
    );
    let (min_chars, max_chars) = if c.target_words > 0 {
        (
            (f64::from(c.target_words) * min_ratio) as usize,
            (f64::from(c.target_words) * max_ratio) as usize,
        )
    } else {
        (0, 0)
    };
    if min_chars > 0 && chars < min_chars {
        findings.add(
            "length",
            RiskLevel::Medium,
            format!("chapter is short: {} < {} (target {})", chars, min_chars, c.target_words),
            Suggestion::Note,
            &["CON-target_words", "CON-writer_min_ratio"],
        );
    } else if max_chars > 0 && chars > max_chars {
        let severe = chars as f64 > max_chars as f64 * SEVERE_LENGTH_FACTOR;
        findings.add(
            "length",
            if severe { RiskLevel::High } else { RiskLevel::Medium },
            format!("chapter is long: {} > {} (target {})", chars, max_chars, c.target_words),
            if severe { Suggestion::Rewrite } else { Suggestion::Note },
            &["CON-target_words", "CON-writer_max_ratio"],
        );
    }

    let lower = chapter_text.to_lowercase();
    let meta: Vec<&str> = META_PHRASES.iter().copied().filter(|p| lower.contains(p)).take(5).collect();
    if !meta.is_empty() {
        findings.add(
            "meta",
            RiskLevel::High,
            format!("meta narration: {}", meta.join(", ")),
            Suggestion::Rewrite,
            &[],
        );
    }

    let prohibited: Vec<&str> = c
        .prohibited_phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && chapter_text.contains(p))
        .take(LISTED)
        .collect();
    if !prohibited.is_empty() {
        findings.add(
            "prohibited_phrases",
            RiskLevel::High,
            format!("prohibited phrases used: {}", prohibited.join(", ")),
            Suggestion::Rewrite,
            &["CON-prohibited_phrases"],
        );
    }

    let missing: Vec<&str> = c
        .required_phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && !chapter_text.contains(p))
        .take(LISTED)
        .collect();
    if !missing.is_empty() {
        findings.add(
            "required_phrases",
            RiskLevel::Low,
            format!("required phrases missing: {}", missing.join(", ")),
            Suggestion::Note,
            &["CON-required_phrases"],
        );
    }

    if is_third_person(&c.pov) {
        let narration = QUOTED.replace_all(chapter_text, " ");
        if FIRST_PERSON.is_match(&narration) {
            findings.add(
                "pov",
                RiskLevel::Medium,
                "first-person narration in a third-person pack".to_string(),
                Suggestion::Rewrite,
                &["CON-pov"],
            );
        }
    }

    if forbids_new_names(&c.naming_policy) {
        let unknown = unknown_names(chapter_text, &glossary_words(pack));
        if !unknown.is_empty() {
            findings.add(
                "naming_drift",
                RiskLevel::Medium,
                format!("names missing from the glossary: {}", unknown.join(", ")),
                Suggestion::Note,
                &["CON-naming_policy"],
            );
        }
    }

    let materials_blockers_count = blockers(pack);
    if materials_blockers_count > 0 {
        findings.add(
            "materials_blocker",
            RiskLevel::Blocker,
            format!(
                "frozen pack still has {} blocking open question(s)",
                materials_blockers_count
            ),
            Suggestion::Escalate,
            &[],
        );
    }

    if let Some(decision) = editor_decision.filter(|d| !d.is_accepted()) {
        findings.add(
            "editor",
            RiskLevel::High,
            format!("editor did not accept the chapter: {}", decision),
            Suggestion::Rewrite,
            &[],
        );
    }

    let findings = findings.list;
    let suggested_action = match findings.iter().map(|f| f.suggest).max() {
        Some(Suggestion::Escalate) => AdvisorAction::Escalate,
        Some(Suggestion::Rewrite) => AdvisorAction::Rewrite,
        _ => AdvisorAction::Accept,
    };
    let risk_level = if materials_blockers_count > 0 {
        RiskLevel::Blocker
    } else if suggested_action != AdvisorAction::Accept {
        RiskLevel::High
    } else if !findings.is_empty() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    AdvisorReport {
        materials_version: frozen.version.clone(),
        suggested_action,
        risk_level,
        materials_blockers_count,
        digest: advisor_digest_line(suggested_action, risk_level, &findings),
        stats: AdvisorStats {
            chars,
            target_words: c.target_words,
            min_chars,
            max_chars,
        },
        editor_decision,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Anchor;
    use quill_core::{Constraints, GlossaryEntry, OpenQuestion};

    fn frozen(constraints: Constraints) -> FrozenPack {
        let mut pack = MaterialsPack::default();
        pack.execution.constraints = constraints;
        pack.execution.glossary.characters.push(GlossaryEntry {
            term: "Mara Voss".into(),
            ..Default::default()
        });
        let mut anchors = AnchorIndex::default();
        for key in ["target_words", "writer_max_ratio", "naming_policy", "pov"] {
            anchors.anchors.insert(
                format!("CON-{}", key),
                Anchor {
                    path: format!("execution.constraints.{}", key),
                    title: key.to_string(),
                },
            );
        }
        FrozenPack {
            version: "v002".into(),
            pack,
            anchors,
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            target_words: 100,
            writer_min_ratio: 0.5,
            writer_max_ratio: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_chapter_is_accepted() {
        let text = "Mara walked the flooded street. ".repeat(2);
        let report = build_advisor_report(&text, Some(Decision::Accepted), &frozen(constraints()));
        assert_eq!(report.suggested_action, AdvisorAction::Accept);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(report.findings.is_empty());
        assert_eq!(report.stats.min_chars, 50);
        assert_eq!(report.materials_version, "v002");
    }

    #[test]
    fn test_severe_overlength_cites_constraint_anchors() {
        let text = "x".repeat(130);
        let report = build_advisor_report(&text, None, &frozen(constraints()));
        assert_eq!(report.suggested_action, AdvisorAction::Rewrite);
        assert_eq!(report.risk_level, RiskLevel::High);
        let finding = &report.findings[0];
        assert_eq!(finding.kind, "length");
        assert_eq!(finding.anchors[0].path, "execution.constraints.target_words");
        assert_eq!(finding.anchors[1].id, "CON-writer_max_ratio");
        assert!(report.digest.starts_with("action=rewrite | risk=high | top=chapter is long"));
    }

    #[test]
    fn test_mild_overlength_is_only_a_note() {
        let report = build_advisor_report(&"x".repeat(110), None, &frozen(constraints()));
        assert_eq!(report.findings[0].suggest, Suggestion::Note);
        assert_eq!(report.suggested_action, AdvisorAction::Accept);
        assert_eq!(report.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_blocking_question_escalates() {
        let mut pack = frozen(constraints());
        pack.pack.risk.open_questions.push(OpenQuestion {
            question: "who sank the city?".into(),
            severity: "blocker".into(),
            blocking: false,
        });
        let report = build_advisor_report(&"x".repeat(80), Some(Decision::Rejected), &pack);
        assert_eq!(report.suggested_action, AdvisorAction::Escalate);
        assert_eq!(report.risk_level, RiskLevel::Blocker);
        assert_eq!(report.materials_blockers_count, 1);
        let kinds: Vec<&str> = report.findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["materials_blocker", "editor"]);
    }

    #[test]
    fn test_pov_ignores_dialogue() {
        let pack = frozen(Constraints {
            pov: "third".into(),
            ..constraints()
        });
        let pov = |text: &str| {
            build_advisor_report(text, None, &pack)
                .findings
                .into_iter()
                .find(|f| f.kind == "pov")
        };
        assert!(pov("Mara shouted, \"I will find our boat!\" and ran on toward the pier.").is_none());

        let finding = pov("I followed Mara down to the water and we waited there.").unwrap();
        assert_eq!(finding.suggest, Suggestion::Rewrite);
        assert_eq!(finding.anchors[0].title, "pov");
    }

    #[test]
    fn test_naming_drift_skips_sentence_starts_and_glossary() {
        let pack = frozen(Constraints {
            naming_policy: "no new proper nouns".into(),
            ..constraints()
        });
        let text = "The tide rose. Mara met Orrin at the gate, and Orrin lied. Voss smiled.";
        let report = build_advisor_report(text, None, &pack);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, "naming_drift");
        assert_eq!(report.findings[0].message, "names missing from the glossary: Orrin");
        assert_eq!(report.suggested_action, AdvisorAction::Accept);
    }

    #[test]
    fn test_phrase_lists_and_meta() {
        let pack = frozen(Constraints {
            prohibited_phrases: vec!["suddenly".into()],
            required_phrases: vec!["the bell".into()],
            ..constraints()
        });
        let text = "As an AI I narrate. Suddenly nothing; suddenly the water rose up high.";
        let kinds: Vec<String> = build_advisor_report(text, None, &pack)
            .findings
            .into_iter()
            .map(|f| f.kind)
            .collect();
        assert_eq!(kinds, vec!["meta", "prohibited_phrases", "required_phrases"]);
    }

    #[test]
    fn test_digest_is_truncated() {
        let finding = AdvisorFinding {
            kind: "meta".into(),
            severity: RiskLevel::High,
            message: "m".repeat(300),
            suggest: Suggestion::Rewrite,
            anchors: Vec::new(),
        };
        let line = advisor_digest_line(AdvisorAction::Rewrite, RiskLevel::High, &[finding]);
        assert_eq!(line.chars().count(), DIGEST_CHARS);
        assert!(line.ends_with('…'));
    }
}
