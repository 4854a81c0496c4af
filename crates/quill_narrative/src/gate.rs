//! Editor gate: round policy, output contract, hard checks and the verdict.
//!
//! Everything here is a pure function of its inputs. Round state lives in the
//! caller, which passes `writer_version` and `max_rewrites` on every review.

use quill_core::{
    CanonPatch, CanonTarget, Decision, EditorIssue, EditorReport, IssueAction, IssueSeverity,
    PatchOp, World, str_field,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Issue kinds that justify rejection even on the last, lenient round.
pub const HARD_KINDS: &[&str] = &["canon_conflict", "contradiction", "meta_leakage", "length"];

/// Marker placed on synthesized fallback issues.
pub const FALLBACK_MARKER: &str = "[fallback]";

/// Phrases that betray the model talking about the task instead of telling
/// the story.
const META_PHRASES: &[&str] = &[
    "as an ai",
    "language model",
    "here is the chapter",
    "here's the chapter",
    "here is chapter",
    "word count",
    "i hope this",
    "as requested",
    "this chapter will",
    "[continued]",
];

/// Tunable gate thresholds (`[gate]` in configuration).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    /// Minimum issues on a rejection in the last round
    pub last_round_min_issues: usize,
    /// Desired issue count in the penultimate round
    pub penultimate_target_issues: usize,
    /// Minimum issues on a rejection in other rounds
    pub default_min_issues: usize,
    /// Length deviation factor that counts as a hard violation
    pub severe_length_ratio: f64,
    /// Characters of draft quoted by fallback and length issues
    pub fallback_snippet_chars: usize,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            last_round_min_issues: 2,
            penultimate_target_issues: 6,
            default_min_issues: 3,
            severe_length_ratio: 1.2,
            fallback_snippet_chars: 80,
        }
    }
}

/// Strictness parameters for one review.
///
/// # Examples
///
/// ```
/// use quill_narrative::{GatePolicy, GateThresholds};
///
/// let t = GateThresholds::default();
/// let last = GatePolicy::for_round(3, 2, &t, false);
/// assert!(last.is_last_review);
/// assert_eq!(last.min_issues, 2);
///
/// let penultimate = GatePolicy::for_round(2, 2, &t, false);
/// assert!(penultimate.is_penultimate_review);
/// assert_eq!(penultimate.target_issues, 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// 1-based draft version under review
    pub writer_version: u32,
    /// Rewrite cap
    pub max_rewrites: u32,
    /// `writer_version >= 1 + max_rewrites`
    pub is_last_review: bool,
    /// `writer_version == max_rewrites` and not last
    pub is_penultimate_review: bool,
    /// Fewest issues a rejection may carry
    pub min_issues: usize,
    /// Issue count the editor is asked to aim for
    pub target_issues: usize,
    /// `accepted` is not a valid answer in this review
    pub force_reject_with_issues: bool,
}

impl GatePolicy {
    /// Derives the policy for a round.
    pub fn for_round(
        writer_version: u32,
        max_rewrites: u32,
        thresholds: &GateThresholds,
        force_reject_with_issues: bool,
    ) -> Self {
        let is_last_review = writer_version >= 1 + max_rewrites;
        let is_penultimate_review = !is_last_review && writer_version == max_rewrites;
        let min_issues = if is_last_review {
            thresholds.last_round_min_issues
        } else {
            thresholds.default_min_issues
        }
        .max(1);
        let target_issues = if is_penultimate_review {
            thresholds.penultimate_target_issues.max(min_issues)
        } else {
            min_issues
        };
        Self {
            writer_version,
            max_rewrites,
            is_last_review,
            is_penultimate_review,
            min_issues,
            target_issues,
            force_reject_with_issues,
        }
    }
}

fn non_empty(value: &Value, key: &str) -> bool {
    !str_field(value, key).is_empty()
}

/// Checks the editor's raw JSON against the output contract. Empty string
/// means valid.
pub fn validate_editor_output(output: &Map<String, Value>, policy: &GatePolicy) -> String {
    let raw_decision = output.get("decision").and_then(Value::as_str).unwrap_or("");
    let decision = match Decision::parse(raw_decision) {
        Some(Decision::Escalate) | None => {
            return format!("decision must be accepted or rejected, got '{}'", raw_decision);
        }
        Some(d) => d,
    };
    let issues = match output.get("issues") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(list)) => list.as_slice(),
        Some(_) => return "issues must be a list".into(),
    };

    if decision.is_accepted() {
        if policy.force_reject_with_issues {
            return "accepted is not allowed in this review: reject with concrete issues".into();
        }
        if !issues.is_empty() {
            return format!("accepted decision must have no issues, got {}", issues.len());
        }
        return String::new();
    }

    if issues.len() < policy.min_issues {
        return format!(
            "rejected decision needs at least {} issues, got {}",
            policy.min_issues,
            issues.len()
        );
    }
    for (i, issue) in issues.iter().enumerate() {
        for key in ["quote", "issue", "fix", "action"] {
            if !non_empty(issue, key) {
                return format!("issues[{}].{} is empty", i, key);
            }
        }
        let action = str_field(issue, "action");
        let Ok(action) = action.parse::<IssueAction>() else {
            return format!("issues[{}].action '{}' is not rewrite|canon_patch|escalate", i, action);
        };
        if action == IssueAction::CanonPatch
            && let Err(reason) = parse_patch(issue.get("canon_patch"))
        {
            return format!("issues[{}].canon_patch: {}", i, reason);
        }
    }
    String::new()
}

fn parse_patch(value: Option<&Value>) -> Result<CanonPatch, String> {
    let Some(patch) = value.filter(|v| v.is_object()) else {
        return Err("missing".into());
    };
    let target = str_field(patch, "target").parse::<CanonTarget>()?;
    let op = str_field(patch, "op");
    let op = op
        .parse::<PatchOp>()
        .map_err(|_| format!("op '{}' is not note|append", op))?;
    let value = str_field(patch, "value");
    if value.is_empty() {
        return Err("value is empty".into());
    }
    Ok(CanonPatch {
        target,
        op,
        path: str_field(patch, "path"),
        value,
    })
}

/// Normalises editor JSON into a report.
///
/// Issues without a quote are dropped. Unknown actions default to `rewrite`;
/// a `canon_patch` issue whose patch does not parse is demoted to `rewrite`.
pub fn normalize_report(output: &Map<String, Value>) -> EditorReport {
    let decision = output
        .get("decision")
        .and_then(Value::as_str)
        .and_then(Decision::parse)
        .unwrap_or_default();
    let issues = output
        .get("issues")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter(|issue| non_empty(issue, "quote"))
        .map(|issue| {
            let mut action = str_field(issue, "action").parse().unwrap_or_default();
            let canon_patch = match action {
                IssueAction::CanonPatch => parse_patch(issue.get("canon_patch")).ok(),
                _ => None,
            };
            if action == IssueAction::CanonPatch && canon_patch.is_none() {
                action = IssueAction::Rewrite;
            }
            EditorIssue {
                kind: str_field(issue, "type"),
                canon_key: str_field(issue, "canon_key"),
                quote: str_field(issue, "quote"),
                issue: str_field(issue, "issue"),
                fix: str_field(issue, "fix"),
                action,
                severity: str_field(issue, "severity").parse().unwrap_or_default(),
                canon_patch,
            }
        })
        .collect();
    EditorReport { decision, issues }
}

/// A phrase the draft must not contain, tied to the canon entry it contradicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonConflict {
    /// Forbidden phrase, matched case-insensitively
    pub phrase: String,
    /// Canon key the phrase contradicts
    #[serde(default)]
    pub canon_key: String,
    /// What canon says instead
    #[serde(default)]
    pub note: String,
}

impl CanonConflict {
    /// Reads `world.forbidden`: a list of `{phrase, canon_key, note}` objects or
    /// bare phrases.
    pub fn from_world(world: &World) -> Vec<Self> {
        let Some(Value::Array(entries)) = world.extra.get("forbidden") else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let conflict = match entry {
                    Value::String(s) => CanonConflict {
                        phrase: s.trim().to_string(),
                        canon_key: "world.forbidden".into(),
                        note: String::new(),
                    },
                    _ => CanonConflict {
                        phrase: str_field(entry, "phrase"),
                        canon_key: str_field(entry, "canon_key"),
                        note: str_field(entry, "note"),
                    },
                };
                (!conflict.phrase.is_empty()).then_some(conflict)
            })
            .collect()
    }
}

/// Chapter length window in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    /// Lower bound
    pub min_chars: usize,
    /// Upper bound
    pub max_chars: usize,
}

impl LengthBounds {
    /// Bounds from a target and the min/max ratios.
    ///
    /// # Examples
    ///
    /// ```
    /// use quill_narrative::LengthBounds;
    ///
    /// let bounds = LengthBounds::from_target(800, 0.75, 1.25);
    /// assert_eq!((bounds.min_chars, bounds.max_chars), (600, 1000));
    /// ```
    pub fn from_target(target: u32, min_ratio: f64, max_ratio: f64) -> Self {
        let target = f64::from(target);
        let min_chars = (target * min_ratio).round().max(0.0) as usize;
        let max_chars = (target * max_ratio).round().max(min_chars as f64) as usize;
        Self { min_chars, max_chars }
    }
}

fn snippet(text: &str, chars: usize) -> String {
    text.trim().chars().take(chars.max(1)).collect::<String>().trim().to_string()
}

/// Trimmed line of `draft` containing `needle` (case-insensitive).
fn line_containing(draft: &str, needle: &str) -> Option<String> {
    let needle = needle.to_lowercase();
    draft
        .lines()
        .find(|line| line.to_lowercase().contains(&needle))
        .map(|line| line.trim().to_string())
}

fn hard_issue(kind: &str, canon_key: &str, quote: String, issue: String, fix: &str) -> EditorIssue {
    EditorIssue {
        kind: kind.into(),
        canon_key: canon_key.into(),
        quote,
        issue,
        fix: fix.into(),
        action: IssueAction::Rewrite,
        severity: IssueSeverity::Critical,
        canon_patch: None,
    }
}

/// Deterministic hard-violation checks, valid on every round.
pub fn hard_findings(
    draft: &str,
    bounds: LengthBounds,
    conflicts: &[CanonConflict],
    thresholds: &GateThresholds,
) -> Vec<EditorIssue> {
    let mut findings = Vec::new();
    let len = draft.trim().chars().count();
    let ratio = thresholds.severe_length_ratio.max(1.0);
    let quote = if len == 0 {
        "(empty draft)".to_string()
    } else {
        snippet(draft, thresholds.fallback_snippet_chars)
    };

    if (len as f64) > bounds.max_chars as f64 * ratio {
        findings.push(hard_issue(
            "length",
            "",
            quote.clone(),
            format!("draft is {} chars, far above the {}-char ceiling", len, bounds.max_chars),
            "cut scenes and summary until the chapter fits the length window",
        ));
    } else if (len as f64) < bounds.min_chars as f64 / ratio {
        findings.push(hard_issue(
            "length",
            "",
            quote,
            format!("draft is {} chars, far below the {}-char floor", len, bounds.min_chars),
            "develop the outlined beats in full scenes",
        ));
    }

    for phrase in META_PHRASES {
        if let Some(line) = line_containing(draft, phrase) {
            findings.push(hard_issue(
                "meta_leakage",
                "",
                line,
                format!("narration talks about the task (\"{}\")", phrase),
                "remove every sentence addressed to the reader about the writing itself",
            ));
        }
    }

    for conflict in conflicts {
        if let Some(line) = line_containing(draft, &conflict.phrase) {
            let issue = if conflict.note.is_empty() {
                format!("contradicts canon {}", conflict.canon_key)
            } else {
                format!("contradicts canon {}: {}", conflict.canon_key, conflict.note)
            };
            findings.push(hard_issue(
                "canon_conflict",
                &conflict.canon_key,
                line,
                issue,
                "rewrite the passage so it agrees with canon",
            ));
        }
    }
    findings
}

/// Placeholder issues used when the editor produced nothing usable.
pub fn fallback_issues(draft: &str, thresholds: &GateThresholds) -> Vec<EditorIssue> {
    let text = draft.trim();
    let chars = thresholds.fallback_snippet_chars;
    let (opening, closing) = if text.is_empty() {
        ("(empty draft)".to_string(), "(empty draft)".to_string())
    } else {
        let total = text.chars().count();
        let closing: String = text.chars().skip(total.saturating_sub(chars.max(1))).collect();
        (snippet(text, chars), closing.trim().to_string())
    };
    vec![
        EditorIssue {
            kind: "fallback".into(),
            quote: opening,
            issue: format!("{} editor review unavailable; opening needs a careful pass", FALLBACK_MARKER),
            fix: "tighten the opening and check it against the outline and canon".into(),
            ..Default::default()
        },
        EditorIssue {
            kind: "fallback".into(),
            quote: closing,
            issue: format!("{} editor review unavailable; ending needs a careful pass", FALLBACK_MARKER),
            fix: "make sure the ending lands the outlined hook".into(),
            severity: IssueSeverity::Minor,
            ..Default::default()
        },
    ]
}

/// True for findings that may reject a draft on the last round.
pub fn is_hard(issue: &EditorIssue) -> bool {
    issue.severity == IssueSeverity::Critical || HARD_KINDS.contains(&issue.kind.as_str())
}

/// Overall decision for a set of findings: escalate > rewrite > accept.
pub fn decide(issues: &[EditorIssue]) -> Decision {
    if issues.iter().any(|i| i.action == IssueAction::Escalate) {
        Decision::Escalate
    } else if issues.iter().any(|i| i.action == IssueAction::Rewrite) {
        Decision::Rejected
    } else {
        Decision::Accepted
    }
}

/// Final outcome of one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Overall decision
    pub decision: Decision,
    /// Findings, most severe first; empty whenever the draft is accepted
    pub issues: Vec<EditorIssue>,
    /// Findings that did not bind the decision (soft issues on the last
    /// round, canon patches on an accepted draft)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisory: Vec<EditorIssue>,
    /// True when the issues were synthesized
    pub used_fallback: bool,
    /// Policy the review ran under
    pub policy: GatePolicy,
}

impl GateVerdict {
    /// Synthesized rejection for when the editor output is unusable.
    pub fn fallback(draft: &str, policy: GatePolicy, thresholds: &GateThresholds) -> Self {
        Self {
            decision: Decision::Rejected,
            issues: fallback_issues(draft, thresholds),
            advisory: Vec::new(),
            used_fallback: true,
            policy,
        }
    }

    /// Canon patches carried by `canon_patch` issues, binding or advisory.
    pub fn canon_patches(&self) -> Vec<CanonPatch> {
        self.issues
            .iter()
            .chain(&self.advisory)
            .filter(|i| i.action == IssueAction::CanonPatch)
            .filter_map(|i| i.canon_patch.clone())
            .collect()
    }

    /// Rewrite instructions, most severe first.
    pub fn instructions(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.action != IssueAction::CanonPatch)
            .map(EditorIssue::as_instruction)
            .collect()
    }
}

/// Combines hard findings with the editor's report into a verdict.
///
/// Hard findings come first and always reject. On the last round only hard
/// findings (or an escalation) may keep a draft from being accepted. A
/// rejection without any actionable issue falls back to placeholder issues.
/// An accepted verdict carries no issues; whatever the editor raised moves to
/// `advisory`.
pub fn settle(
    report: EditorReport,
    hard: Vec<EditorIssue>,
    policy: GatePolicy,
    draft: &str,
    thresholds: &GateThresholds,
) -> GateVerdict {
    let editor_rejected = !report.decision.is_accepted();
    let mut issues = hard;
    issues.extend(report.issues);

    if editor_rejected && issues.is_empty() {
        return GateVerdict::fallback(draft, policy, thresholds);
    }

    let decision = if policy.is_last_review {
        let binding: Vec<EditorIssue> = issues
            .iter()
            .filter(|i| is_hard(i) || i.action != IssueAction::Rewrite)
            .cloned()
            .collect();
        decide(&binding)
    } else {
        decide(&issues)
    };

    issues.sort_by_key(|i| i.severity);
    let advisory = if decision.is_accepted() {
        std::mem::take(&mut issues)
    } else {
        Vec::new()
    };
    GateVerdict {
        decision,
        issues,
        advisory,
        used_fallback: false,
        policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn issue(action: &str) -> Value {
        json!({"quote": "q", "issue": "i", "fix": "f", "action": action})
    }

    fn policy(version: u32, max: u32) -> GatePolicy {
        GatePolicy::for_round(version, max, &GateThresholds::default(), false)
    }

    #[test]
    fn test_round_positions() {
        let first = policy(1, 2);
        assert!(!first.is_last_review && !first.is_penultimate_review);
        assert_eq!(first.min_issues, 3);
        assert_eq!(first.target_issues, 3);

        let only = policy(1, 0);
        assert!(only.is_last_review);
        assert!(!only.is_penultimate_review);

        let penultimate = policy(3, 3);
        assert!(!penultimate.is_last_review);
        assert!(penultimate.is_penultimate_review);
        assert!(policy(4, 3).is_last_review);
    }

    #[test]
    fn test_validator_contract() {
        let p = policy(1, 2);
        assert_eq!(validate_editor_output(&object(json!({"decision": "pass"})), &p), "");
        assert!(
            validate_editor_output(&object(json!({"decision": "pass", "issues": [issue("rewrite")]})), &p)
                .contains("must have no issues")
        );
        assert!(
            validate_editor_output(&object(json!({"decision": "reject", "issues": [issue("rewrite")]})), &p)
                .contains("at least 3")
        );
        let three = json!({"decision": "rejected", "issues": [issue("rewrite"), issue("rewrite"), issue("escalate")]});
        assert_eq!(validate_editor_output(&object(three), &p), "");
        assert!(validate_editor_output(&object(json!({"decision": "maybe"})), &p).contains("maybe"));
    }

    #[test]
    fn test_validator_forced_rejection_and_patches() {
        let forced = GatePolicy::for_round(1, 2, &GateThresholds::default(), true);
        assert!(!validate_editor_output(&object(json!({"decision": "accepted"})), &forced).is_empty());

        let p = policy(3, 2);
        let bad_patch = json!({"decision": "rejected", "issues": [
            issue("rewrite"),
            {"quote": "q", "issue": "i", "fix": "f", "action": "canon_patch",
             "canon_patch": {"target": "plot.json", "op": "note", "value": "v"}}
        ]});
        assert!(validate_editor_output(&object(bad_patch), &p).contains("unknown canon target"));

        let blank_quote = json!({"decision": "rejected", "issues": [issue("rewrite"), {"quote": "", "issue": "i", "fix": "f", "action": "rewrite"}]});
        assert_eq!(validate_editor_output(&object(blank_quote), &p), "issues[1].quote is empty");
    }

    #[test]
    fn test_normalize_drops_unquoted_issues() {
        let report = normalize_report(&object(json!({
            "decision": "reject",
            "issues": [
                {"quote": "", "issue": "vague", "fix": "f"},
                {"quote": "the sea was dry", "issue": "i", "fix": "f", "action": "canon_patch",
                 "canon_patch": {"target": "canon/world.json", "op": "note", "value": "sea dried in ch1"}},
                {"quote": "q", "issue": "i", "fix": "f", "action": "canon_patch"}
            ]
        })));
        assert_eq!(report.decision, Decision::Rejected);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].action, IssueAction::CanonPatch);
        assert_eq!(report.issues[0].canon_patch.as_ref().unwrap().target, CanonTarget::World);
        assert_eq!(report.issues[1].action, IssueAction::Rewrite);
    }

    #[test]
    fn test_hard_findings() {
        let t = GateThresholds::default();
        let bounds = LengthBounds::from_target(100, 0.75, 1.25);
        let conflicts = vec![CanonConflict {
            phrase: "Mara cast a spell at midnight".into(),
            canon_key: "world.rules.no magic after dusk".into(),
            note: "spells fizzle after dusk".into(),
        }];
        let draft = format!("{}\nAt last MARA CAST A SPELL AT MIDNIGHT.\n", "a".repeat(100));
        let findings = hard_findings(&draft, bounds, &conflicts, &t);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "canon_conflict");
        assert_eq!(findings[0].quote, "At last MARA CAST A SPELL AT MIDNIGHT.");

        let short = hard_findings("Here is the chapter you asked for.", bounds, &[], &t);
        let kinds: Vec<_> = short.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["length", "meta_leakage"]);
    }

    #[test]
    fn test_fallback_issues_always_quote() {
        let t = GateThresholds::default();
        for draft in ["", "   ", "One line only.", &"长".repeat(500)] {
            let verdict = GateVerdict::fallback(draft, policy(1, 2), &t);
            assert_eq!(verdict.decision, Decision::Rejected);
            assert!(!verdict.issues.is_empty());
            for issue in &verdict.issues {
                assert!(!issue.quote.is_empty());
                assert!(issue.issue.contains(FALLBACK_MARKER));
            }
        }
    }

    #[test]
    fn test_decision_priority() {
        let mut rewrite = EditorIssue {
            quote: "q".into(),
            ..Default::default()
        };
        let patch = EditorIssue {
            action: IssueAction::CanonPatch,
            ..rewrite.clone()
        };
        assert_eq!(decide(&[patch.clone()]), Decision::Accepted);
        assert_eq!(decide(&[patch.clone(), rewrite.clone()]), Decision::Rejected);
        rewrite.action = IssueAction::Escalate;
        assert_eq!(decide(&[patch, rewrite]), Decision::Escalate);
    }

    #[test]
    fn test_last_round_ignores_soft_issues() {
        let t = GateThresholds::default();
        let soft = EditorIssue {
            kind: "pacing".into(),
            quote: "q".into(),
            severity: IssueSeverity::Minor,
            ..Default::default()
        };
        let report = EditorReport {
            decision: Decision::Rejected,
            issues: vec![soft.clone(), soft],
        };
        let last = settle(report.clone(), Vec::new(), policy(3, 2), "draft", &t);
        assert_eq!(last.decision, Decision::Accepted);
        assert!(last.issues.is_empty());
        assert_eq!(last.advisory.len(), 2);
        assert!(last.instructions().is_empty());

        let early = settle(report, Vec::new(), policy(1, 2), "draft", &t);
        assert_eq!(early.decision, Decision::Rejected);
    }

    #[test]
    fn test_patch_only_rejection_is_accepted_without_issues() {
        let t = GateThresholds::default();
        let patch = EditorIssue {
            kind: "canon_gap".into(),
            quote: "the lighthouse had two keepers".into(),
            action: IssueAction::CanonPatch,
            canon_patch: Some(CanonPatch {
                target: CanonTarget::World,
                op: PatchOp::Note,
                path: String::new(),
                value: "the lighthouse has two keepers".into(),
            }),
            ..Default::default()
        };
        let report = EditorReport {
            decision: Decision::Rejected,
            issues: vec![patch],
        };
        let verdict = settle(report, Vec::new(), policy(1, 2), "draft", &t);
        assert_eq!(verdict.decision, Decision::Accepted);
        assert!(verdict.issues.is_empty());
        assert_eq!(verdict.canon_patches().len(), 1);

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["issues"], json!([]));
        assert_eq!(json["advisory"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_verdict_keeps_issues_binding() {
        let t = GateThresholds::default();
        let report = EditorReport {
            decision: Decision::Rejected,
            issues: vec![EditorIssue {
                quote: "q".into(),
                ..Default::default()
            }],
        };
        let verdict = settle(report, Vec::new(), policy(1, 2), "draft", &t);
        assert_eq!(verdict.decision, Decision::Rejected);
        assert_eq!(verdict.issues.len(), 1);
        assert!(verdict.advisory.is_empty());
    }

    #[test]
    fn test_validator_rejects_escalate_decision() {
        let p = policy(1, 2);
        let out = validate_editor_output(&object(json!({"decision": "escalate"})), &p);
        assert!(out.contains("accepted or rejected"));
    }

    #[test]
    fn test_hard_findings_reject_on_last_round() {
        let t = GateThresholds::default();
        for (version, max) in [(3, 3), (4, 3), (3, 2)] {
            let hard = vec![hard_issue("canon_conflict", "k", "q".into(), "i".into(), "f")];
            let report = EditorReport {
                decision: Decision::Accepted,
                issues: Vec::new(),
            };
            let verdict = settle(report, hard, policy(version, max), "draft", &t);
            assert_eq!(verdict.decision, Decision::Rejected);
            assert!(!verdict.used_fallback);
        }
    }

    #[test]
    fn test_issues_sorted_most_severe_first() {
        let t = GateThresholds::default();
        let minor = EditorIssue {
            quote: "q".into(),
            severity: IssueSeverity::Minor,
            ..Default::default()
        };
        let critical = EditorIssue {
            severity: IssueSeverity::Critical,
            ..minor.clone()
        };
        let report = EditorReport {
            decision: Decision::Rejected,
            issues: vec![minor, critical],
        };
        let verdict = settle(report, Vec::new(), policy(1, 2), "d", &t);
        assert_eq!(verdict.issues[0].severity, IssueSeverity::Critical);
    }

    #[test]
    fn test_conflicts_from_world() {
        let world = World::ensure(&json!({"forbidden": [
            "dragons",
            {"phrase": "sunrise in the west", "canon_key": "world.rules.sun", "note": "sun rises east"},
            {"canon_key": "nothing"}
        ]}));
        let conflicts = CanonConflict::from_world(&world);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].canon_key, "world.forbidden");
        assert_eq!(conflicts[1].note, "sun rises east");
    }
}
