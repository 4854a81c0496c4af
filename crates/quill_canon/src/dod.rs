//! Definition-of-Done check for materials packs.
//!
//! Runs on the raw JSON rather than [`quill_core::MaterialsPack`] so that a
//! hand-edited pack with missing or mistyped sections is reported, not
//! silently defaulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DoD issue severity. Declaration order is severity order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum DodSeverity {
    /// Vetoes freezing
    #[display("blocker")]
    Blocker,
    /// Vetoes freezing
    #[display("major")]
    Major,
    /// Reported only
    #[display("minor")]
    Minor,
    /// Reported only
    #[display("warn")]
    Warn,
}

/// One DoD finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DodIssue {
    /// Stable id, `DOD-*`
    pub id: String,
    /// Severity
    pub severity: DodSeverity,
    /// Dotted path of the offending section
    pub path: String,
    /// What is wrong
    pub message: String,
    /// How to fix it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint: String,
}

/// Issue counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DodCounts {
    /// Blockers
    pub blocker: usize,
    /// Majors
    pub major: usize,
    /// Minors
    pub minor: usize,
    /// Warnings
    pub warn: usize,
}

/// Result of a DoD check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DodReport {
    /// True when there are no blockers and no majors
    pub ok: bool,
    /// Counts per severity
    pub counts: DodCounts,
    /// Findings in check order
    pub issues: Vec<DodIssue>,
}

impl DodReport {
    fn from_issues(issues: Vec<DodIssue>) -> Self {
        let mut counts = DodCounts::default();
        for issue in &issues {
            match issue.severity {
                DodSeverity::Blocker => counts.blocker += 1,
                DodSeverity::Major => counts.major += 1,
                DodSeverity::Minor => counts.minor += 1,
                DodSeverity::Warn => counts.warn += 1,
            }
        }
        Self {
            ok: counts.blocker == 0 && counts.major == 0,
            counts,
            issues,
        }
    }

    /// One-line summary for logs and the CLI.
    pub fn one_line(&self) -> String {
        format!(
            "DoD={} blocker={} major={} minor={} warn={}",
            if self.ok { "PASS" } else { "FAIL" },
            self.counts.blocker,
            self.counts.major,
            self.counts.minor,
            self.counts.warn
        )
    }

    /// True when the open-question blocker check fired.
    pub fn has_open_question_blockers(&self) -> bool {
        self.issues.iter().any(|i| i.id == "DOD-RISK-OQ-BLOCKERS")
    }
}

fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |cur, part| cur.get(part))
}

fn positive(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (n > 0.0).then_some(n)
}

/// Counts open questions flagged `severity: "blocker"` or `blocking: true`, in
/// both `risk.open_questions` and `execution.open_questions`.
pub fn count_open_question_blockers(pack: &Value) -> usize {
    ["risk.open_questions", "execution.open_questions"]
        .iter()
        .filter_map(|path| get(pack, path).and_then(Value::as_array))
        .flatten()
        .filter(|q| {
            let severity = q
                .get("severity")
                .and_then(Value::as_str)
                .map(|s| s.trim().eq_ignore_ascii_case("blocker"))
                .unwrap_or(false);
            severity || q.get("blocking") == Some(&Value::Bool(true))
        })
        .count()
}

struct Issues(Vec<DodIssue>);

impl Issues {
    fn add(&mut self, id: &str, severity: DodSeverity, path: &str, message: impl Into<String>, hint: &str) {
        self.0.push(DodIssue {
            id: id.to_string(),
            severity,
            path: path.to_string(),
            message: message.into(),
            hint: hint.to_string(),
        });
    }
}

/// Structural Definition-of-Done check.
///
/// Required: the five top-level sections as objects, an outline with at least
/// one chapter, constraints with `target_words > 0` and
/// `0 < writer_min_ratio < writer_max_ratio`, and zero blocking open
/// questions. A single blocking open question fails the check regardless of
/// everything else.
pub fn validate_materials_pack(pack: &Value) -> DodReport {
    use DodSeverity::*;
    let mut issues = Issues(Vec::new());

    for section in ["meta", "canon", "planning", "execution", "risk"] {
        if !pack.get(section).is_some_and(Value::is_object) {
            issues.add(
                &format!("DOD-ROOT-{}", section.to_ascii_uppercase()),
                Blocker,
                section,
                format!("{} is missing or not an object", section),
                "a pack carries meta, canon, planning, execution and risk",
            );
        }
    }

    let version = get(pack, "meta.version").and_then(Value::as_str).unwrap_or("");
    if version.trim().is_empty() {
        issues.add("DOD-META-VERSION", Major, "meta.version", "meta.version is empty", "use a vNNN label");
    }

    for file in ["world", "characters", "timeline"] {
        let path = format!("canon.{}", file);
        if !get(pack, &path).is_some_and(Value::is_object) {
            issues.add(
                &format!("DOD-CANON-{}", file.to_ascii_uppercase()),
                Major,
                &path,
                format!("{} must be an object", path),
                "",
            );
        }
    }

    match get(pack, "planning.outline") {
        Some(outline) if outline.is_object() => {
            let has_chapters = outline
                .get("chapters")
                .and_then(Value::as_array)
                .is_some_and(|c| !c.is_empty());
            if !has_chapters {
                issues.add(
                    "DOD-OUTLINE-CHAPTERS",
                    Blocker,
                    "planning.outline.chapters",
                    "outline has no chapters",
                    "at least one chapter entry is needed before writing",
                );
            }
        }
        _ => issues.add(
            "DOD-PLANNING-OUTLINE",
            Blocker,
            "planning.outline",
            "planning.outline is missing or not an object",
            "",
        ),
    }

    if !get(pack, "planning.tone").is_some_and(Value::is_object) {
        issues.add("DOD-PLANNING-TONE", Major, "planning.tone", "planning.tone is missing or not an object", "");
    }

    match get(pack, "execution.constraints").and_then(Value::as_object) {
        Some(constraints) if !constraints.is_empty() => {
            if positive(constraints.get("target_words")).is_none() {
                issues.add(
                    "DOD-EXEC-TARGET-WORDS",
                    Major,
                    "execution.constraints.target_words",
                    "target_words is missing or not positive",
                    "",
                );
            }
            let min = positive(constraints.get("writer_min_ratio"));
            let max = positive(constraints.get("writer_max_ratio"));
            if min.is_none() {
                issues.add(
                    "DOD-EXEC-MIN-RATIO",
                    Major,
                    "execution.constraints.writer_min_ratio",
                    "writer_min_ratio is missing or not positive",
                    "",
                );
            }
            if max.is_none() {
                issues.add(
                    "DOD-EXEC-MAX-RATIO",
                    Major,
                    "execution.constraints.writer_max_ratio",
                    "writer_max_ratio is missing or not positive",
                    "",
                );
            }
            if let (Some(min), Some(max)) = (min, max)
                && min >= max
            {
                issues.add(
                    "DOD-EXEC-RATIO-RANGE",
                    Major,
                    "execution.constraints",
                    format!("writer_min_ratio {} is not below writer_max_ratio {}", min, max),
                    "",
                );
            }
            let naming = constraints.get("naming_policy").and_then(Value::as_str).unwrap_or("");
            if naming.trim().is_empty() {
                issues.add(
                    "DOD-EXEC-NAMING-POLICY",
                    Minor,
                    "execution.constraints.naming_policy",
                    "naming_policy is empty",
                    "state whether new proper nouns may be introduced",
                );
            }
        }
        _ => issues.add(
            "DOD-EXEC-CONSTRAINTS",
            Blocker,
            "execution.constraints",
            "execution.constraints is missing or empty",
            "",
        ),
    }

    match get(pack, "execution.decisions") {
        Some(Value::Array(d)) if d.is_empty() => issues.add(
            "DOD-EXEC-DECISIONS-EMPTY",
            Warn,
            "execution.decisions",
            "no decisions recorded",
            "",
        ),
        Some(Value::Array(_)) => {}
        _ => issues.add(
            "DOD-EXEC-DECISIONS-TYPE",
            Major,
            "execution.decisions",
            "execution.decisions must be a list",
            "",
        ),
    }
    for section in ["checklists", "glossary"] {
        let path = format!("execution.{}", section);
        if !get(pack, &path).is_some_and(Value::is_object) {
            issues.add(
                &format!("DOD-EXEC-{}-TYPE", section.to_ascii_uppercase()),
                Major,
                &path,
                format!("{} must be an object", path),
                "",
            );
        }
    }

    match get(pack, "risk.open_questions") {
        None => issues.add(
            "DOD-RISK-OQ-MISSING",
            Major,
            "risk.open_questions",
            "risk.open_questions is missing",
            "use an empty list when there are none",
        ),
        Some(v) if !v.is_array() => issues.add(
            "DOD-RISK-OQ-TYPE",
            Major,
            "risk.open_questions",
            "risk.open_questions must be a list",
            "",
        ),
        Some(_) => {}
    }
    let blockers = count_open_question_blockers(pack);
    if blockers > 0 {
        issues.add(
            "DOD-RISK-OQ-BLOCKERS",
            Blocker,
            "risk.open_questions",
            format!("{} blocking open questions", blockers),
            "answer or downgrade every blocker before freezing",
        );
    }

    DodReport::from_issues(issues.0)
}
