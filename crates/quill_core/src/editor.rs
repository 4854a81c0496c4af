//! Editor gate output types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Gate outcome for one review.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Draft accepted
    #[display("accepted")]
    Accepted,
    /// Draft must be rewritten
    #[default]
    #[display("rejected")]
    Rejected,
    /// A finding needs a human
    #[display("escalate")]
    Escalate,
}

impl Decision {
    /// Parses a decision string, accepting the `pass`/`reject` synonyms.
    ///
    /// # Examples
    ///
    /// ```
    /// use quill_core::Decision;
    ///
    /// assert_eq!(Decision::parse("PASS"), Some(Decision::Accepted));
    /// assert_eq!(Decision::parse("reject"), Some(Decision::Rejected));
    /// assert_eq!(Decision::parse("maybe"), None);
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accepted" | "accept" | "pass" | "approved" => Some(Decision::Accepted),
            "rejected" | "reject" | "fail" => Some(Decision::Rejected),
            "escalate" | "escalated" => Some(Decision::Escalate),
            _ => None,
        }
    }

    /// True only for [`Decision::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// What the issue asks for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    derive_more::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IssueAction {
    /// Needs a human decision
    #[display("escalate")]
    Escalate,
    /// Fix the prose
    #[default]
    #[display("rewrite")]
    Rewrite,
    /// The draft is right and canon should record it
    #[display("canon_patch")]
    CanonPatch,
}

/// How bad an issue is. Declaration order is severity order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    derive_more::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IssueSeverity {
    /// Hard violation: canon conflict, contradiction, meta leakage, length
    #[display("critical")]
    Critical,
    /// Material problem
    #[default]
    #[display("major")]
    Major,
    /// Polish
    #[display("minor")]
    Minor,
}

/// Canon file a patch may touch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    strum::EnumIter,
)]
pub enum CanonTarget {
    /// `world.json`
    #[serde(rename = "world.json")]
    #[display("world.json")]
    World,
    /// `characters.json`
    #[serde(rename = "characters.json")]
    #[display("characters.json")]
    Characters,
    /// `timeline.json`
    #[serde(rename = "timeline.json")]
    #[display("timeline.json")]
    Timeline,
    /// `style.md`
    #[serde(rename = "style.md")]
    #[display("style.md")]
    Style,
}

impl FromStr for CanonTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches("canon/");
        match name {
            "world.json" => Ok(CanonTarget::World),
            "characters.json" => Ok(CanonTarget::Characters),
            "timeline.json" => Ok(CanonTarget::Timeline),
            "style.md" => Ok(CanonTarget::Style),
            other => Err(format!("unknown canon target '{}'", other)),
        }
    }
}

/// Patch operation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PatchOp {
    /// Add a traceable note line
    #[display("note")]
    Note,
    /// Append text
    #[display("append")]
    Append,
}

/// Suggested canon change attached to a `canon_patch` issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonPatch {
    /// File to touch
    pub target: CanonTarget,
    /// Operation
    pub op: PatchOp,
    /// Section within the file (only `notes` is accepted for `note`)
    #[serde(default)]
    pub path: String,
    /// Text to record
    pub value: String,
}

/// One editor finding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorIssue {
    /// Issue class (canon_conflict, pacing, ...)
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Canon key the finding refers to, if any
    #[serde(default)]
    pub canon_key: String,
    /// Verbatim snippet from the draft
    pub quote: String,
    /// What is wrong
    pub issue: String,
    /// How to fix it
    pub fix: String,
    /// Requested action
    #[serde(default)]
    pub action: IssueAction,
    /// Severity, most severe rendered first
    #[serde(default)]
    pub severity: IssueSeverity,
    /// Canon change, for `canon_patch` issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canon_patch: Option<CanonPatch>,
}

impl EditorIssue {
    /// Renders the issue as a rewrite instruction line.
    pub fn as_instruction(&self) -> String {
        format!(
            "[{}] \"{}\": {} -> {}",
            self.severity, self.quote, self.issue, self.fix
        )
    }
}

/// Structured editor verdict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorReport {
    /// Outcome
    pub decision: Decision,
    /// Findings, most severe first
    #[serde(default)]
    pub issues: Vec<EditorIssue>,
}
