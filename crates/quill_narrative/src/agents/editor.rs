//! Editor: runs the gate for one draft and never fails.

use super::AgentRuntime;
use crate::gate::{
    CanonConflict, GatePolicy, GateThresholds, GateVerdict, LengthBounds, hard_findings,
    normalize_report, settle, validate_editor_output,
};
use crate::prompts::{EDITOR_SCHEMA, outline_entry};
use crate::repair::SchemaCall;
use quill_core::{Decision, EditorReport, Message, OutlineChapter};
use quill_interface::trace_fields;
use serde_json::json;
use tracing::{info, instrument, warn};

const DRAFT_CHARS: usize = 12_000;

/// Inputs to one review.
#[derive(Debug, Clone, Copy)]
pub struct ReviewBrief<'a> {
    /// Chapter under review
    pub chapter_index: u32,
    /// Draft text
    pub draft: &'a str,
    /// Outline entry
    pub outline: &'a OutlineChapter,
    /// Canon digest
    pub canon_digest: &'a str,
    /// Execution-layer digest
    pub materials_digest: &'a str,
    /// Length window
    pub bounds: LengthBounds,
    /// Forbidden phrases
    pub conflicts: &'a [CanonConflict],
    /// Round policy
    pub policy: GatePolicy,
}

fn strictness(policy: &GatePolicy) -> String {
    if policy.force_reject_with_issues {
        format!(
            "This is a mandatory audit: you must reject and list at least {} concrete issues.",
            policy.min_issues
        )
    } else if policy.is_last_review {
        format!(
            "This is the final review. Reject only for hard violations: canon conflicts, \
             self-contradictions, meta commentary, severe length problems. A rejection needs at \
             least {} issues.",
            policy.min_issues
        )
    } else if policy.is_penultimate_review {
        format!(
            "This is the last chance for a full rewrite. Reject for any material improvement and \
             list every foreseeable fix now, aiming for {} or more issues.",
            policy.target_issues
        )
    } else {
        format!(
            "Reject when the draft has material problems; a rejection needs at least {} issues.",
            policy.min_issues
        )
    }
}

fn review_messages(brief: &ReviewBrief<'_>) -> Vec<Message> {
    vec![
        Message::system(format!(
            "You are the chief editor of a serialized novel. Canon is ground truth. Every issue must \
             quote the draft verbatim and say how to fix it. Use action canon_patch only when the \
             draft is right and canon should record it; use escalate only when a human must decide. \
             {}",
            strictness(&brief.policy)
        )),
        Message::user(format!(
            "Outline:\n{}\n\nExecution notes:\n{}\n\nCanon:\n{}\n\nLength window: {}-{} characters, \
             draft has {}.\n\nDraft (version {}):\n{}",
            outline_entry(brief.outline),
            brief.materials_digest,
            brief.canon_digest,
            brief.bounds.min_chars,
            brief.bounds.max_chars,
            brief.draft.chars().count(),
            brief.policy.writer_version,
            quill_storage::truncate(brief.draft, DRAFT_CHARS)
        )),
    ]
}

/// Reviews a draft.
///
/// Deterministic hard checks always run. The model's report goes through the
/// schema-repair loop with the gate's output contract as validator; when that
/// comes back unusable, or the driver fails, the verdict is the synthesized
/// fallback rejection. In template mode only the hard checks decide.
#[instrument(skip_all, fields(chapter = brief.chapter_index, version = brief.policy.writer_version))]
pub async fn review_draft(rt: &AgentRuntime, brief: ReviewBrief<'_>, thresholds: &GateThresholds) -> GateVerdict {
    let hard = hard_findings(brief.draft, brief.bounds, brief.conflicts, thresholds);
    let policy = brief.policy;

    let call = SchemaCall::new("editor", EDITOR_SCHEMA)
        .chapter(brief.chapter_index)
        .validate(move |map| validate_editor_output(map, &policy));

    let verdict = match rt.call_schema(&review_messages(&brief), call).await {
        Ok(None) => {
            let report = EditorReport {
                decision: Decision::Accepted,
                issues: Vec::new(),
            };
            settle(report, hard, policy, brief.draft, thresholds)
        }
        Ok(Some(outcome)) if outcome.ok => settle(normalize_report(&outcome.value), hard, policy, brief.draft, thresholds),
        Ok(Some(outcome)) => {
            warn!(error = ?outcome.error, "Editor output unusable, synthesizing fallback verdict");
            with_hard(GateVerdict::fallback(brief.draft, policy, thresholds), hard)
        }
        Err(err) => {
            warn!(error = %err, "Editor call failed, synthesizing fallback verdict");
            with_hard(GateVerdict::fallback(brief.draft, policy, thresholds), hard)
        }
    };

    info!(
        decision = %verdict.decision,
        issues = verdict.issues.len(),
        used_fallback = verdict.used_fallback,
        "Editor decision"
    );
    rt.trace().record(
        "editor_decision",
        trace_fields(json!({
            "node": "editor",
            "chapter_index": brief.chapter_index,
            "writer_version": policy.writer_version,
            "decision": verdict.decision,
            "issues": verdict.issues.len(),
            "used_fallback": verdict.used_fallback,
            "is_last_review": policy.is_last_review,
            "is_penultimate_review": policy.is_penultimate_review,
        })),
    );
    verdict
}

fn with_hard(mut verdict: GateVerdict, hard: Vec<quill_core::EditorIssue>) -> GateVerdict {
    let mut issues = hard;
    issues.append(&mut verdict.issues);
    issues.sort_by_key(|i| i.severity);
    verdict.issues = issues;
    verdict
}
