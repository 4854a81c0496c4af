//! Change proposals: the only way to replace a frozen materials pack without
//! planning anew.
//!
//! A proposal lives under `changes/proposals/<id>/` and moves through an
//! advisor review, a human decision and an optional migration log. An approved
//! proposal copies the current frozen pack into a new draft, a human edits
//! that draft, and [`ProposalRegistry::finalize_refreeze`] freezes it behind
//! the usual DoD gate.

use crate::{AnchorIndex, FreezeOutcome, MaterialsRegistry, ResolvedAnchor, resolve_anchor_details};
use quill_error::{
    ConsistencyError, ConsistencyErrorKind, JsonError, QuillErrorKind, QuillResult, StorageError,
    StorageErrorKind,
};
use quill_interface::{ProjectStore, TraceSink, trace_fields};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, instrument};

const PROPOSALS: &str = "changes/proposals";
const INDEX_KEY: &str = "changes/proposals/index.json";

/// `CP-YYYYMMDD-NNNN`.
///
/// # Examples
///
/// ```
/// assert_eq!(quill_canon::proposal_id("20261019", 7), "CP-20261019-0007");
/// ```
pub fn proposal_id(day: &str, seq: u32) -> String {
    format!("CP-{}-{:04}", day, seq)
}

fn is_valid_id(id: &str) -> bool {
    id.strip_prefix("CP-")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '-'))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Progress of one proposal file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Nothing recorded yet
    #[default]
    #[display("pending")]
    Pending,
    /// Advisor notes written
    #[display("reviewed")]
    Reviewed,
    /// Migration under way
    #[display("in_progress")]
    InProgress,
    /// Decision taken
    #[display("done")]
    Done,
}

/// The human's call on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum HumanVerdict {
    /// Go ahead and refreeze
    #[display("approve")]
    Approve,
    /// Keep the current frozen pack
    #[display("reject")]
    Reject,
}

/// What raised the proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTrigger {
    /// Chapter that ran into the problem
    pub chapter_index: u32,
    /// Frozen version in force at the time, empty before the first freeze
    pub materials_frozen_version: String,
    /// Cited pack entries
    pub anchors: Vec<ResolvedAnchor>,
    /// Why the pack has to change
    pub reason: String,
}

/// Pack entries to change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalWhat {
    /// Dotted pack paths
    #[serde(default)]
    pub paths: Vec<String>,
    /// Free text
    #[serde(default)]
    pub description: String,
}

/// Chapters and memory the change touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalImpact {
    /// Affected chapters
    #[serde(default)]
    pub chapters: Vec<u32>,
    /// Chapter memory has to be rolled back
    #[serde(default)]
    pub needs_rollback: bool,
    /// Free text
    #[serde(default)]
    pub notes: String,
}

/// Refreeze bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refreeze {
    /// Draft copied from the frozen pack
    pub draft_version: String,
    /// Frozen version the draft was copied from
    pub base_frozen_version: String,
    /// RFC 3339 time the draft was created
    pub created_at: String,
    /// Version frozen from the draft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_frozen_version: Option<String>,
    /// RFC 3339 time of the refreeze
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// `proposal.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProposal {
    /// `CP-YYYYMMDD-NNNN`
    pub proposal_id: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Project the proposal belongs to
    pub project_dir: String,
    /// What raised it
    pub trigger: ProposalTrigger,
    /// What changes
    #[serde(default)]
    pub what: ProposalWhat,
    /// Evidence for the change
    #[serde(default)]
    pub why: Vec<String>,
    /// What it touches
    #[serde(default)]
    pub impact: ProposalImpact,
    /// Options that were considered
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Set once a refreeze draft exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreeze: Option<Refreeze>,
}

/// `advisor_review.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorReview {
    /// Proposal id
    pub proposal_id: String,
    /// pending | reviewed
    pub status: ProposalStatus,
    /// Risk and impact notes
    #[serde(default)]
    pub notes: String,
    /// RFC 3339 time, empty while pending
    #[serde(default)]
    pub created_at: String,
}

/// `human_decision.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    /// Proposal id
    pub proposal_id: String,
    /// pending | done
    pub status: ProposalStatus,
    /// The call, `None` while pending
    #[serde(default)]
    pub decision: Option<HumanVerdict>,
    /// Reasoning
    #[serde(default)]
    pub notes: String,
    /// RFC 3339 time, empty while pending
    #[serde(default)]
    pub created_at: String,
}

/// One migration log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEntry {
    /// RFC 3339 time
    pub ts: String,
    /// What was done
    pub line: String,
}

/// `migration_log.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationLog {
    /// Proposal id
    pub proposal_id: String,
    /// pending | in_progress
    pub status: ProposalStatus,
    /// Lines in order
    #[serde(default)]
    pub logs: Vec<MigrationEntry>,
    /// RFC 3339 time of the first line
    #[serde(default)]
    pub created_at: String,
}

/// `migration_plan.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Proposal id
    pub proposal_id: String,
    /// pending until someone fills in the steps
    pub status: ProposalStatus,
    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<String>,
    /// RFC 3339 time, empty while pending
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProposalIndex {
    #[serde(default)]
    proposals: Vec<String>,
}

fn file_key(id: &str, file: &str) -> String {
    format!("{}/{}/{}", PROPOSALS, id, file)
}

fn encode<T: Serialize>(value: &T) -> QuillResult<Value> {
    serde_json::to_value(value).map_err(|e| JsonError::new(e.to_string()).into())
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> QuillResult<T> {
    serde_json::from_value(value).map_err(|e| {
        StorageError::new(StorageErrorKind::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
        .into()
    })
}

fn unknown(id: &str) -> quill_error::QuillError {
    ConsistencyError::new(ConsistencyErrorKind::UnknownProposal(id.to_string())).into()
}

/// Change proposals of one project.
pub struct ProposalRegistry {
    store: Arc<dyn ProjectStore>,
    materials: MaterialsRegistry,
    trace: Arc<dyn TraceSink>,
}

impl ProposalRegistry {
    /// Creates a registry over a project store.
    pub fn new(store: Arc<dyn ProjectStore>, trace: Arc<dyn TraceSink>) -> Self {
        Self {
            materials: MaterialsRegistry::new(store.clone(), trace.clone()),
            store,
            trace,
        }
    }

    /// Proposal ids in creation order.
    pub async fn ids(&self) -> QuillResult<Vec<String>> {
        Ok(match self.store.read_json(INDEX_KEY).await? {
            Some(value) => decode::<ProposalIndex>(INDEX_KEY, value)?.proposals,
            None => Vec::new(),
        })
    }

    async fn read<T: DeserializeOwned>(&self, id: &str, file: &str) -> QuillResult<T> {
        if !is_valid_id(id) {
            return Err(unknown(id));
        }
        let key = file_key(id, file);
        match self.store.read_json(&key).await? {
            Some(value) => decode(&key, value),
            None => Err(unknown(id)),
        }
    }

    async fn write<T: Serialize>(&self, id: &str, file: &str, value: &T) -> QuillResult<()> {
        self.store.write_json(&file_key(id, file), &encode(value)?).await
    }

    /// Opens a proposal against the current frozen pack and writes its
    /// skeleton files. `anchors` are cited ids; unknown ids are kept with an
    /// empty path.
    #[instrument(skip(self, reason, anchors), fields(project = %self.store.location()))]
    pub async fn create(
        &self,
        chapter_index: u32,
        reason: &str,
        anchors: &[String],
    ) -> QuillResult<ChangeProposal> {
        let (frozen_version, index) = match self.materials.load_current_frozen().await {
            Ok(frozen) => (frozen.version, frozen.anchors),
            Err(err)
                if matches!(err.kind(), QuillErrorKind::Consistency(e) if e.kind == ConsistencyErrorKind::NoFrozenPack) =>
            {
                (String::new(), AnchorIndex::default())
            }
            Err(err) => return Err(err),
        };

        let mut ids = self.ids().await?;
        let day = chrono::Utc::now().format("%Y%m%d").to_string();
        let prefix = format!("CP-{}-", day);
        let seq = ids
            .iter()
            .filter_map(|id| id.strip_prefix(&prefix))
            .filter_map(|tail| tail.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = proposal_id(&day, seq);

        let proposal = ChangeProposal {
            proposal_id: id.clone(),
            created_at: now(),
            project_dir: self.store.location(),
            trigger: ProposalTrigger {
                chapter_index,
                materials_frozen_version: frozen_version,
                anchors: resolve_anchor_details(&index, anchors),
                reason: reason.trim().to_string(),
            },
            ..Default::default()
        };
        self.write(&id, "proposal.json", &proposal).await?;
        self.write(&id, "advisor_review.json", &AdvisorReview {
            proposal_id: id.clone(),
            ..Default::default()
        })
        .await?;
        self.write(&id, "human_decision.json", &HumanDecision {
            proposal_id: id.clone(),
            ..Default::default()
        })
        .await?;
        self.write(&id, "migration_plan.json", &MigrationPlan {
            proposal_id: id.clone(),
            ..Default::default()
        })
        .await?;
        self.write(&id, "migration_log.json", &MigrationLog {
            proposal_id: id.clone(),
            ..Default::default()
        })
        .await?;
        self.store
            .write_json(&file_key(&id, "diff.patch.json"), &json!({"proposal_id": id, "patches": []}))
            .await?;

        ids.push(id.clone());
        self.store
            .write_json(INDEX_KEY, &encode(&ProposalIndex { proposals: ids })?)
            .await?;

        info!(proposal = %id, chapter = chapter_index, "Opened change proposal");
        self.trace.record(
            "proposal_created",
            trace_fields(json!({
                "proposal_id": id,
                "chapter_index": chapter_index,
                "materials_frozen_version": proposal.trigger.materials_frozen_version,
                "anchors": proposal.trigger.anchors.len(),
            })),
        );
        Ok(proposal)
    }

    /// Loads `proposal.json`.
    pub async fn load(&self, id: &str) -> QuillResult<ChangeProposal> {
        self.read(id, "proposal.json").await
    }

    /// Loads `human_decision.json`.
    pub async fn decision(&self, id: &str) -> QuillResult<HumanDecision> {
        self.read(id, "human_decision.json").await
    }

    /// Records the advisor's notes.
    pub async fn write_advisor_review(&self, id: &str, notes: &str) -> QuillResult<AdvisorReview> {
        let mut review: AdvisorReview = self.read(id, "advisor_review.json").await?;
        review.status = ProposalStatus::Reviewed;
        review.notes = notes.trim().to_string();
        review.created_at = now();
        self.write(id, "advisor_review.json", &review).await?;
        Ok(review)
    }

    /// Records the human decision. A later call replaces an earlier one.
    pub async fn write_human_decision(
        &self,
        id: &str,
        verdict: HumanVerdict,
        notes: &str,
    ) -> QuillResult<HumanDecision> {
        let mut decision = self.decision(id).await?;
        decision.status = ProposalStatus::Done;
        decision.decision = Some(verdict);
        decision.notes = notes.trim().to_string();
        decision.created_at = now();
        self.write(id, "human_decision.json", &decision).await?;
        info!(proposal = %id, verdict = %verdict, "Recorded proposal decision");
        self.trace.record(
            "proposal_decided",
            trace_fields(json!({"proposal_id": id, "decision": verdict})),
        );
        Ok(decision)
    }

    /// Appends a line to the migration log.
    pub async fn append_migration_log(&self, id: &str, line: &str) -> QuillResult<MigrationLog> {
        let mut log: MigrationLog = self.read(id, "migration_log.json").await?;
        let ts = now();
        if log.created_at.is_empty() {
            log.created_at = ts.clone();
        }
        log.status = ProposalStatus::InProgress;
        log.logs.push(MigrationEntry {
            ts,
            line: line.trim().to_string(),
        });
        self.write(id, "migration_log.json", &log).await?;
        Ok(log)
    }

    /// Copies the current frozen pack into the next draft version for a human
    /// to edit, and records it on the proposal.
    ///
    /// # Errors
    ///
    /// `UnknownProposal`, or `NoFrozenPack` when there is nothing to copy.
    #[instrument(skip(self), fields(project = %self.store.location()))]
    pub async fn create_refreeze_draft(&self, id: &str) -> QuillResult<Refreeze> {
        let mut proposal = self.load(id).await?;
        let frozen = self.materials.load_current_frozen().await?;

        let mut pack = frozen.pack;
        let created_at = now();
        pack.meta.created_at = created_at.clone();
        pack.meta.frozen_at = None;
        pack.meta.frozen_version = None;
        pack.meta.derived_from_frozen_version = Some(frozen.version.clone());
        pack.meta.derived_from_proposal_id = Some(id.to_string());
        let draft_version = self.materials.save_draft(&pack).await?;

        let refreeze = Refreeze {
            draft_version,
            base_frozen_version: frozen.version,
            created_at,
            ..Default::default()
        };
        proposal.refreeze = Some(refreeze.clone());
        self.write(id, "proposal.json", &proposal).await?;
        info!(proposal = %id, draft = %refreeze.draft_version, base = %refreeze.base_frozen_version, "Created refreeze draft");
        Ok(refreeze)
    }

    /// Freezes `draft_version` for an approved proposal and records the new
    /// frozen version on it.
    ///
    /// # Errors
    ///
    /// `ProposalNotApproved` unless the human decision is `approve`, and every
    /// error of [`MaterialsRegistry::freeze`]; a vetoed freeze leaves the
    /// proposal unchanged.
    #[instrument(skip(self), fields(project = %self.store.location()))]
    pub async fn finalize_refreeze(&self, id: &str, draft_version: &str) -> QuillResult<FreezeOutcome> {
        let mut proposal = self.load(id).await?;
        if self.decision(id).await?.decision != Some(HumanVerdict::Approve) {
            return Err(ConsistencyError::new(ConsistencyErrorKind::ProposalNotApproved(id.to_string())).into());
        }

        let outcome = self.materials.freeze(Some(draft_version)).await?;

        let mut refreeze = proposal.refreeze.take().unwrap_or_else(|| Refreeze {
            draft_version: draft_version.to_string(),
            created_at: now(),
            ..Default::default()
        });
        refreeze.new_frozen_version = Some(outcome.version.clone());
        refreeze.completed_at = Some(now());
        proposal.refreeze = Some(refreeze);
        self.write(id, "proposal.json", &proposal).await?;

        info!(proposal = %id, version = %outcome.version, "Refroze materials pack");
        self.trace.record(
            "proposal_refrozen",
            trace_fields(json!({"proposal_id": id, "draft_version": draft_version, "version": outcome.version})),
        );
        Ok(outcome)
    }
}
