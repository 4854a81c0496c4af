//! Chapter pipeline: planning, the write/review loop, memory and canon updates.

use crate::agents::{
    AgentRuntime, Draft, GenerationMode, ReviewBrief, WriterBrief, architect, character_director,
    compile_memory, review_draft, screenwriter, template_outline, tone_setter, write_chapter,
};
use crate::arc::{ArcSummary, summarize_arc};
use crate::context::{ChapterContext, ChapterState, StageDelta};
use crate::gate::{CanonConflict, GatePolicy, GateThresholds, LengthBounds};
use crate::layout::{
    PROJECT_META_KEY, advisor_key, chapter_error_key, chapter_key, memory_key, restate_draft_key,
    restate_review_key, review_key,
};
use crate::materials::{build_pack, chief_editor, planned_canon};
use crate::prompts::{canon_digest, materials_digest};
use quill_canon::{
    AbsorbReport, AdvisorAction, AdvisorReport, CanonStore, MaterialsRegistry, Suggestion,
    build_advisor_report,
};
use quill_core::{CanonBundle, ChapterMemory, Constraints, Decision, MaterialsBundle, MaterialsPack};
use quill_error::{
    ConfigError, ConsistencyError, ConsistencyErrorKind, ErrorCategory, JsonError, QuillError,
    QuillErrorKind, QuillResult, StorageError, StorageErrorKind,
};
use quill_interface::{ProjectStore, trace_fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const MIN_TARGET_WORDS: u32 = 50;
/// A restate needs the audit review plus one review of a rewrite.
const MIN_RESTATE_REVIEWS: u32 = 2;

/// Run parameters (`[run]` in configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Target chapter length in characters
    pub target_words: u32,
    /// Chapters to write
    pub chapters: u32,
    /// Rewrites allowed after the first draft
    pub max_rewrites: u32,
    /// Lower length bound as a fraction of the target
    pub writer_min_ratio: f64,
    /// Upper length bound as a fraction of the target
    pub writer_max_ratio: f64,
    /// Chapters per arc summary, 0 disables arc summaries
    pub arc_every: u32,
    /// Absorb memories of rejected chapters too
    pub allow_unapproved_canon_updates: bool,
    /// Generation mode
    pub mode: GenerationMode,
    /// Abort on the first failing chapter instead of recording it and moving on
    pub stop_on_error: bool,
    /// Audit every finished chapter against the frozen pack
    pub advisor: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            target_words: 800,
            chapters: 1,
            max_rewrites: 2,
            writer_min_ratio: 0.75,
            writer_max_ratio: 1.25,
            arc_every: 10,
            allow_unapproved_canon_updates: false,
            mode: GenerationMode::Auto,
            stop_on_error: false,
            advisor: false,
        }
    }
}

impl RunSettings {
    /// Clamps values into their valid ranges.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.target_words = self.target_words.max(MIN_TARGET_WORDS);
        self.chapters = self.chapters.max(1);
        if !(self.writer_min_ratio > 0.0 && self.writer_min_ratio < self.writer_max_ratio) {
            warn!(
                min = self.writer_min_ratio,
                max = self.writer_max_ratio,
                "Invalid length ratios, using defaults"
            );
            self.writer_min_ratio = defaults.writer_min_ratio;
            self.writer_max_ratio = defaults.writer_max_ratio;
        }
        self
    }

    /// Length window derived from the target and ratios.
    pub fn bounds(&self) -> LengthBounds {
        LengthBounds::from_target(self.target_words, self.writer_min_ratio, self.writer_max_ratio)
    }

    /// Constraints recorded in the materials pack.
    pub fn constraints(&self) -> Constraints {
        Constraints {
            target_words: self.target_words,
            writer_min_ratio: self.writer_min_ratio,
            writer_max_ratio: self.writer_max_ratio,
            paragraph_rules: vec!["short paragraphs; a new paragraph for every speaker".into()],
            ..Default::default()
        }
    }
}

/// `project_meta.json`: progress of a project across runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Story idea
    #[serde(default)]
    pub idea: String,
    /// Project name
    #[serde(default)]
    pub project: String,
    /// Chapters the run plans to write
    #[serde(default)]
    pub chapters_planned: u32,
    /// Last chapter that finished (accepted or not)
    #[serde(default)]
    pub last_completed_chapter: u32,
    /// Materials pack version in use
    #[serde(default)]
    pub materials_version: String,
    /// RFC 3339 time of the last update
    #[serde(default)]
    pub updated_at: String,
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunRequest {
    /// Story idea
    pub idea: String,
    /// Project name, recorded in `project_meta.json`
    pub project: String,
    /// Continue from `project_meta.json` instead of planning anew
    pub resume: bool,
}

/// Materials the chapters are written from.
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    /// The pack
    pub pack: MaterialsPack,
    /// Its version label
    pub version: String,
    /// True when the pack passed the freeze gate
    pub frozen: bool,
}

/// Result of one chapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterOutcome {
    /// Chapter index
    pub chapter_index: u32,
    /// Final editor decision
    pub decision: Decision,
    /// Draft versions written
    pub writer_versions: u32,
    /// Length of the final draft in characters
    pub chars: usize,
    /// Final draft came from the template
    pub draft_fallback: bool,
    /// Final review was synthesized
    pub editor_fallback: bool,
    /// Canon absorption counts, `None` when canon was not touched
    pub absorbed: Option<AbsorbReport>,
    /// Editor canon patches applied
    pub patches_applied: usize,
    /// Memory record
    pub memory: ChapterMemory,
    /// Advisor recommendation, `None` when no audit ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisor: Option<AdvisorAction>,
}

/// `chapters/NNN.error.json`: a chapter that failed without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterError {
    /// Chapter index
    pub chapter_index: u32,
    /// Error type name, e.g. `AuthenticationError`
    pub error_type: String,
    /// Error category
    pub category: String,
    /// Error detail
    pub error: String,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Project location
    pub project: String,
    /// Materials version used
    pub materials_version: String,
    /// Whether that version is frozen
    pub frozen: bool,
    /// Chapters written in this run
    pub chapters: Vec<ChapterOutcome>,
    /// Arc summaries written in this run
    pub arcs: Vec<ArcSummary>,
    /// Chapters that failed and were skipped
    pub errors: Vec<ChapterError>,
}

/// Which existing chapters to restate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestateRequest {
    /// First chapter
    pub start: u32,
    /// Last chapter, the last one on disk when `None`
    pub end: Option<u32>,
    /// Reviews per chapter including the audit, at least 2
    pub max_reviews: u32,
}

impl Default for RestateRequest {
    fn default() -> Self {
        Self {
            start: 1,
            end: None,
            max_reviews: 3,
        }
    }
}

/// Result of a restate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestateSummary {
    /// Project location
    pub project: String,
    /// Materials version the chapters were checked against
    pub materials_version: String,
    /// Restated chapters
    pub chapters: Vec<ChapterOutcome>,
    /// Chapters that failed and were skipped
    pub errors: Vec<ChapterError>,
}

/// How a chapter enters the write/review loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Fresh chapter: write first, then review
    Write,
    /// Existing chapter: audit under a forced rejection, then rewrite
    Restate,
}

fn is_no_frozen_pack(err: &QuillError) -> bool {
    matches!(err.kind(), QuillErrorKind::Consistency(e) if e.kind == ConsistencyErrorKind::NoFrozenPack)
}

/// Indices of `NNN.md` files among chapter file names.
fn chapter_indices(names: &[String]) -> Vec<u32> {
    let mut indices: Vec<u32> = names
        .iter()
        .filter_map(|n| n.strip_suffix(".md"))
        .filter(|stem| !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|stem| stem.parse().ok())
        .collect();
    indices.sort_unstable();
    indices
}

fn json_value<T: Serialize>(value: &T) -> QuillResult<Value> {
    serde_json::to_value(value).map_err(|e| JsonError::new(e.to_string()).into())
}

/// Drives a project from idea to chapters.
pub struct Pipeline {
    runtime: AgentRuntime,
    store: Arc<dyn ProjectStore>,
    canon: CanonStore,
    registry: MaterialsRegistry,
    settings: RunSettings,
    thresholds: GateThresholds,
}

impl Pipeline {
    /// Creates a pipeline over one project store.
    pub fn new(
        runtime: AgentRuntime,
        store: Arc<dyn ProjectStore>,
        settings: RunSettings,
        thresholds: GateThresholds,
    ) -> Self {
        let registry = MaterialsRegistry::new(store.clone(), runtime.trace().clone());
        Self {
            canon: CanonStore::new(store.clone()),
            registry,
            runtime,
            store,
            settings: settings.normalized(),
            thresholds,
        }
    }

    /// Effective settings.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn trace(&self, event: &str, fields: Value) {
        self.runtime.trace().record(event, trace_fields(fields));
    }

    /// Runs the planning roles, seeds canon and saves the draft pack, then
    /// tries to freeze it.
    ///
    /// A freeze vetoed by the DoD gate is not fatal: the run continues from
    /// the draft pack.
    #[instrument(skip_all, fields(project = %self.store.location()))]
    pub async fn plan(&self, idea: &str) -> QuillResult<Planned> {
        self.trace("node_start", json!({"node": "planning", "chapter_index": 0}));
        let rt = &self.runtime;
        let canon = self.canon.load().await?;

        let world = architect(rt, idea, &canon).await?;
        let characters = character_director(rt, idea, &world.value, &canon).await?;
        let outline = screenwriter(rt, idea, &canon, self.settings.chapters).await?;
        let tone = tone_setter(rt, idea, &canon).await?;
        let used_fallback = [
            world.used_fallback,
            characters.used_fallback,
            outline.used_fallback,
            tone.used_fallback,
        ];

        let bundle = MaterialsBundle {
            world: world.value,
            characters: characters.value,
            outline: outline.value,
            tone: tone.value,
        };
        let merged = self.canon.seed(&planned_canon(&bundle)).await?;
        let plan = chief_editor(rt, idea, &bundle, &merged, self.settings.target_words).await?;

        let pack = build_pack(
            &self.store.location(),
            bundle,
            merged,
            plan.value,
            self.settings.constraints(),
        );
        let version = self.registry.save_draft(&pack).await?;

        let planned = match self.registry.freeze(Some(&version)).await {
            Ok(outcome) => Planned {
                pack: self.registry.load_frozen(&outcome.version).await?.pack,
                version: outcome.version,
                frozen: true,
            },
            Err(err) if err.category() == ErrorCategory::Conflict => {
                warn!(version = %version, error = %err.detail(), "Materials not frozen, writing from the draft");
                self.draft_pack(&version).await?
            }
            Err(err) => return Err(err),
        };

        info!(version = %planned.version, frozen = planned.frozen, "Planning finished");
        self.trace(
            "node_end",
            json!({
                "node": "planning",
                "chapter_index": 0,
                "materials_version": planned.version,
                "frozen": planned.frozen,
                "used_fallback": used_fallback,
                "execution_fallback": plan.used_fallback,
            }),
        );
        Ok(planned)
    }

    async fn draft_pack(&self, version: &str) -> QuillResult<Planned> {
        let value = self.registry.load_draft(version).await?;
        let pack = serde_json::from_value(value).map_err(|e| {
            StorageError::new(StorageErrorKind::Decode {
                key: format!("materials draft {}", version),
                message: e.to_string(),
            })
        })?;
        Ok(Planned {
            pack,
            version: version.to_string(),
            frozen: false,
        })
    }

    /// The current frozen pack, else the latest draft, else `None`.
    pub async fn current_pack(&self) -> QuillResult<Option<Planned>> {
        match self.registry.load_current_frozen().await {
            Ok(frozen) => Ok(Some(Planned {
                pack: frozen.pack,
                version: frozen.version,
                frozen: true,
            })),
            Err(err) if is_no_frozen_pack(&err) => {
                match self.registry.latest_draft_version().await? {
                    Some(version) => self.draft_pack(&version).await.map(Some),
                    None => Ok(None),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Reads `project_meta.json`.
    pub async fn project_meta(&self) -> QuillResult<Option<ProjectMeta>> {
        match self.store.read_json(PROJECT_META_KEY).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                StorageError::new(StorageErrorKind::Decode {
                    key: PROJECT_META_KEY.into(),
                    message: e.to_string(),
                })
                .into()
            }),
            None => Ok(None),
        }
    }

    async fn save_meta(&self, meta: &mut ProjectMeta) -> QuillResult<()> {
        meta.updated_at = chrono::Utc::now().to_rfc3339();
        self.store.write_json(PROJECT_META_KEY, &json_value(meta)?).await
    }

    /// Builds the read-only context of one chapter.
    pub fn chapter_context(
        &self,
        chapter_index: u32,
        pack: &MaterialsPack,
        canon: &CanonBundle,
        previous_summary: String,
    ) -> ChapterContext {
        self.context_with(chapter_index, pack, canon, previous_summary, self.settings.max_rewrites)
    }

    fn context_with(
        &self,
        chapter_index: u32,
        pack: &MaterialsPack,
        canon: &CanonBundle,
        previous_summary: String,
        max_rewrites: u32,
    ) -> ChapterContext {
        let outline = pack
            .planning
            .outline
            .chapter(chapter_index)
            .cloned()
            .or_else(|| template_outline(chapter_index).chapter(chapter_index).cloned())
            .unwrap_or_default();
        let lead = canon
            .characters
            .characters
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        ChapterContext::new(
            chapter_index,
            outline,
            canon_digest(canon),
            materials_digest(pack),
            previous_summary,
            self.settings.target_words,
            self.settings.bounds(),
            CanonConflict::from_world(&canon.world),
            lead,
            max_rewrites,
        )
    }

    async fn previous_summary(&self, chapter_index: u32) -> QuillResult<String> {
        if chapter_index <= 1 {
            return Ok(String::new());
        }
        Ok(self
            .store
            .read_json(&memory_key(chapter_index - 1))
            .await?
            .and_then(|v| v.get("summary").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default())
    }

    /// Writes, reviews and records one chapter.
    ///
    /// The write/review loop runs until the draft is accepted or the rewrite
    /// budget is spent. The memory record is always written; canon absorption
    /// and editor canon patches only follow an accepted chapter.
    #[instrument(skip_all, fields(chapter = ctx.chapter_index()))]
    pub async fn run_chapter(&self, ctx: &ChapterContext) -> QuillResult<ChapterOutcome> {
        let mut state = ChapterState::default();
        self.write_and_review(ctx, &mut state, Pass::Write).await?;
        self.finish_chapter(ctx, state).await
    }

    /// Re-reviews an existing chapter and rewrites it until accepted.
    ///
    /// The existing text is draft version 1. Every review before the last one
    /// runs with `force_reject_with_issues`, so a model editor has to find
    /// something to fix; the last review is the usual lenient one. Drafts and
    /// reviews go to `restate/chapters/`, the final text replaces
    /// `chapters/NNN.md`, then memory and canon are updated as for a new
    /// chapter.
    #[instrument(skip_all, fields(chapter = ctx.chapter_index()))]
    pub async fn restate_chapter(&self, ctx: &ChapterContext, existing: String) -> QuillResult<ChapterOutcome> {
        let index = *ctx.chapter_index();
        self.store.write_text(&restate_draft_key(index, 1), &existing).await?;
        let mut state = ChapterState::default();
        state.apply(StageDelta::Drafted(Draft {
            text: existing,
            writer_version: 1,
            used_fallback: false,
            calls: 0,
        }));
        self.write_and_review(ctx, &mut state, Pass::Restate).await?;
        self.finish_chapter(ctx, state).await
    }

    async fn write_and_review(&self, ctx: &ChapterContext, state: &mut ChapterState, pass: Pass) -> QuillResult<()> {
        let rt = &self.runtime;
        let index = *ctx.chapter_index();
        let max_rewrites = *ctx.max_rewrites();

        while !state.is_settled(max_rewrites) {
            // A restated chapter starts with a draft nobody has reviewed yet.
            if state.verdicts().len() >= state.writer_version() as usize {
                let version = state.writer_version() + 1;
                let feedback = state.feedback();

                self.trace("node_start", json!({"node": "writer", "chapter_index": index, "writer_version": version}));
                let draft = write_chapter(
                    rt,
                    WriterBrief {
                        chapter_index: index,
                        writer_version: version,
                        outline: ctx.outline(),
                        canon_digest: ctx.canon_digest(),
                        materials_digest: ctx.materials_digest(),
                        previous_summary: ctx.previous_summary(),
                        feedback: &feedback,
                        previous_draft: state.draft().as_ref().map(|d| d.text.as_str()),
                        target_chars: *ctx.target_chars(),
                        bounds: *ctx.bounds(),
                        lead: ctx.lead(),
                    },
                )
                .await?;
                self.trace(
                    "node_end",
                    json!({
                        "node": "writer",
                        "chapter_index": index,
                        "writer_version": version,
                        "chars": draft.chars(),
                        "calls": draft.calls,
                        "used_fallback": draft.used_fallback,
                    }),
                );
                if pass == Pass::Restate {
                    self.store.write_text(&restate_draft_key(index, version), &draft.text).await?;
                }
                state.apply(StageDelta::Drafted(draft));
            }

            let version = state.writer_version();
            let force = pass == Pass::Restate && version < 1 + max_rewrites;
            let policy = GatePolicy::for_round(version, max_rewrites, &self.thresholds, force);
            let verdict = {
                let text = state.draft().as_ref().map_or("", |d| d.text.as_str());
                review_draft(
                    rt,
                    ReviewBrief {
                        chapter_index: index,
                        draft: text,
                        outline: ctx.outline(),
                        canon_digest: ctx.canon_digest(),
                        materials_digest: ctx.materials_digest(),
                        bounds: *ctx.bounds(),
                        conflicts: ctx.conflicts(),
                        policy,
                    },
                    &self.thresholds,
                )
                .await
            };
            let key = match pass {
                Pass::Write => review_key(index, version),
                Pass::Restate => restate_review_key(index, version),
            };
            self.store.write_json(&key, &json_value(&verdict)?).await?;
            state.apply(StageDelta::Reviewed(verdict));
        }
        Ok(())
    }

    async fn finish_chapter(&self, ctx: &ChapterContext, mut state: ChapterState) -> QuillResult<ChapterOutcome> {
        let rt = &self.runtime;
        let index = *ctx.chapter_index();
        let decision = state.decision();
        let (text, draft_fallback) = state
            .draft()
            .as_ref()
            .map(|d| (d.text.clone(), d.used_fallback))
            .unwrap_or_default();
        self.store.write_text(&chapter_key(index), &text).await?;
        let advisor = self.advise(index, &text, decision).await?;

        self.trace("node_start", json!({"node": "memory", "chapter_index": index}));
        let canon = self.canon.load().await?;
        let mut memory = compile_memory(rt, index, &text, &canon, ctx.outline()).await?;
        memory.approved = decision.is_accepted();
        memory.editor_decision = decision;
        memory.writer_version = state.writer_version();
        self.store.write_json(&memory_key(index), &json_value(&memory)?).await?;
        self.trace(
            "node_end",
            json!({"node": "memory", "chapter_index": index, "approved": memory.approved, "used_fallback": memory.used_fallback}),
        );
        state.apply(StageDelta::Remembered(memory));

        let memory = state.memory().clone().unwrap_or_default();
        let absorbed = if memory.approved || self.settings.allow_unapproved_canon_updates {
            let report = self
                .canon
                .absorb(&memory, self.settings.allow_unapproved_canon_updates)
                .await?;
            Some(report)
        } else {
            info!(decision = %decision, "Chapter not accepted, canon left untouched");
            None
        };
        let patches_applied = match state.last_verdict() {
            Some(verdict) if decision.is_accepted() => {
                self.canon.apply_patches(&verdict.canon_patches(), index).await?
            }
            _ => 0,
        };
        self.trace(
            "canon_update",
            json!({
                "node": "canon_update",
                "chapter_index": index,
                "decision": decision,
                "absorbed": absorbed,
                "patches_applied": patches_applied,
            }),
        );

        let editor_fallback = state.last_verdict().is_some_and(|v| v.used_fallback);
        info!(
            decision = %decision,
            versions = state.writer_version(),
            chars = text.chars().count(),
            "Chapter finished"
        );
        Ok(ChapterOutcome {
            chapter_index: index,
            decision,
            writer_versions: state.writer_version(),
            chars: text.chars().count(),
            draft_fallback,
            editor_fallback,
            absorbed,
            patches_applied,
            memory,
            advisor: advisor.map(|r| r.suggested_action),
        })
    }

    /// Audits a finished chapter against the current frozen pack and writes
    /// `chapters/NNN.advisor.json`. `None` when the advisor is off or nothing
    /// is frozen yet.
    async fn advise(&self, index: u32, text: &str, decision: Decision) -> QuillResult<Option<AdvisorReport>> {
        if !self.settings.advisor {
            return Ok(None);
        }
        let frozen = match self.registry.load_current_frozen().await {
            Ok(frozen) => frozen,
            Err(err) if is_no_frozen_pack(&err) => {
                debug!(chapter = index, "No frozen pack, skipping advisor audit");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let report = build_advisor_report(text, Some(decision), &frozen);
        self.store.write_json(&advisor_key(index), &json_value(&report)?).await?;
        let rewrites = report
            .findings
            .iter()
            .filter(|f| f.suggest == Suggestion::Rewrite)
            .count();
        info!(action = %report.suggested_action, risk = %report.risk_level, "Advisor audit");
        self.trace(
            "advisor_audit",
            json!({
                "node": "advisor",
                "chapter_index": index,
                "advisor_suggested_action": report.suggested_action,
                "advisor_findings_count": report.findings.len(),
                "advisor_rewrite_count": rewrites,
                "advisor_digest": report.digest,
                "advisor_path": advisor_key(index),
            }),
        );
        Ok(Some(report))
    }

    /// Records a failed chapter: `chapters/NNN.error.json`, a `chapter_error`
    /// trace event and a warning.
    async fn record_chapter_error(&self, index: u32, err: &QuillError) -> QuillResult<ChapterError> {
        let record = ChapterError {
            chapter_index: index,
            error_type: err.type_name().to_string(),
            category: err.category().to_string(),
            error: err.detail(),
        };
        warn!(chapter = index, error_type = %record.error_type, error = %record.error, "Chapter failed, moving on");
        self.trace(
            "chapter_error",
            json!({
                "chapter_index": index,
                "error_type": record.error_type,
                "category": record.category,
                "error": record.error,
            }),
        );
        self.store
            .write_json(&chapter_error_key(index), &json_value(&record)?)
            .await?;
        Ok(record)
    }

    /// Plans (or resumes) a project and writes its chapters.
    ///
    /// A failing chapter is recorded in `chapters/NNN.error.json` and the run
    /// moves on, unless `stop_on_error` is set. `last_completed_chapter` only
    /// advances past chapters that finished.
    #[instrument(skip_all, fields(project = %self.store.location(), resume = request.resume))]
    pub async fn run(&self, request: RunRequest) -> QuillResult<RunSummary> {
        let previous = if request.resume {
            self.project_meta().await?
        } else {
            None
        };

        let (planned, mut meta) = match previous {
            Some(meta) => {
                let planned = match self.current_pack().await? {
                    Some(planned) => planned,
                    None => self.plan(&meta.idea).await?,
                };
                info!(
                    last_completed = meta.last_completed_chapter,
                    version = %planned.version,
                    "Resuming project"
                );
                (planned, meta)
            }
            None => {
                if request.resume {
                    warn!("Nothing to resume, starting a new run");
                }
                let planned = self.plan(&request.idea).await?;
                let meta = ProjectMeta {
                    idea: request.idea.clone(),
                    project: request.project.clone(),
                    ..Default::default()
                };
                (planned, meta)
            }
        };
        meta.chapters_planned = meta.chapters_planned.max(self.settings.chapters);
        meta.materials_version = planned.version.clone();
        self.save_meta(&mut meta).await?;

        let first = meta.last_completed_chapter + 1;
        let mut previous_summary = self.previous_summary(first).await?;

        let mut chapters = Vec::new();
        let mut arcs = Vec::new();
        let mut errors = Vec::new();
        for index in first..=meta.chapters_planned {
            let canon = self.canon.load().await?;
            let ctx = self.chapter_context(index, &planned.pack, &canon, previous_summary.clone());
            match self.run_chapter(&ctx).await {
                Ok(outcome) => {
                    previous_summary = outcome.memory.summary.clone();
                    chapters.push(outcome);
                    meta.last_completed_chapter = index;
                    self.save_meta(&mut meta).await?;
                }
                Err(err) if !self.settings.stop_on_error => {
                    errors.push(self.record_chapter_error(index, &err).await?);
                }
                Err(err) => return Err(err),
            }

            let every = self.settings.arc_every;
            if every > 0 && index % every == 0 {
                let canon = self.canon.load().await?;
                if let Some(arc) = summarize_arc(&self.runtime, self.store.as_ref(), &canon, index + 1 - every, index).await? {
                    arcs.push(arc);
                }
            }
        }

        info!(chapters = chapters.len(), arcs = arcs.len(), errors = errors.len(), "Run finished");
        Ok(RunSummary {
            project: self.store.location(),
            materials_version: planned.version,
            frozen: planned.frozen,
            chapters,
            arcs,
            errors,
        })
    }

    /// Audits and rewrites existing chapters in `request.start..=request.end`.
    ///
    /// # Errors
    ///
    /// `max_reviews` below 2, no materials pack at all, storage failures, and
    /// chapter failures when `stop_on_error` is set.
    #[instrument(skip_all, fields(project = %self.store.location(), start = request.start))]
    pub async fn restate(&self, request: RestateRequest) -> QuillResult<RestateSummary> {
        if request.max_reviews < MIN_RESTATE_REVIEWS {
            return Err(ConfigError::new(format!(
                "restate needs at least {} reviews (the audit and one review of the rewrite), got {}",
                MIN_RESTATE_REVIEWS, request.max_reviews
            ))
            .into());
        }
        let planned = self
            .current_pack()
            .await?
            .ok_or_else(|| ConsistencyError::new(ConsistencyErrorKind::NoFrozenPack))?;

        let on_disk = chapter_indices(&self.store.list("chapters").await?);
        let end = request.end.or_else(|| on_disk.last().copied()).unwrap_or(0);
        let selected: Vec<u32> = on_disk
            .into_iter()
            .filter(|i| (request.start.max(1)..=end).contains(i))
            .collect();
        info!(chapters = selected.len(), end, max_reviews = request.max_reviews, "Restating chapters");
        self.trace(
            "restate_start",
            json!({"start": request.start, "end": end, "max_reviews": request.max_reviews, "chapters": selected}),
        );

        let mut chapters = Vec::new();
        let mut errors = Vec::new();
        for index in selected {
            let Some(existing) = self.store.read_text(&chapter_key(index)).await? else {
                continue;
            };
            let canon = self.canon.load().await?;
            let summary = self.previous_summary(index).await?;
            let ctx = self.context_with(index, &planned.pack, &canon, summary, request.max_reviews - 1);
            match self.restate_chapter(&ctx, existing).await {
                Ok(outcome) => chapters.push(outcome),
                Err(err) if !self.settings.stop_on_error => {
                    errors.push(self.record_chapter_error(index, &err).await?);
                }
                Err(err) => return Err(err),
            }
        }

        info!(chapters = chapters.len(), errors = errors.len(), "Restate finished");
        Ok(RestateSummary {
            project: self.store.location(),
            materials_version: planned.version,
            chapters,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_normalize() {
        let settings = RunSettings {
            target_words: 10,
            chapters: 0,
            writer_min_ratio: 1.5,
            writer_max_ratio: 1.2,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.target_words, MIN_TARGET_WORDS);
        assert_eq!(settings.chapters, 1);
        assert_eq!((settings.writer_min_ratio, settings.writer_max_ratio), (0.75, 1.25));
        let bounds = RunSettings::default().bounds();
        assert_eq!((bounds.min_chars, bounds.max_chars), (600, 1000));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: RunSettings = serde_json::from_value(json!({"chapters": 3, "mode": "template"})).unwrap();
        assert_eq!(settings.chapters, 3);
        assert_eq!(settings.mode, GenerationMode::Template);
        assert_eq!(settings.max_rewrites, 2);
    }
}
