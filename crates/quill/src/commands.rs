//! What the CLI subcommands do, callable without a terminal.

use crate::config::QuillConfig;
use quill_canon::{AnchorIndex, DodReport, FreezeOutcome, HumanVerdict, MaterialsRegistry, ProposalRegistry};
use quill_error::{ConfigError, JsonError, QuillResult, StorageError, StorageErrorKind};
use quill_interface::{GenerationDriver, NullTrace, ProjectStore, TraceSink};
use quill_models::OpenAiCompatClient;
use quill_narrative::{
    AgentRuntime, GenerationMode, Pipeline, RestateRequest, RestateSummary, RunRequest, RunSummary,
};
use quill_retry::RetryExecutor;
use quill_storage::{FileProjectStore, JsonlTraceSink, project_dir, safe_filename};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Characters of the idea used to name a project when none is given.
const PROJECT_NAME_CHARS: usize = 40;

/// Flags of `quill run` that override configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Story idea
    pub idea: String,
    /// Project name
    pub project: Option<String>,
    /// Continue an existing project
    pub resume: bool,
    /// Chapter count override
    pub chapters: Option<u32>,
    /// Target length override
    pub target_words: Option<u32>,
    /// Rewrite cap override
    pub max_rewrites: Option<u32>,
    /// Mode override
    pub mode: Option<GenerationMode>,
    /// Output base override
    pub output: Option<PathBuf>,
    /// Abort on the first failing chapter
    pub stop_on_error: bool,
    /// Write advisor reports
    pub advisor: bool,
}

impl RunOptions {
    /// Applies the flags on top of loaded configuration.
    pub fn apply(&self, config: &mut QuillConfig) {
        if let Some(chapters) = self.chapters {
            config.run.chapters = chapters;
        }
        if let Some(target_words) = self.target_words {
            config.run.target_words = target_words;
        }
        if let Some(max_rewrites) = self.max_rewrites {
            config.run.max_rewrites = max_rewrites;
        }
        if let Some(mode) = self.mode {
            config.run.mode = mode;
        }
        if let Some(output) = &self.output {
            config.run.output_base = output.display().to_string();
        }
        if self.stop_on_error {
            config.run.stop_on_error = true;
        }
        if self.advisor {
            config.run.advisor = true;
        }
    }

    /// Project name: the flag, else a slug of the idea.
    pub fn project_name(&self) -> String {
        match self.project.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => safe_filename(name, "story"),
            _ => {
                let head: String = self.idea.trim().chars().take(PROJECT_NAME_CHARS).collect();
                safe_filename(&head, "story")
            }
        }
    }
}

/// The driver a run should use, `None` for template generation.
///
/// # Errors
///
/// `llm` mode without a usable `[llm]` section, or a client that cannot be built.
pub fn build_driver(config: &QuillConfig) -> QuillResult<Option<Arc<dyn GenerationDriver>>> {
    match config.run.mode {
        GenerationMode::Template => Ok(None),
        mode if !config.llm.is_usable() => {
            if mode == GenerationMode::Llm {
                return Err(ConfigError::new(
                    "llm mode needs llm.base_url and llm.model (or LLM_BASE_URL and LLM_MODEL)",
                )
                .into());
            }
            warn!("No generation endpoint configured, auto mode will use templates");
            Ok(None)
        }
        _ => {
            let client = OpenAiCompatClient::new(config.llm.clone())?;
            info!(endpoint = %client.endpoint(), "Using OpenAI-compatible endpoint");
            let driver: Arc<dyn GenerationDriver> = Arc::new(client);
            Ok(Some(driver))
        }
    }
}

/// Agent runtime for a configuration.
pub fn build_runtime(
    config: &QuillConfig,
    driver: Option<Arc<dyn GenerationDriver>>,
    trace: Arc<dyn TraceSink>,
) -> AgentRuntime {
    let executor = RetryExecutor::new(config.retry.clone(), trace);
    AgentRuntime::new(driver, executor, config.run.mode)
        .with_max_fix_chars(config.repair.max_fix_chars)
        .with_sampling(config.llm.max_tokens, config.llm.temperature)
}

fn open_store(dir: &Path) -> QuillResult<Arc<dyn ProjectStore>> {
    Ok(Arc::new(FileProjectStore::new(dir)?))
}

fn open_trace(dir: &Path, inline_chars: usize) -> QuillResult<Arc<dyn TraceSink>> {
    Ok(Arc::new(JsonlTraceSink::create(dir.join("logs"), inline_chars)?))
}

/// `quill run`: plans or resumes a project and writes its chapters.
///
/// # Errors
///
/// Missing idea on a fresh run, storage failures, and generation failures
/// in `llm` mode.
#[instrument(skip_all, fields(resume = options.resume))]
pub async fn run_project(config: &QuillConfig, options: &RunOptions) -> QuillResult<RunSummary> {
    if !options.resume && options.idea.trim().is_empty() {
        return Err(ConfigError::new("--idea is required unless --resume is given").into());
    }
    let project = options.project_name();
    let dir = project_dir(Path::new(&config.run.output_base), &project);
    info!(project = %project, dir = %dir.display(), mode = %config.run.mode, "Starting run");

    let store = open_store(&dir)?;
    let trace = open_trace(&dir, config.logging.inline_chars)?;
    let runtime = build_runtime(config, build_driver(config)?, trace);
    let pipeline = Pipeline::new(runtime, store, config.run.settings(), config.gate);

    pipeline
        .run(RunRequest {
            idea: options.idea.trim().to_string(),
            project,
            resume: options.resume,
        })
        .await
}

/// `quill restate`: audits and rewrites existing chapters of a project.
///
/// # Errors
///
/// Fewer than two reviews, a project without materials, storage failures,
/// and generation failures when `stop_on_error` is set.
#[instrument(skip(config, request), fields(dir = %dir.display()))]
pub async fn restate_project(
    config: &QuillConfig,
    dir: &Path,
    request: RestateRequest,
) -> QuillResult<RestateSummary> {
    let store = open_store(dir)?;
    let trace = open_trace(dir, config.logging.inline_chars)?;
    let runtime = build_runtime(config, build_driver(config)?, trace);
    Pipeline::new(runtime, store, config.run.settings(), config.gate)
        .restate(request)
        .await
}

/// One step of the change-proposal workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalAction {
    /// Open a proposal citing anchor ids
    Create {
        /// Chapter that raised it
        chapter: u32,
        /// Why the frozen materials should change
        reason: String,
        /// Cited anchor ids
        anchors: Vec<String>,
    },
    /// Record advisor notes
    Review {
        /// Proposal id
        id: String,
        /// Notes
        notes: String,
    },
    /// Record the human decision
    Decide {
        /// Proposal id
        id: String,
        /// Approve or reject
        verdict: HumanVerdict,
        /// Notes
        notes: String,
    },
    /// Append a migration log line
    Log {
        /// Proposal id
        id: String,
        /// Log line
        line: String,
    },
    /// Copy the frozen pack into a new draft to edit
    Draft {
        /// Proposal id
        id: String,
    },
    /// Freeze the edited draft of an approved proposal
    Refreeze {
        /// Proposal id
        id: String,
        /// Draft version to freeze
        draft_version: String,
    },
}

fn json_value<T: Serialize>(value: &T) -> QuillResult<Value> {
    serde_json::to_value(value).map_err(|e| JsonError::new(e.to_string()).into())
}

/// `quill proposal`: runs one workflow step and returns the record it wrote.
///
/// # Errors
///
/// Unknown proposal ids, refreezing without an approval, a project with
/// nothing frozen, and DoD vetoes on refreeze.
#[instrument(skip(config, action), fields(dir = %dir.display()))]
pub async fn proposal_command(config: &QuillConfig, dir: &Path, action: &ProposalAction) -> QuillResult<Value> {
    let proposals = ProposalRegistry::new(open_store(dir)?, open_trace(dir, config.logging.inline_chars)?);
    match action {
        ProposalAction::Create { chapter, reason, anchors } => {
            json_value(&proposals.create(*chapter, reason, anchors).await?)
        }
        ProposalAction::Review { id, notes } => json_value(&proposals.write_advisor_review(id, notes).await?),
        ProposalAction::Decide { id, verdict, notes } => {
            json_value(&proposals.write_human_decision(id, *verdict, notes).await?)
        }
        ProposalAction::Log { id, line } => json_value(&proposals.append_migration_log(id, line).await?),
        ProposalAction::Draft { id } => json_value(&proposals.create_refreeze_draft(id).await?),
        ProposalAction::Refreeze { id, draft_version } => {
            let outcome = proposals.finalize_refreeze(id, draft_version).await?;
            json_value(&proposals.load(id).await?.refreeze).map(|refreeze| {
                serde_json::json!({
                    "version": outcome.version,
                    "dod": outcome.dod.one_line(),
                    "anchors": outcome.anchors.len(),
                    "refreeze": refreeze,
                })
            })
        }
    }
}

/// `quill freeze`: freezes a draft (the latest when `version` is `None`).
///
/// # Errors
///
/// `FreezeBlocked` / `DodFailed` when the gate vetoes, storage failures.
#[instrument(skip(config), fields(dir = %dir.display()))]
pub async fn freeze_project(
    config: &QuillConfig,
    dir: &Path,
    version: Option<&str>,
) -> QuillResult<FreezeOutcome> {
    let registry = MaterialsRegistry::new(
        open_store(dir)?,
        open_trace(dir, config.logging.inline_chars)?,
    );
    registry.freeze(version).await
}

/// `quill dod`: checks a draft without freezing it.
///
/// # Errors
///
/// No drafts in the project, or storage failures.
pub async fn check_project(dir: &Path, version: Option<&str>) -> QuillResult<(String, DodReport)> {
    let registry = MaterialsRegistry::new(open_store(dir)?, Arc::new(NullTrace));
    let version = match version {
        Some(v) => v.to_string(),
        None => registry.latest_draft_version().await?.ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound(format!(
                "no materials drafts in {}",
                dir.display()
            )))
        })?,
    };
    let report = registry.check(&version).await?;
    Ok((version, report))
}

/// `quill anchors`: anchors of the current frozen pack.
///
/// # Errors
///
/// `NoFrozenPack` when nothing was frozen yet.
pub async fn project_anchors(dir: &Path) -> QuillResult<(String, AnchorIndex)> {
    let registry = MaterialsRegistry::new(open_store(dir)?, Arc::new(NullTrace));
    let frozen = registry.load_current_frozen().await?;
    Ok((frozen.version, frozen.anchors))
}
