//! CLI command definitions.

use clap::{Parser, Subcommand};
use quill::{GenerationMode, HumanVerdict, ProposalAction, RestateRequest, RunOptions};
use std::path::PathBuf;

/// Quill - turn a story idea into reviewed chapters
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Turn a story idea into reviewed chapters", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (replaces ./quill.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan a project and write its chapters
    Run {
        /// Story idea
        #[arg(long, default_value = "")]
        idea: String,

        /// Project name (defaults to a slug of the idea)
        #[arg(long)]
        project: Option<String>,

        /// Continue from project_meta.json
        #[arg(long)]
        resume: bool,

        /// Number of chapters
        #[arg(long)]
        chapters: Option<u32>,

        /// Target chapter length in characters
        #[arg(long)]
        target_words: Option<u32>,

        /// Rewrites allowed after the first draft
        #[arg(long)]
        max_rewrites: Option<u32>,

        /// Generation mode: template, llm or auto
        #[arg(long)]
        mode: Option<GenerationMode>,

        /// Output base directory
        #[arg(long)]
        output: Option<PathBuf>,

        /// Abort on the first failing chapter instead of recording it
        #[arg(long)]
        stop_on_error: bool,

        /// Write an advisor report for every finished chapter
        #[arg(long)]
        advisor: bool,
    },

    /// Audit existing chapters and rewrite them until the editor accepts
    Restate {
        /// Project directory
        #[arg(long)]
        project: PathBuf,

        /// First chapter
        #[arg(long, default_value_t = 1)]
        start: u32,

        /// Last chapter (defaults to the last one written)
        #[arg(long)]
        end: Option<u32>,

        /// Reviews per chapter, including the audit (at least 2)
        #[arg(long, default_value_t = 3)]
        max_reviews: u32,

        /// Generation mode: template, llm or auto
        #[arg(long)]
        mode: Option<GenerationMode>,

        /// Abort on the first failing chapter instead of recording it
        #[arg(long)]
        stop_on_error: bool,

        /// Write an advisor report for every restated chapter
        #[arg(long)]
        advisor: bool,
    },

    /// Change proposals against the frozen materials pack
    Proposal {
        /// Project directory
        #[arg(long)]
        project: PathBuf,

        /// Workflow step
        #[command(subcommand)]
        step: ProposalStep,
    },

    /// Freeze a draft materials pack behind the DoD gate
    Freeze {
        /// Project directory
        #[arg(long)]
        project: PathBuf,

        /// Draft version (vNNN), latest when omitted
        #[arg(long)]
        version: Option<String>,
    },

    /// Check a draft materials pack without freezing it
    Dod {
        /// Project directory
        #[arg(long)]
        project: PathBuf,

        /// Draft version (vNNN), latest when omitted
        #[arg(long)]
        version: Option<String>,
    },

    /// List anchors of the current frozen pack
    Anchors {
        /// Project directory
        #[arg(long)]
        project: PathBuf,
    },
}

/// Steps of the change-proposal workflow
#[derive(Subcommand, Debug)]
pub enum ProposalStep {
    /// Open a proposal
    Create {
        /// Chapter that raised it
        #[arg(long)]
        chapter: u32,

        /// Why the frozen materials should change
        #[arg(long)]
        reason: String,

        /// Cited anchor id (repeatable)
        #[arg(long = "anchor")]
        anchors: Vec<String>,
    },

    /// Record advisor notes
    Review {
        /// Proposal id (CP-YYYYMMDD-NNNN)
        id: String,

        /// Notes
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Approve a proposal
    Approve {
        /// Proposal id
        id: String,

        /// Notes
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Reject a proposal
    Reject {
        /// Proposal id
        id: String,

        /// Notes
        #[arg(long, default_value = "")]
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

        /// Draft version (vNNN)
        #[arg(long)]
        draft_version: String,
    },
}

impl ProposalStep {
    /// The workflow action this step runs.
    pub fn action(&self) -> ProposalAction {
        match self {
            ProposalStep::Create { chapter, reason, anchors } => ProposalAction::Create {
                chapter: *chapter,
                reason: reason.clone(),
                anchors: anchors.clone(),
            },
            ProposalStep::Review { id, notes } => ProposalAction::Review {
                id: id.clone(),
                notes: notes.clone(),
            },
            ProposalStep::Approve { id, notes } => ProposalAction::Decide {
                id: id.clone(),
                verdict: HumanVerdict::Approve,
                notes: notes.clone(),
            },
            ProposalStep::Reject { id, notes } => ProposalAction::Decide {
                id: id.clone(),
                verdict: HumanVerdict::Reject,
                notes: notes.clone(),
            },
            ProposalStep::Log { id, line } => ProposalAction::Log {
                id: id.clone(),
                line: line.clone(),
            },
            ProposalStep::Draft { id } => ProposalAction::Draft { id: id.clone() },
            ProposalStep::Refreeze { id, draft_version } => ProposalAction::Refreeze {
                id: id.clone(),
                draft_version: draft_version.clone(),
            },
        }
    }
}

impl Commands {
    /// Flags of `run` as pipeline options, `None` for other commands.
    pub fn run_options(&self) -> Option<RunOptions> {
        match self {
            Commands::Run {
                idea,
                project,
                resume,
                chapters,
                target_words,
                max_rewrites,
                mode,
                output,
                stop_on_error,
                advisor,
            } => Some(RunOptions {
                idea: idea.clone(),
                project: project.clone(),
                resume: *resume,
                chapters: *chapters,
                target_words: *target_words,
                max_rewrites: *max_rewrites,
                mode: *mode,
                output: output.clone(),
                stop_on_error: *stop_on_error,
                advisor: *advisor,
            }),
            _ => None,
        }
    }

    /// Range of `restate` as a pipeline request, `None` for other commands.
    pub fn restate_request(&self) -> Option<RestateRequest> {
        match self {
            Commands::Restate {
                start, end, max_reviews, ..
            } => Some(RestateRequest {
                start: *start,
                end: *end,
                max_reviews: *max_reviews,
            }),
            _ => None,
        }
    }
}
