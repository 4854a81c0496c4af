//! Quill CLI binary.
//!
//! - `run`: plan (or resume) a project and write chapters
//! - `freeze` / `dod`: gate a materials pack
//! - `anchors`: list citable ids of the frozen pack
//! - `restate`: audit and rewrite existing chapters
//! - `proposal`: change proposals against the frozen pack

use anyhow::Context;
use clap::Parser;
use quill::{
    ChapterError, ChapterOutcome, QuillConfig, check_project, freeze_project, init_logging,
    project_anchors, proposal_command, restate_project, run_project,
};

mod cli;

fn print_chapter(chapter: &ChapterOutcome) {
    println!(
        "chapter {:03}: {} after {} draft(s), {} chars{}{}",
        chapter.chapter_index,
        chapter.decision,
        chapter.writer_versions,
        chapter.chars,
        if chapter.draft_fallback { " (template)" } else { "" },
        chapter
            .advisor
            .map(|a| format!(", advisor: {}", a))
            .unwrap_or_default()
    );
}

fn print_errors(errors: &[ChapterError]) {
    for error in errors {
        eprintln!(
            "chapter {:03} failed: {} ({})",
            error.chapter_index, error.error, error.error_type
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use cli::{Cli, Commands};

    // Parse command-line arguments
    let cli = Cli::parse();

    let mut config = QuillConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(config.logging.format, cli.verbose)?;

    match &cli.command {
        command @ Commands::Run { .. } => {
            let Some(options) = command.run_options() else {
                return Ok(());
            };
            options.apply(&mut config);
            let summary = run_project(&config, &options).await?;
            summary.chapters.iter().for_each(print_chapter);
            print_errors(&summary.errors);
            println!(
                "{}: materials {}{}, {} chapter(s), {} arc summar{}",
                summary.project,
                summary.materials_version,
                if summary.frozen { " (frozen)" } else { " (draft)" },
                summary.chapters.len(),
                summary.arcs.len(),
                if summary.arcs.len() == 1 { "y" } else { "ies" }
            );
        }

        command @ Commands::Restate {
            project,
            mode,
            stop_on_error,
            advisor,
            ..
        } => {
            let Some(request) = command.restate_request() else {
                return Ok(());
            };
            if let Some(mode) = mode {
                config.run.mode = *mode;
            }
            config.run.stop_on_error |= *stop_on_error;
            config.run.advisor |= *advisor;
            let summary = restate_project(&config, project, request).await?;
            summary.chapters.iter().for_each(print_chapter);
            print_errors(&summary.errors);
            println!(
                "{}: {} chapter(s) restated against materials {}",
                summary.project,
                summary.chapters.len(),
                summary.materials_version
            );
            if !summary.errors.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Proposal { project, step } => {
            let record = proposal_command(&config, project, &step.action()).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Freeze { project, version } => {
            match freeze_project(&config, project, version.as_deref()).await {
                Ok(outcome) => {
                    println!("frozen {}: {}", outcome.version, outcome.dod.one_line());
                    println!("{} anchors", outcome.anchors.len());
                }
                Err(err) => {
                    eprintln!("freeze refused: {}", err.detail());
                    std::process::exit(1);
                }
            }
        }

        Commands::Dod { project, version } => {
            let (version, report) = check_project(project, version.as_deref()).await?;
            println!("{} {}", version, report.one_line());
            for issue in &report.issues {
                println!("  [{}] {}: {}", issue.severity, issue.id, issue.message);
            }
            if !report.ok {
                std::process::exit(1);
            }
        }

        Commands::Anchors { project } => {
            let (version, anchors) = project_anchors(project).await?;
            println!("{} ({} anchors)", version, anchors.len());
            for (id, anchor) in &anchors.anchors {
                println!("  {:<16} {:<32} {}", id, anchor.path, anchor.title);
            }
        }
    }

    Ok(())
}
