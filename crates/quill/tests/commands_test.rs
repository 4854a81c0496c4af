//! Subcommands against a temporary output directory.

use quill::{
    ConsistencyErrorKind, ErrorCategory, GenerationMode, HumanVerdict, ProposalAction, QuillConfig,
    QuillErrorKind, RestateRequest, RunOptions, check_project, freeze_project, project_anchors,
    proposal_command, restate_project, run_project,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn template_config(output: &Path) -> QuillConfig {
    let mut config = QuillConfig::default();
    config.run.mode = GenerationMode::Template;
    config.run.target_words = 300;
    config.run.output_base = output.display().to_string();
    config
}

fn options(chapters: u32, resume: bool) -> RunOptions {
    RunOptions {
        idea: if resume {
            String::new()
        } else {
            "a cartographer maps a city that rearranges itself".into()
        },
        project: Some("shifting city".into()),
        resume,
        chapters: Some(chapters),
        ..Default::default()
    }
}

fn project_path(output: &Path) -> PathBuf {
    output.join("projects").join("shifting city")
}

#[tokio::test]
async fn test_run_writes_project_and_trace() {
    let output = TempDir::new().unwrap();
    let mut config = template_config(output.path());
    let opts = options(2, false);
    opts.apply(&mut config);

    let summary = run_project(&config, &opts).await.unwrap();

    assert_eq!(summary.chapters.len(), 2);
    assert_eq!(summary.materials_version, "v001");
    assert!(summary.frozen);

    let dir = project_path(output.path());
    assert!(dir.join("chapters/001.md").is_file());
    assert!(dir.join("chapters/002.md").is_file());
    assert!(dir.join("project_meta.json").is_file());
    assert!(dir.join("canon/world.json").is_file());

    let logs: Vec<_> = std::fs::read_dir(dir.join("logs"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".jsonl"))
        .collect();
    assert_eq!(logs.len(), 1);
    let trace = std::fs::read_to_string(logs[0].path()).unwrap();
    assert!(trace.contains("\"materials_frozen\""));
    assert!(trace.contains("\"editor_decision\""));
}

#[tokio::test]
async fn test_dod_and_anchors_after_run() {
    let output = TempDir::new().unwrap();
    let config = template_config(output.path());
    run_project(&config, &options(1, false)).await.unwrap();
    let dir = project_path(output.path());

    let (version, report) = check_project(&dir, None).await.unwrap();
    assert_eq!(version, "v001");
    assert!(report.ok, "{}", report.one_line());

    let (frozen, anchors) = project_anchors(&dir).await.unwrap();
    assert_eq!(frozen, "v001");
    assert!(anchors.anchors.keys().any(|id| id.starts_with("DEC-")));
    assert!(anchors.anchors.keys().any(|id| id.starts_with("CHAR-")));
}

#[tokio::test]
async fn test_resume_through_command() {
    let output = TempDir::new().unwrap();
    let mut config = template_config(output.path());
    run_project(&config, &options(1, false)).await.unwrap();

    config.run.chapters = 3;
    let summary = run_project(&config, &options(3, true)).await.unwrap();

    let written: Vec<u32> = summary.chapters.iter().map(|c| c.chapter_index).collect();
    assert_eq!(written, vec![2, 3]);
}

#[tokio::test]
async fn test_run_needs_an_idea() {
    let output = TempDir::new().unwrap();
    let config = template_config(output.path());
    let opts = RunOptions::default();

    let err = run_project(&config, &opts).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Fault);
    assert!(err.detail().contains("--idea"));
}

#[tokio::test]
async fn test_empty_project_has_nothing_to_check() {
    let output = TempDir::new().unwrap();
    let config = template_config(output.path());
    let dir = output.path().join("empty");

    assert!(check_project(&dir, None).await.is_err());
    assert!(freeze_project(&config, &dir, None).await.is_err());

    let err = project_anchors(&dir).await.unwrap_err();
    assert!(matches!(
        err.kind(),
        QuillErrorKind::Consistency(e) if e.kind == ConsistencyErrorKind::NoFrozenPack
    ));
}

#[tokio::test]
async fn test_restate_in_template_mode_keeps_text() {
    let output = TempDir::new().unwrap();
    let mut config = template_config(output.path());
    run_project(&config, &options(2, false)).await.unwrap();
    let dir = project_path(output.path());
    let before = std::fs::read_to_string(dir.join("chapters/002.md")).unwrap();

    config.run.advisor = true;
    let request = RestateRequest {
        start: 2,
        ..Default::default()
    };
    let summary = restate_project(&config, &dir, request).await.unwrap();

    let restated: Vec<u32> = summary.chapters.iter().map(|c| c.chapter_index).collect();
    assert_eq!(restated, vec![2]);
    assert!(summary.errors.is_empty());
    assert_eq!(std::fs::read_to_string(dir.join("restate/chapters/002.v1.md")).unwrap(), before);
    assert!(dir.join("restate/chapters/002.v1.editor.json").is_file());
    assert!(dir.join("chapters/002.advisor.json").is_file());
    assert!(!dir.join("chapters/001.advisor.json").exists());
    assert_eq!(std::fs::read_to_string(dir.join("chapters/002.md")).unwrap(), before);
}

#[tokio::test]
async fn test_proposal_workflow_through_command() {
    let output = TempDir::new().unwrap();
    let config = template_config(output.path());
    run_project(&config, &options(1, false)).await.unwrap();
    let dir = project_path(output.path());

    let created = proposal_command(
        &config,
        &dir,
        &ProposalAction::Create {
            chapter: 1,
            reason: "the map room needs a second door".into(),
            anchors: vec!["DEC-001".into()],
        },
    )
    .await
    .unwrap();
    let id = created["proposal_id"].as_str().unwrap().to_string();
    assert_eq!(created["trigger"]["anchors"][0]["id"], "DEC-001");

    let draft = proposal_command(&config, &dir, &ProposalAction::Draft { id: id.clone() })
        .await
        .unwrap();
    let draft_version = draft["draft_version"].as_str().unwrap().to_string();
    let refreeze = ProposalAction::Refreeze {
        id: id.clone(),
        draft_version: draft_version.clone(),
    };
    assert!(proposal_command(&config, &dir, &refreeze).await.is_err());

    let approve = ProposalAction::Decide {
        id: id.clone(),
        verdict: HumanVerdict::Approve,
        notes: "fine".into(),
    };
    proposal_command(&config, &dir, &approve).await.unwrap();
    let done = proposal_command(&config, &dir, &refreeze).await.unwrap();
    assert_eq!(done["version"], draft_version.as_str());
    assert_eq!(done["refreeze"]["new_frozen_version"], draft_version.as_str());

    let (frozen, _) = project_anchors(&dir).await.unwrap();
    assert_eq!(frozen, draft_version);
}
