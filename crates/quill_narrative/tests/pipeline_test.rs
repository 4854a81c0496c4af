//! End-to-end pipeline runs against template agents and a scripted driver.

use quill_canon::CanonStore;
use quill_core::{Decision, OutlineChapter, WorldRule};
use quill_error::GenerationErrorKind;
use quill_interface::{GenerationDriver, MemoryTrace, MockBehavior, MockDriver, ProjectStore};
use quill_narrative::{
    AgentRuntime, CanonConflict, ChapterContext, ChapterError, GateThresholds, GenerationMode,
    Pipeline, ProjectMeta, RestateRequest, RunRequest, RunSettings, advisor_key, chapter_error_key,
    chapter_key, memory_key, restate_draft_key, restate_review_key, review_key,
};
use quill_retry::{RetryExecutor, RetryPolicy};
use quill_storage::{FileProjectStore, InMemoryProjectStore};
use std::sync::Arc;
use tempfile::TempDir;

fn runtime(driver: Option<Arc<dyn GenerationDriver>>, mode: GenerationMode, trace: Arc<MemoryTrace>) -> AgentRuntime {
    let policy = RetryPolicy {
        max_attempts: 1,
        base_sleep_ms: 100,
        max_sleep_ms: 1,
        ..Default::default()
    };
    AgentRuntime::new(driver, RetryExecutor::new(policy, trace), mode)
}

fn settings(chapters: u32) -> RunSettings {
    RunSettings {
        target_words: 300,
        chapters,
        max_rewrites: 1,
        arc_every: 2,
        mode: GenerationMode::Template,
        ..Default::default()
    }
}

fn request(resume: bool) -> RunRequest {
    RunRequest {
        idea: "a courier carries letters across a drowned city".into(),
        project: "drowned".into(),
        resume,
    }
}

fn context(index: u32, conflicts: Vec<CanonConflict>, max_rewrites: u32, target: u32) -> ChapterContext {
    let settings = RunSettings {
        target_words: target,
        ..Default::default()
    };
    ChapterContext::new(
        index,
        OutlineChapter {
            chapter_index: index,
            title: "Salt".into(),
            goal: "reach the harbor".into(),
            ending_hook: "the harbor lights go out".into(),
            ..Default::default()
        },
        "(canon is empty)".into(),
        String::new(),
        String::new(),
        target,
        settings.bounds(),
        conflicts,
        "Mara".into(),
        max_rewrites,
    )
}

#[tokio::test]
async fn test_template_run_writes_every_artifact() {
    let store = Arc::new(InMemoryProjectStore::new("drowned"));
    let trace = Arc::new(MemoryTrace::default());
    let pipeline = Pipeline::new(
        runtime(None, GenerationMode::Template, trace.clone()),
        store.clone(),
        settings(2),
        GateThresholds::default(),
    );

    let summary = pipeline.run(request(false)).await.unwrap();

    assert!(summary.frozen);
    assert_eq!(summary.materials_version, "v001");
    assert_eq!(summary.chapters.len(), 2);
    for outcome in &summary.chapters {
        assert_eq!(outcome.decision, Decision::Accepted);
        assert_eq!(outcome.writer_versions, 1);
        assert!(outcome.draft_fallback);
        assert!(outcome.memory.approved);
        assert!(outcome.absorbed.is_some());
    }
    assert_eq!(summary.arcs.len(), 1);
    assert!(summary.errors.is_empty());

    for key in [
        chapter_key(1),
        chapter_key(2),
        "materials/frozen/materials_pack.frozen.v001.json".to_string(),
        "materials/anchors/anchors.v001.json".to_string(),
        "materials/reviews/dod.v001.json".to_string(),
        "memory/arcs/arc_001-002.json".to_string(),
        "canon/world.json".to_string(),
    ] {
        assert!(store.keys().await.contains(&key), "missing {}", key);
    }
    let review = store.read_json(&review_key(1, 1)).await.unwrap().unwrap();
    assert_eq!(review["decision"], "accepted");

    let memory = store.read_json(&memory_key(2)).await.unwrap().unwrap();
    assert_eq!(memory["approved"], true);
    assert_eq!(memory["editor_decision"], "accepted");

    let meta: ProjectMeta = serde_json::from_value(store.read_json("project_meta.json").await.unwrap().unwrap()).unwrap();
    assert_eq!(meta.last_completed_chapter, 2);
    assert_eq!(meta.chapters_planned, 2);
    assert_eq!(meta.materials_version, "v001");

    assert_eq!(trace.events_named("materials_frozen").len(), 1);
    assert_eq!(trace.events_named("canon_update").len(), 2);
    assert!(trace.events_named("llm_request").is_empty());
}

#[tokio::test]
async fn test_unusable_editor_output_rejects_with_fallback() {
    let prose = "Mara crossed the salt flats at dawn, counting the gulls that followed her toward the drowned harbor.";
    let store = Arc::new(InMemoryProjectStore::new("harbor"));
    let trace = Arc::new(MemoryTrace::default());
    let driver = Arc::new(MockDriver::always(MockBehavior::text(prose)));
    let shared: Arc<dyn GenerationDriver> = driver.clone();

    let canon = CanonStore::new(store.clone());
    let mut seeded = quill_core::CanonBundle::default();
    seeded.world.rules.push(WorldRule {
        name: "tides".into(),
        detail: "the sea rises every night".into(),
    });
    canon.save(&seeded).await.unwrap();
    let before = canon.load().await.unwrap();

    let pipeline = Pipeline::new(
        runtime(Some(shared), GenerationMode::Auto, trace.clone()),
        store.clone(),
        RunSettings::default(),
        GateThresholds::default(),
    );

    let outcome = pipeline.run_chapter(&context(1, Vec::new(), 0, 100)).await.unwrap();

    assert_eq!(outcome.decision, Decision::Rejected);
    assert!(outcome.editor_fallback);
    assert!(!outcome.draft_fallback);
    assert!(outcome.absorbed.is_none());
    assert_eq!(outcome.patches_applied, 0);
    // writer, editor + repair, memory + repair
    assert_eq!(driver.calls(), 5);

    let review = store.read_json(&review_key(1, 1)).await.unwrap().unwrap();
    assert_eq!(review["used_fallback"], true);
    assert!(review["issues"][0]["issue"].as_str().unwrap().contains("[fallback]"));

    let memory = store.read_json(&memory_key(1)).await.unwrap().unwrap();
    assert_eq!(memory["approved"], false);
    assert_eq!(memory["editor_decision"], "rejected");
    assert_eq!(memory["used_fallback"], true);

    assert_eq!(canon.load().await.unwrap(), before);
    assert_eq!(store.read_text(&chapter_key(1)).await.unwrap().unwrap(), prose);
    assert_eq!(trace.events_named("editor_decision")[0].fields["used_fallback"], true);
}

#[tokio::test]
async fn test_canon_conflict_rejects_every_round() {
    let store = Arc::new(InMemoryProjectStore::new("conflict"));
    let trace = Arc::new(MemoryTrace::default());
    let pipeline = Pipeline::new(
        runtime(None, GenerationMode::Template, trace.clone()),
        store.clone(),
        RunSettings::default(),
        GateThresholds::default(),
    );
    let conflicts = vec![CanonConflict {
        phrase: "woke before the light".into(),
        canon_key: "world.rules.sleepless".into(),
        note: "Mara never sleeps".into(),
    }];

    let outcome = pipeline.run_chapter(&context(1, conflicts, 2, 300)).await.unwrap();

    assert_eq!(outcome.decision, Decision::Rejected);
    assert_eq!(outcome.writer_versions, 3);
    assert!(outcome.absorbed.is_none());
    for version in 1..=3 {
        let review = store.read_json(&review_key(1, version)).await.unwrap().unwrap();
        assert_eq!(review["issues"][0]["type"], "canon_conflict");
    }
    assert!(!store.keys().await.iter().any(|k| k.starts_with("canon/")));
}

#[tokio::test]
async fn test_resume_continues_after_last_chapter() {
    let dir = TempDir::new().unwrap();
    let trace = Arc::new(MemoryTrace::default());

    let store: Arc<dyn ProjectStore> = Arc::new(FileProjectStore::new(dir.path()).unwrap());
    let first = Pipeline::new(
        runtime(None, GenerationMode::Template, trace.clone()),
        store.clone(),
        settings(1),
        GateThresholds::default(),
    );
    first.run(request(false)).await.unwrap();

    let second = Pipeline::new(
        runtime(None, GenerationMode::Template, trace.clone()),
        store.clone(),
        settings(3),
        GateThresholds::default(),
    );
    let summary = second.run(request(true)).await.unwrap();

    let written: Vec<u32> = summary.chapters.iter().map(|c| c.chapter_index).collect();
    assert_eq!(written, vec![2, 3]);
    assert_eq!(summary.materials_version, "v001");
    assert!(dir.path().join("chapters/003.md").exists());
    assert!(!dir.path().join("materials/drafts/materials_pack.v002.json").exists());

    let meta = second.project_meta().await.unwrap().unwrap();
    assert_eq!(meta.last_completed_chapter, 3);
    assert_eq!(meta.idea, "a courier carries letters across a drowned city");
}

fn llm_settings(chapters: u32, target: u32) -> RunSettings {
    RunSettings {
        target_words: target,
        chapters,
        arc_every: 0,
        mode: GenerationMode::Llm,
        ..Default::default()
    }
}

async fn one_template_chapter(store: Arc<dyn ProjectStore>, trace: Arc<MemoryTrace>) {
    let pipeline = Pipeline::new(
        runtime(None, GenerationMode::Template, trace),
        store,
        settings(1),
        GateThresholds::default(),
    );
    pipeline.run(request(false)).await.unwrap();
}

fn credentials_then_json() -> Arc<dyn GenerationDriver> {
    Arc::new(
        MockDriver::new(vec![MockBehavior::Fail(GenerationErrorKind::MissingCredentials("no key".into()))])
            .then_always(MockBehavior::text(
                r#"{"decision":"accepted","issues":[],"summary":"Mara reached the pier."}"#,
            )),
    )
}

#[tokio::test]
async fn test_failed_chapter_is_recorded_and_run_moves_on() {
    let store: Arc<dyn ProjectStore> = Arc::new(InMemoryProjectStore::new("errors"));
    let trace = Arc::new(MemoryTrace::default());
    one_template_chapter(store.clone(), trace.clone()).await;

    let pipeline = Pipeline::new(
        runtime(Some(credentials_then_json()), GenerationMode::Llm, trace.clone()),
        store.clone(),
        llm_settings(3, 60),
        GateThresholds::default(),
    );
    let summary = pipeline.run(request(true)).await.unwrap();

    let written: Vec<u32> = summary.chapters.iter().map(|c| c.chapter_index).collect();
    assert_eq!(written, vec![3]);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].chapter_index, 2);
    assert_eq!(summary.errors[0].error_type, "AuthenticationError");

    let record: ChapterError =
        serde_json::from_value(store.read_json(&chapter_error_key(2)).await.unwrap().unwrap()).unwrap();
    assert_eq!(record, summary.errors[0]);
    assert!(store.read_text(&chapter_key(2)).await.unwrap().is_none());
    assert!(store.read_text(&chapter_key(3)).await.unwrap().is_some());
    assert_eq!(trace.events_named("chapter_error").len(), 1);

    // Chapter 2 never finished, so a resume starts there again.
    let meta = pipeline.project_meta().await.unwrap().unwrap();
    assert_eq!(meta.last_completed_chapter, 1);
}

#[tokio::test]
async fn test_stop_on_error_aborts_the_run() {
    let store: Arc<dyn ProjectStore> = Arc::new(InMemoryProjectStore::new("stop"));
    let trace = Arc::new(MemoryTrace::default());
    one_template_chapter(store.clone(), trace.clone()).await;

    let pipeline = Pipeline::new(
        runtime(Some(credentials_then_json()), GenerationMode::Llm, trace.clone()),
        store.clone(),
        RunSettings {
            stop_on_error: true,
            ..llm_settings(3, 60)
        },
        GateThresholds::default(),
    );
    let err = pipeline.run(request(true)).await.unwrap_err();

    assert_eq!(err.type_name(), "AuthenticationError");
    assert!(store.read_json(&chapter_error_key(2)).await.unwrap().is_none());
    assert!(store.read_text(&chapter_key(3)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_restate_audits_and_rewrites_existing_chapter() {
    let original = "Mara rowed past the drowned bell tower before dusk.";
    let rewrite = "Mara rowed past the flooded bell tower at dusk, alone.";
    let store: Arc<dyn ProjectStore> = Arc::new(InMemoryProjectStore::new("restate"));
    let trace = Arc::new(MemoryTrace::default());

    let planner = Pipeline::new(
        runtime(None, GenerationMode::Template, trace.clone()),
        store.clone(),
        RunSettings {
            target_words: 50,
            ..settings(1)
        },
        GateThresholds::default(),
    );
    assert!(planner.plan("a courier in a drowned city").await.unwrap().frozen);
    store.write_text(&chapter_key(1), original).await.unwrap();

    let audit = r#"{"decision":"rejected","issues":[
        {"quote":"drowned bell tower","issue":"flat image","fix":"show the water","action":"rewrite"},
        {"quote":"before dusk","issue":"vague time","fix":"pin the hour","action":"rewrite"},
        {"quote":"Mara rowed","issue":"no stakes","fix":"say why she rows","action":"rewrite"}]}"#;
    let driver = Arc::new(
        MockDriver::new(vec![
            MockBehavior::text(audit),
            MockBehavior::text(rewrite),
            MockBehavior::text(r#"{"decision":"accepted","issues":[]}"#),
        ])
        .then_always(MockBehavior::text(r#"{"summary":"Mara rows past the bell tower."}"#)),
    );
    let shared: Arc<dyn GenerationDriver> = driver.clone();
    let pipeline = Pipeline::new(
        runtime(Some(shared), GenerationMode::Llm, trace.clone()),
        store.clone(),
        RunSettings {
            advisor: true,
            ..llm_settings(1, 50)
        },
        GateThresholds::default(),
    );

    let summary = pipeline
        .restate(RestateRequest {
            max_reviews: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.materials_version, "v001");
    assert!(summary.errors.is_empty());
    assert_eq!(summary.chapters.len(), 1);
    let outcome = &summary.chapters[0];
    assert_eq!(outcome.decision, Decision::Accepted);
    assert_eq!(outcome.writer_versions, 2);
    assert!(outcome.advisor.is_some());

    let first = store.read_json(&restate_review_key(1, 1)).await.unwrap().unwrap();
    assert_eq!(first["decision"], "rejected");
    assert_eq!(first["policy"]["force_reject_with_issues"], true);
    let second = store.read_json(&restate_review_key(1, 2)).await.unwrap().unwrap();
    assert_eq!(second["decision"], "accepted");
    assert_eq!(second["policy"]["force_reject_with_issues"], false);

    assert_eq!(store.read_text(&restate_draft_key(1, 1)).await.unwrap().unwrap(), original);
    assert_eq!(store.read_text(&restate_draft_key(1, 2)).await.unwrap().unwrap(), rewrite);
    assert_eq!(store.read_text(&chapter_key(1)).await.unwrap().unwrap(), rewrite);
    assert!(store.read_json(&review_key(1, 1)).await.unwrap().is_none());

    let report = store.read_json(&advisor_key(1)).await.unwrap().unwrap();
    assert_eq!(report["materials_version"], "v001");
    assert_eq!(report["editor_decision"], "accepted");
    assert_eq!(trace.events_named("advisor_audit").len(), 1);
    // audit, rewrite, review, memory
    assert_eq!(driver.calls(), 4);
}

#[tokio::test]
async fn test_restate_needs_two_reviews_and_a_pack() {
    let store: Arc<dyn ProjectStore> = Arc::new(InMemoryProjectStore::new("bare"));
    let pipeline = Pipeline::new(
        runtime(None, GenerationMode::Template, Arc::new(MemoryTrace::default())),
        store.clone(),
        settings(1),
        GateThresholds::default(),
    );

    let one = RestateRequest {
        max_reviews: 1,
        ..Default::default()
    };
    assert_eq!(pipeline.restate(one).await.unwrap_err().type_name(), "ConfigError");
    assert!(pipeline.restate(RestateRequest::default()).await.is_err());
}
