//! Filesystem store and trace sink behaviour.

use quill_interface::{ProjectStore, TraceSink, trace_fields};
use quill_storage::{FileProjectStore, InMemoryProjectStore, JsonlTraceSink, load_events};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_json_roundtrip_and_missing_keys() {
    let dir = TempDir::new().unwrap();
    let store = FileProjectStore::new(dir.path().join("proj")).unwrap();

    assert!(store.read_json("canon/world.json").await.unwrap().is_none());

    let world = json!({"rules": [{"name": "tides", "detail": "obey the moon"}]});
    store.write_json("canon/world.json", &world).await.unwrap();
    assert_eq!(store.read_json("canon/world.json").await.unwrap(), Some(world));
    assert!(dir.path().join("proj/canon/world.json").exists());
    assert!(!dir.path().join("proj/canon/world.tmp").exists());
}

#[tokio::test]
async fn test_append_and_list() {
    let dir = TempDir::new().unwrap();
    let store = FileProjectStore::new(dir.path()).unwrap();

    store.append_text("canon/style.md", "- a\n").await.unwrap();
    store.append_text("canon/style.md", "- b\n").await.unwrap();
    store.write_text("canon/notes.md", "x").await.unwrap();

    assert_eq!(
        store.read_text("canon/style.md").await.unwrap().as_deref(),
        Some("- a\n- b\n")
    );
    assert_eq!(
        store.list("canon").await.unwrap(),
        vec!["notes.md".to_string(), "style.md".to_string()]
    );
    assert!(store.list("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keys_cannot_escape_root() {
    let dir = TempDir::new().unwrap();
    let store = FileProjectStore::new(dir.path()).unwrap();
    assert!(store.write_text("../escape.txt", "x").await.is_err());
    assert!(store.write_text("/abs.txt", "x").await.is_err());

    let memory = InMemoryProjectStore::new("t");
    assert!(memory.write_text("../escape.txt", "x").await.is_err());
}

#[tokio::test]
async fn test_corrupt_json_is_a_decode_error() {
    let dir = TempDir::new().unwrap();
    let store = FileProjectStore::new(dir.path()).unwrap();
    store.write_text("bad.json", "{not json").await.unwrap();
    let err = store.read_json("bad.json").await.unwrap_err();
    assert!(err.to_string().contains("bad.json"));
}

#[tokio::test]
async fn test_memory_store_lists_direct_children_only() {
    let store = InMemoryProjectStore::new("t");
    store.write_json("memory/chapters/001.memory.json", &json!({})).await.unwrap();
    store.write_json("memory/arcs/arc_001-002.json", &json!({})).await.unwrap();
    assert_eq!(
        store.list("memory/chapters").await.unwrap(),
        vec!["001.memory.json".to_string()]
    );
    assert!(store.list("memory").await.unwrap().is_empty());
}

#[test]
fn test_trace_offloads_large_fields() {
    let dir = TempDir::new().unwrap();
    let sink = JsonlTraceSink::open(dir.path().join("logs/run.jsonl"), 100).unwrap();

    let big = "x".repeat(500);
    sink.record("llm_ok", trace_fields(json!({"node": "writer", "content": big})));
    sink.record("node_end", trace_fields(json!({"node": "writer"})));

    let events = load_events(sink.log_path()).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event, "llm_ok");
    assert_eq!(events[0].fields["node"], "writer");

    let pointer = &events[0].fields["content"];
    assert_eq!(pointer["chars"], 500);
    let sidecar = pointer["sidecar"].as_str().unwrap();
    let stored = std::fs::read_to_string(dir.path().join("logs").join(sidecar)).unwrap();
    assert_eq!(stored, big);
    assert!(pointer["preview"].as_str().unwrap().contains("...[truncated]..."));
}
