//! Canon files in a project store.

use crate::{AbsorbReport, absorb_memory, apply_canon_patch, merge_canon, merge_strict};
use quill_core::{CanonBundle, CanonPatch, CanonTarget, ChapterMemory, Characters, Timeline, World};
use quill_error::{ConsistencyError, ConsistencyErrorKind, JsonError, QuillResult};
use quill_interface::ProjectStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const WORLD_KEY: &str = "canon/world.json";
const CHARACTERS_KEY: &str = "canon/characters.json";
const TIMELINE_KEY: &str = "canon/timeline.json";
const STYLE_KEY: &str = "canon/style.md";

fn to_object<T: serde::Serialize>(value: &T) -> QuillResult<Value> {
    serde_json::to_value(value).map_err(|e| JsonError::new(e.to_string()).into())
}

/// Loads and saves `canon/{world,characters,timeline}.json` and `canon/style.md`.
///
/// Every write is a whole-file rewrite; the caller is the single writer for
/// the project.
#[derive(Clone)]
pub struct CanonStore {
    store: Arc<dyn ProjectStore>,
}

impl CanonStore {
    /// Wraps a project store.
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    /// Loads canon, normalising whatever shape the files have.
    pub async fn load(&self) -> QuillResult<CanonBundle> {
        let world = self.store.read_json(WORLD_KEY).await?.unwrap_or(Value::Null);
        let characters = self.store.read_json(CHARACTERS_KEY).await?.unwrap_or(Value::Null);
        let timeline = self.store.read_json(TIMELINE_KEY).await?.unwrap_or(Value::Null);
        let style = self.store.read_text(STYLE_KEY).await?.unwrap_or_default();
        Ok(CanonBundle {
            world: World::ensure(&world),
            characters: Characters::ensure(&characters),
            timeline: Timeline::ensure(&timeline),
            style,
        })
    }

    /// Rewrites all four canon files.
    #[instrument(skip_all, fields(project = %self.store.location()))]
    pub async fn save(&self, canon: &CanonBundle) -> QuillResult<()> {
        self.store.write_json(WORLD_KEY, &to_object(&canon.world)?).await?;
        self.store.write_json(CHARACTERS_KEY, &to_object(&canon.characters)?).await?;
        self.store.write_json(TIMELINE_KEY, &to_object(&canon.timeline)?).await?;
        self.store.write_text(STYLE_KEY, &canon.style).await?;
        debug!("Saved canon");
        Ok(())
    }

    /// Merges generated canon into the stored canon with keep-existing
    /// semantics and returns the result.
    pub async fn seed(&self, incoming: &CanonBundle) -> QuillResult<CanonBundle> {
        let existing = self.load().await?;
        let merged = merge_canon(&existing, incoming);
        if merged != existing {
            self.save(&merged).await?;
            info!("Seeded canon");
        }
        Ok(merged)
    }

    /// Imports top-level keys into one JSON canon file.
    ///
    /// With `strict`, a key whose stored value is non-empty and different fails
    /// with [`ConsistencyErrorKind::CanonOverwrite`] and nothing is written;
    /// otherwise existing values win silently.
    pub async fn import(&self, target: CanonTarget, incoming: &Map<String, Value>, strict: bool) -> QuillResult<()> {
        let key = match target {
            CanonTarget::World => WORLD_KEY,
            CanonTarget::Characters => CHARACTERS_KEY,
            CanonTarget::Timeline => TIMELINE_KEY,
            CanonTarget::Style => {
                return Err(ConsistencyError::new(ConsistencyErrorKind::PatchRejected(
                    "style.md is text, not an object".into(),
                ))
                .into());
            }
        };
        let existing = self
            .store
            .read_json(key)
            .await?
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        let scope = key.trim_start_matches("canon/").trim_end_matches(".json");
        let merged = if strict {
            merge_strict(&existing, incoming, scope)?
        } else {
            crate::merge_keep_existing(&existing, incoming)
        };
        self.store.write_json(key, &Value::Object(merged)).await
    }

    /// Absorbs one chapter memory, saving only when canon changed.
    #[instrument(skip_all, fields(chapter_index = memory.chapter_index))]
    pub async fn absorb(&self, memory: &ChapterMemory, allow_unapproved: bool) -> QuillResult<AbsorbReport> {
        let mut canon = self.load().await?;
        let report = absorb_memory(&mut canon, memory, allow_unapproved)?;
        if report.changed() {
            self.save(&canon).await?;
        }
        Ok(report)
    }

    /// Applies editor canon patches; returns how many changed canon.
    pub async fn apply_patches(&self, patches: &[CanonPatch], chapter_index: u32) -> QuillResult<usize> {
        if patches.is_empty() {
            return Ok(0);
        }
        let mut canon = self.load().await?;
        let mut changed = 0;
        for patch in patches {
            if apply_canon_patch(&mut canon, patch, chapter_index)? {
                changed += 1;
            }
        }
        if changed > 0 {
            self.save(&canon).await?;
        }
        Ok(changed)
    }
}
