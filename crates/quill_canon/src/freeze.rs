//! Versioned materials packs: drafts, the freeze gate, frozen snapshots.

use crate::{AnchorIndex, DodReport, build_anchors, count_open_question_blockers, validate_materials_pack};
use quill_core::MaterialsPack;
use quill_error::{
    ConsistencyError, ConsistencyErrorKind, JsonError, QuillResult, StorageError, StorageErrorKind,
};
use quill_interface::{ProjectStore, TraceSink, trace_fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const INDEX_KEY: &str = "materials/index.json";
const DRAFTS: &str = "materials/drafts";
const FROZEN: &str = "materials/frozen";
const ANCHORS: &str = "materials/anchors";
const REVIEWS: &str = "materials/reviews";

/// `materials/index.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialsIndex {
    /// Version of the current frozen pack, empty before the first freeze
    #[serde(default)]
    pub current_frozen_version: String,
    /// RFC 3339 time of the last index change
    #[serde(default)]
    pub updated_at: String,
}

/// Result of a successful freeze.
#[derive(Debug, Clone, PartialEq)]
pub struct FreezeOutcome {
    /// Frozen version label
    pub version: String,
    /// DoD report the freeze passed
    pub dod: DodReport,
    /// Anchors built for the frozen pack
    pub anchors: AnchorIndex,
}

/// A frozen pack with its anchors.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenPack {
    /// Version label
    pub version: String,
    /// The pack
    pub pack: MaterialsPack,
    /// Anchor index
    pub anchors: AnchorIndex,
}

fn version_label(n: u32) -> String {
    format!("v{:03}", n)
}

/// Extracts `NNN` from any `.vNNN.` segment of a file name.
fn version_number(file_name: &str) -> Option<u32> {
    file_name
        .split('.')
        .filter_map(|part| part.strip_prefix('v'))
        .find(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

fn draft_key(version: &str) -> String {
    format!("{}/materials_pack.{}.json", DRAFTS, version)
}

fn frozen_key(version: &str) -> String {
    format!("{}/materials_pack.frozen.{}.json", FROZEN, version)
}

fn anchors_key(version: &str) -> String {
    format!("{}/anchors.{}.json", ANCHORS, version)
}

fn dod_key(version: &str) -> String {
    format!("{}/dod.{}.json", REVIEWS, version)
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> QuillResult<T> {
    serde_json::from_value(value).map_err(|e| {
        StorageError::new(StorageErrorKind::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
        .into()
    })
}

fn encode<T: Serialize>(value: &T) -> QuillResult<Value> {
    serde_json::to_value(value).map_err(|e| JsonError::new(e.to_string()).into())
}

/// Draft/frozen registry for one project's materials packs.
///
/// Drafts are append-only (`vNNN` increases); freezing copies a draft into
/// `frozen/` with its anchors, records the DoD report under `reviews/`, and
/// only then moves `current_frozen_version` in the index.
pub struct MaterialsRegistry {
    store: Arc<dyn ProjectStore>,
    trace: Arc<dyn TraceSink>,
}

impl MaterialsRegistry {
    /// Creates a registry over a project store.
    pub fn new(store: Arc<dyn ProjectStore>, trace: Arc<dyn TraceSink>) -> Self {
        Self { store, trace }
    }

    /// Reads the index, defaulting when absent.
    pub async fn index(&self) -> QuillResult<MaterialsIndex> {
        match self.store.read_json(INDEX_KEY).await? {
            Some(value) => decode(INDEX_KEY, value),
            None => Ok(MaterialsIndex::default()),
        }
    }

    async fn latest_draft_number(&self) -> QuillResult<Option<u32>> {
        let names = self.store.list(DRAFTS).await?;
        Ok(names
            .iter()
            .filter(|n| n.starts_with("materials_pack."))
            .filter_map(|n| version_number(n))
            .max())
    }

    /// Highest draft version present, if any.
    pub async fn latest_draft_version(&self) -> QuillResult<Option<String>> {
        Ok(self.latest_draft_number().await?.map(version_label))
    }

    /// Saves `pack` as the next draft version and returns the label.
    ///
    /// `meta.version` is overwritten with the assigned label; `meta.created_at`
    /// is stamped when empty.
    #[instrument(skip(self, pack), fields(project = %self.store.location()))]
    pub async fn save_draft(&self, pack: &MaterialsPack) -> QuillResult<String> {
        let version = version_label(self.latest_draft_number().await?.unwrap_or(0) + 1);

        let mut pack = pack.clone();
        pack.meta.version = version.clone();
        if pack.meta.created_at.is_empty() {
            pack.meta.created_at = chrono::Utc::now().to_rfc3339();
        }
        if pack.meta.project_dir.is_empty() {
            pack.meta.project_dir = self.store.location();
        }
        self.store.write_json(&draft_key(&version), &encode(&pack)?).await?;
        info!(version = %version, "Saved materials draft");
        Ok(version)
    }

    /// Loads a draft as raw JSON.
    pub async fn load_draft(&self, version: &str) -> QuillResult<Value> {
        self.store
            .read_json(&draft_key(version))
            .await?
            .ok_or_else(|| ConsistencyError::new(ConsistencyErrorKind::UnknownVersion(version.to_string())).into())
    }

    /// Runs the DoD check on a draft without freezing it.
    pub async fn check(&self, version: &str) -> QuillResult<DodReport> {
        Ok(validate_materials_pack(&self.load_draft(version).await?))
    }

    /// Freezes a draft (the latest when `version` is `None`).
    ///
    /// The DoD report is always written to `reviews/dod.vNNN.json`. Blocking
    /// open questions fail with [`ConsistencyErrorKind::FreezeBlocked`], any
    /// other DoD failure with [`ConsistencyErrorKind::DodFailed`]; in both cases
    /// the index is left untouched.
    #[instrument(skip(self), fields(project = %self.store.location()))]
    pub async fn freeze(&self, version: Option<&str>) -> QuillResult<FreezeOutcome> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self
                .latest_draft_version()
                .await?
                .ok_or_else(|| ConsistencyError::new(ConsistencyErrorKind::UnknownVersion("(no drafts)".into())))?,
        };
        let mut pack = self.load_draft(&version).await?;

        let dod = validate_materials_pack(&pack);
        self.store.write_json(&dod_key(&version), &encode(&dod)?).await?;

        let blockers = count_open_question_blockers(&pack);
        if blockers > 0 {
            warn!(version = %version, blockers, "Freeze blocked by open questions");
            self.trace.record(
                "freeze_blocked",
                trace_fields(json!({"version": version, "blockers": blockers, "dod": dod.one_line()})),
            );
            return Err(ConsistencyError::new(ConsistencyErrorKind::FreezeBlocked { blockers }).into());
        }
        if !dod.ok {
            warn!(version = %version, dod = %dod.one_line(), "Freeze blocked by DoD");
            self.trace.record(
                "freeze_blocked",
                trace_fields(json!({"version": version, "blockers": 0, "dod": dod.one_line()})),
            );
            return Err(ConsistencyError::new(ConsistencyErrorKind::DodFailed { summary: dod.one_line() }).into());
        }

        let now = chrono::Utc::now().to_rfc3339();
        if let Some(meta) = pack.get_mut("meta").and_then(Value::as_object_mut) {
            meta.insert("frozen_at".into(), Value::String(now.clone()));
            meta.insert("frozen_version".into(), Value::String(version.clone()));
        }
        let anchors = build_anchors(&mut pack);

        self.store.write_json(&frozen_key(&version), &pack).await?;
        self.store.write_json(&anchors_key(&version), &encode(&anchors)?).await?;
        let index = MaterialsIndex {
            current_frozen_version: version.clone(),
            updated_at: now,
        };
        self.store.write_json(INDEX_KEY, &encode(&index)?).await?;

        info!(version = %version, anchors = anchors.len(), "Froze materials pack");
        self.trace.record(
            "materials_frozen",
            trace_fields(json!({"version": version, "anchors": anchors.len(), "dod": dod.one_line()})),
        );
        Ok(FreezeOutcome { version, dod, anchors })
    }

    /// Loads a frozen version with its anchors.
    pub async fn load_frozen(&self, version: &str) -> QuillResult<FrozenPack> {
        let key = frozen_key(version);
        let pack = self
            .store
            .read_json(&key)
            .await?
            .ok_or_else(|| ConsistencyError::new(ConsistencyErrorKind::UnknownVersion(version.to_string())))?;
        let anchors = match self.store.read_json(&anchors_key(version)).await? {
            Some(value) => decode(&anchors_key(version), value)?,
            None => AnchorIndex::default(),
        };
        Ok(FrozenPack {
            version: version.to_string(),
            pack: decode(&key, pack)?,
            anchors,
        })
    }

    /// Loads the pack the index points at.
    pub async fn load_current_frozen(&self) -> QuillResult<FrozenPack> {
        let index = self.index().await?;
        if index.current_frozen_version.trim().is_empty() {
            return Err(ConsistencyError::new(ConsistencyErrorKind::NoFrozenPack).into());
        }
        self.load_frozen(&index.current_frozen_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_number_parsing() {
        assert_eq!(version_number("materials_pack.v007.json"), Some(7));
        assert_eq!(version_number("materials_pack.frozen.v012.json"), Some(12));
        assert_eq!(version_number("materials_pack.json"), None);
        assert_eq!(version_number("materials_pack.vx1.json"), None);
        assert_eq!(version_label(3), "v003");
    }
}
