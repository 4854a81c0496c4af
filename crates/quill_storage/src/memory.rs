//! In-memory project store.

use async_trait::async_trait;
use quill_error::{QuillResult, StorageError, StorageErrorKind};
use quill_interface::ProjectStore;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Project store kept entirely in memory.
///
/// Same contract as [`crate::FileProjectStore`], including JSON round-tripping
/// through text, so tests exercise the same decode paths.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    label: String,
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemoryProjectStore {
    /// Creates an empty store with a display label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every stored key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    fn check_key(key: &str) -> QuillResult<()> {
        if key.trim().is_empty() || key.starts_with('/') || key.split('/').any(|p| p == "..") {
            return Err(StorageError::new(StorageErrorKind::InvalidKey(key.to_string())).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn read_json(&self, key: &str) -> QuillResult<Option<Value>> {
        Self::check_key(key)?;
        let files = self.files.read().await;
        let Some(text) = files.get(key) else {
            return Ok(None);
        };
        serde_json::from_str(text).map(Some).map_err(|e| {
            StorageError::new(StorageErrorKind::Decode {
                key: key.to_string(),
                message: e.to_string(),
            })
            .into()
        })
    }

    async fn write_json(&self, key: &str, value: &Value) -> QuillResult<()> {
        Self::check_key(key)?;
        let text = serde_json::to_string_pretty(value).map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!("{}: {}", key, e)))
        })?;
        self.files.write().await.insert(key.to_string(), text);
        Ok(())
    }

    async fn read_text(&self, key: &str) -> QuillResult<Option<String>> {
        Self::check_key(key)?;
        Ok(self.files.read().await.get(key).cloned())
    }

    async fn write_text(&self, key: &str, text: &str) -> QuillResult<()> {
        Self::check_key(key)?;
        self.files
            .write()
            .await
            .insert(key.to_string(), text.to_string());
        Ok(())
    }

    async fn append_text(&self, key: &str, text: &str) -> QuillResult<()> {
        Self::check_key(key)?;
        self.files
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> QuillResult<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .files
            .read()
            .await
            .keys()
            .filter_map(|k| k.strip_prefix(&dir))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn location(&self) -> String {
        format!("memory:{}", self.label)
    }
}
