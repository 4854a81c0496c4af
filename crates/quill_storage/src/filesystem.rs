//! Filesystem-backed project store.

use async_trait::async_trait;
use quill_error::{QuillResult, StorageError, StorageErrorKind};
use quill_interface::ProjectStore;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Project store rooted at one directory.
///
/// Keys map to relative paths under the root. Writes go to a temp file and are
/// renamed into place, so readers never observe a half-written document. The
/// store assumes a single writer per project directory.
#[derive(Debug, Clone)]
pub struct FileProjectStore {
    root: PathBuf,
}

impl FileProjectStore {
    /// Opens (creating if needed) a project directory.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    #[tracing::instrument(skip(root))]
    pub fn new(root: impl Into<PathBuf>) -> QuillResult<Self> {
        let root = root.into();

        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                root.display(),
                e
            )))
        })?;

        tracing::info!(path = %root.display(), "Opened project store");
        Ok(Self { root })
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to a path, rejecting keys that escape the root.
    fn resolve(&self, key: &str) -> QuillResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StorageError::new(StorageErrorKind::InvalidKey(key.to_string())).into());
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(path: &Path) -> QuillResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                    "{}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }
        Ok(())
    }

    async fn read_string(&self, key: &str) -> QuillResult<Option<String>> {
        let path = self.resolve(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                path.display(),
                e
            )))
            .into()),
        }
    }

    async fn replace(&self, key: &str, contents: &str) -> QuillResult<()> {
        let path = self.resolve(key)?;
        Self::ensure_parent(&path).await?;

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, contents).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                temp_path.display(),
                e
            )))
        })?;

        tokio::fs::rename(&temp_path, &path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )))
        })?;

        tracing::debug!(path = %path.display(), bytes = contents.len(), "Wrote project file");
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    #[tracing::instrument(skip(self))]
    async fn read_json(&self, key: &str) -> QuillResult<Option<Value>> {
        let Some(text) = self.read_string(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text).map(Some).map_err(|e| {
            StorageError::new(StorageErrorKind::Decode {
                key: key.to_string(),
                message: e.to_string(),
            })
            .into()
        })
    }

    #[tracing::instrument(skip(self, value))]
    async fn write_json(&self, key: &str, value: &Value) -> QuillResult<()> {
        let text = serde_json::to_string_pretty(value).map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!("{}: {}", key, e)))
        })?;
        self.replace(key, &text).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_text(&self, key: &str) -> QuillResult<Option<String>> {
        self.read_string(key).await
    }

    #[tracing::instrument(skip(self, text), fields(chars = text.len()))]
    async fn write_text(&self, key: &str, text: &str) -> QuillResult<()> {
        self.replace(key, text).await
    }

    #[tracing::instrument(skip(self, text), fields(chars = text.len()))]
    async fn append_text(&self, key: &str, text: &str) -> QuillResult<()> {
        let path = self.resolve(key)?;
        Self::ensure_parent(&path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                StorageError::new(StorageErrorKind::FileWrite(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            })?;
        file.write_all(text.as_bytes()).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;
        file.flush().await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, prefix: &str) -> QuillResult<Vec<String>> {
        let dir = self.resolve(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )))
                .into());
            }
        };

        let mut names = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| {
                StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )))
            })?;
            let Some(entry) = entry else { break };
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}
