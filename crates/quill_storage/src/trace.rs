//! JSONL run trace with sidecar files for large fields.

use crate::text::{safe_filename, truncate};
use quill_error::{QuillResult, StorageError, StorageErrorKind};
use quill_interface::{TraceRecord, TraceSink};
use serde_json::{Map, Value, json};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Characters kept inline as a preview when a field is offloaded.
const PREVIEW_CHARS: usize = 300;

/// Append-only JSONL trace.
///
/// Each event becomes one line `{"ts", "event", ...fields}`. A top-level field
/// whose rendering exceeds `inline_chars` is written to
/// `sidecar/<seq>_<event>_<field>.txt` next to the log and replaced by
/// `{"preview", "sidecar", "chars"}`.
#[derive(Debug)]
pub struct JsonlTraceSink {
    log_path: PathBuf,
    sidecar_dir: PathBuf,
    inline_chars: usize,
    seq: AtomicU64,
    file: Mutex<File>,
}

impl JsonlTraceSink {
    /// Opens `<dir>/run_<timestamp>.jsonl` for appending.
    ///
    /// # Errors
    ///
    /// Returns error if the log directory or file cannot be created.
    #[tracing::instrument(skip(dir))]
    pub fn create(dir: impl AsRef<Path>, inline_chars: usize) -> QuillResult<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Self::open(dir.as_ref().join(format!("run_{}.jsonl", stamp)), inline_chars)
    }

    /// Opens an explicit log file for appending.
    ///
    /// # Errors
    ///
    /// Returns error if the log directory or file cannot be created.
    pub fn open(log_path: impl Into<PathBuf>, inline_chars: usize) -> QuillResult<Self> {
        let log_path = log_path.into();
        let dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                dir.display(),
                e
            )))
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                StorageError::new(StorageErrorKind::FileWrite(format!(
                    "{}: {}",
                    log_path.display(),
                    e
                )))
            })?;

        tracing::info!(path = %log_path.display(), "Opened run trace");
        Ok(Self {
            sidecar_dir: dir.join("sidecar"),
            log_path,
            inline_chars,
            seq: AtomicU64::new(0),
            file: Mutex::new(file),
        })
    }

    /// Path of the JSONL file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Replaces oversized fields with sidecar pointers.
    fn offload(&self, seq: u64, event: &str, fields: Map<String, Value>) -> Map<String, Value> {
        fields
            .into_iter()
            .map(|(name, value)| {
                let rendered = match &value {
                    Value::String(s) => Some((s.clone(), "txt")),
                    Value::Array(_) | Value::Object(_) => Some((
                        serde_json::to_string_pretty(&value).unwrap_or_default(),
                        "json",
                    )),
                    _ => None,
                };
                let Some((text, ext)) = rendered else {
                    return (name, value);
                };
                let chars = text.chars().count();
                if chars <= self.inline_chars {
                    return (name, value);
                }
                match self.write_sidecar(seq, event, &name, ext, &text) {
                    Some(relative) => {
                        let pointer = json!({
                            "preview": truncate(&text, PREVIEW_CHARS),
                            "sidecar": relative,
                            "chars": chars,
                        });
                        (name, pointer)
                    }
                    None => (name, Value::String(truncate(&text, self.inline_chars))),
                }
            })
            .collect()
    }

    fn write_sidecar(
        &self,
        seq: u64,
        event: &str,
        field: &str,
        ext: &str,
        text: &str,
    ) -> Option<String> {
        let file_name = format!(
            "{:06}_{}_{}.{}",
            seq,
            safe_filename(event, "event"),
            safe_filename(field, "field"),
            ext
        );
        let path = self.sidecar_dir.join(&file_name);
        let result = std::fs::create_dir_all(&self.sidecar_dir)
            .and_then(|_| std::fs::write(&path, text));
        match result {
            Ok(()) => Some(format!("sidecar/{}", file_name)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write trace sidecar");
                None
            }
        }
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: &str, fields: Map<String, Value>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TraceRecord::now(event, self.offload(seq, event, fields));
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(event, error = %e, "Failed to serialise trace event");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!(event, error = %e, "Failed to append trace event");
        }
    }
}

/// Reads a JSONL trace back, skipping unparsable lines.
///
/// # Errors
///
/// Returns error if the file cannot be read.
pub fn load_events(path: impl AsRef<Path>) -> QuillResult<Vec<TraceRecord>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        StorageError::new(StorageErrorKind::FileRead(format!("{}: {}", path.display(), e)))
    })?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
