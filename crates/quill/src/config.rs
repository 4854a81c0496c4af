//! Layered configuration.
//!
//! Sources in order of precedence (later sources override earlier):
//! 1. Bundled defaults (`quill.toml` shipped with the binary)
//! 2. User config in the home directory (`~/.config/quill/quill.toml`)
//! 3. `./quill.toml`, or the file given with `--config`
//! 4. `QUILL__SECTION__KEY` environment variables, then the conventional
//!    `LLM_*` variables
//!
//! CLI flags are applied by the caller on the loaded [`QuillConfig`].

use config::{Config, Environment, File, FileFormat};
use quill_error::{ConfigError, QuillResult};
use quill_models::LlmConfig;
use quill_narrative::{DEFAULT_MAX_FIX_CHARS, GateThresholds, GenerationMode, RunSettings};
use quill_retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const DEFAULT_CONFIG: &str = include_str!("../quill.toml");

/// Conventional variable names and the keys they set.
const LLM_ENV: [(&str, &str); 6] = [
    ("LLM_BASE_URL", "llm.base_url"),
    ("LLM_API_KEY", "llm.api_key"),
    ("LLM_MODEL", "llm.model"),
    ("LLM_TEMPERATURE", "llm.temperature"),
    ("LLM_MAX_TOKENS", "llm.max_tokens"),
    ("LLM_TIMEOUT", "llm.timeout_secs"),
];

/// `[run]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Directory that holds `projects/<name>`
    pub output_base: String,
    /// Generation mode
    pub mode: GenerationMode,
    /// Target chapter length in characters
    pub target_words: u32,
    /// Chapters to write
    pub chapters: u32,
    /// Rewrites allowed after the first draft
    pub max_rewrites: u32,
    /// Lower length bound as a fraction of the target
    pub writer_min_ratio: f64,
    /// Upper length bound as a fraction of the target
    pub writer_max_ratio: f64,
    /// Chapters per arc summary, 0 disables
    pub arc_every: u32,
    /// Absorb memories of rejected chapters too
    pub allow_unapproved_canon_updates: bool,
    /// Abort on the first failing chapter
    pub stop_on_error: bool,
    /// Write an advisor report for every finished chapter
    pub advisor: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        let settings = RunSettings::default();
        Self {
            output_base: "outputs".to_string(),
            mode: settings.mode,
            target_words: settings.target_words,
            chapters: settings.chapters,
            max_rewrites: settings.max_rewrites,
            writer_min_ratio: settings.writer_min_ratio,
            writer_max_ratio: settings.writer_max_ratio,
            arc_every: settings.arc_every,
            allow_unapproved_canon_updates: settings.allow_unapproved_canon_updates,
            stop_on_error: settings.stop_on_error,
            advisor: settings.advisor,
        }
    }
}

impl RunSection {
    /// Pipeline settings, clamped into range.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            target_words: self.target_words,
            chapters: self.chapters,
            max_rewrites: self.max_rewrites,
            writer_min_ratio: self.writer_min_ratio,
            writer_max_ratio: self.writer_max_ratio,
            arc_every: self.arc_every,
            allow_unapproved_canon_updates: self.allow_unapproved_canon_updates,
            mode: self.mode,
            stop_on_error: self.stop_on_error,
            advisor: self.advisor,
        }
        .normalized()
    }
}

/// `[repair]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSection {
    /// Raw-output characters quoted in a repair prompt
    pub max_fix_chars: usize,
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            max_fix_chars: DEFAULT_MAX_FIX_CHARS,
        }
    }
}

/// Diagnostic log format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    #[display("text")]
    Text,
    /// One JSON object per line
    #[display("json")]
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Diagnostic log format
    pub format: LogFormat,
    /// Trace string fields longer than this go to sidecar files
    pub inline_chars: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            inline_chars: 2000,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    /// Run settings
    pub run: RunSection,
    /// Generation endpoint
    pub llm: LlmConfig,
    /// Retry discipline
    pub retry: RetryPolicy,
    /// Schema-repair loop
    pub repair: RepairSection,
    /// Editor gate thresholds
    pub gate: GateThresholds,
    /// Diagnostic logging and the run trace
    pub logging: LoggingSection,
}

impl QuillConfig {
    /// Loads the standard layers, with `explicit` replacing `./quill.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file is missing or any layer fails to parse.
    pub fn load(explicit: Option<&Path>) -> QuillResult<Self> {
        ConfigLoader::standard(explicit).load()
    }
}

/// Assembles configuration layers.
///
/// Environment variables are read from an explicit map so that loading is
/// reproducible in tests; [`ConfigLoader::standard`] captures the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    files: Vec<(PathBuf, bool)>,
    env: config::Map<String, String>,
}

impl ConfigLoader {
    /// Bundled defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Home config, `./quill.toml` or `explicit`, and the process environment
    /// (after loading `.env`).
    pub fn standard(explicit: Option<&Path>) -> Self {
        dotenvy::dotenv().ok();

        let mut loader = Self::new();
        if let Some(home) = dirs::home_dir() {
            loader = loader.file(home.join(".config/quill/quill.toml"), false);
        }
        loader = match explicit {
            Some(path) => loader.file(path, true),
            None => loader.file("quill.toml", false),
        };
        loader.env(std::env::vars())
    }

    /// Adds a TOML file layer.
    pub fn file(mut self, path: impl Into<PathBuf>, required: bool) -> Self {
        self.files.push((path.into(), required));
        self
    }

    /// Replaces the environment the loader reads.
    pub fn env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = vars.into_iter().collect();
        self
    }

    /// Builds and deserializes every layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file is missing or any layer fails to parse.
    #[instrument(skip(self), fields(files = self.files.len()))]
    pub fn load(&self) -> QuillResult<QuillConfig> {
        debug!("Loading configuration");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        for (path, required) in &self.files {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(*required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("QUILL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(self.env.clone())),
        );

        for (var, key) in LLM_ENV {
            let value = self
                .env
                .get(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value).map_err(|e| {
                ConfigError::new(format!("Failed to apply {}: {}", var, e))
            })?;
        }

        let config: QuillConfig = builder
            .build()
            .map_err(|e| ConfigError::new(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| ConfigError::new(format!("Failed to parse configuration: {}", e)))?;

        debug!(mode = %config.run.mode, llm = config.llm.is_usable(), "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_defaults_match_code_defaults() {
        let loaded = ConfigLoader::new().load().unwrap();
        assert_eq!(loaded.run, RunSection::default());
        assert_eq!(loaded.retry, RetryPolicy::default());
        assert_eq!(loaded.gate, GateThresholds::default());
        assert_eq!(loaded.repair, RepairSection::default());
        assert_eq!(loaded.logging, LoggingSection::default());
        assert!(!loaded.llm.is_usable());
    }

    #[test]
    fn test_run_section_clamps() {
        let section = RunSection {
            target_words: 3,
            chapters: 0,
            ..Default::default()
        };
        let settings = section.settings();
        assert_eq!(settings.target_words, 50);
        assert_eq!(settings.chapters, 1);
    }
}
