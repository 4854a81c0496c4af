//! Text helpers shared by storage and trace code.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("Valid filename regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Valid whitespace regex"));

const TRUNCATION_MARKER: &str = "\n...[truncated]...\n";
const TAIL_CHARS: usize = 50;
const MAX_FILENAME_CHARS: usize = 80;

/// Shortens `text` to roughly `max_chars`, keeping the head and a 50-char tail.
///
/// # Examples
///
/// ```
/// use quill_storage::truncate;
///
/// assert_eq!(truncate("short", 100), "short");
/// let long = "a".repeat(200) + &"z".repeat(50);
/// let cut = truncate(&long, 120);
/// assert!(cut.starts_with(&"a".repeat(70)));
/// assert!(cut.contains("...[truncated]..."));
/// assert!(cut.ends_with(&"z".repeat(50)));
/// ```
pub fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_len = max_chars.saturating_sub(TAIL_CHARS);
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - TAIL_CHARS.min(total)).collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// Makes `name` safe as a file or directory name.
///
/// Replaces characters illegal on common filesystems with `_`, collapses
/// whitespace and caps the length at 80 characters.
///
/// # Examples
///
/// ```
/// use quill_storage::safe_filename;
///
/// assert_eq!(safe_filename("The  Salt: Road?", "story"), "The Salt_ Road_");
/// assert_eq!(safe_filename("   ", "story"), "story");
/// ```
pub fn safe_filename(name: &str, fallback: &str) -> String {
    let trimmed = name.trim();
    let name = if trimmed.is_empty() { fallback } else { trimmed };
    let name = ILLEGAL_CHARS.replace_all(name, "_");
    let name = WHITESPACE.replace_all(&name, " ");
    name.trim().chars().take(MAX_FILENAME_CHARS).collect()
}

/// Directory of a named project under the output base.
pub fn project_dir(output_base: &Path, project: &str) -> PathBuf {
    output_base
        .join("projects")
        .join(safe_filename(project, "story"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_boundary_safe() {
        let text = "章".repeat(300);
        let cut = truncate(&text, 100);
        assert!(cut.starts_with(&"章".repeat(50)));
        assert!(cut.ends_with(&"章".repeat(50)));
    }

    #[test]
    fn test_safe_filename_caps_length() {
        assert_eq!(safe_filename(&"x".repeat(200), "p").chars().count(), 80);
    }

    #[test]
    fn test_project_dir_layout() {
        let dir = project_dir(Path::new("outputs"), "a/b");
        assert_eq!(dir, PathBuf::from("outputs/projects/a_b"));
    }
}
