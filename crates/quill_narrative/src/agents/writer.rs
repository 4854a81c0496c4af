//! Writer: chapter prose with length control.

use super::{AgentRuntime, GenerationMode};
use crate::gate::LengthBounds;
use crate::prompts::outline_entry;
use quill_core::{FinishReason, Message, OutlineChapter};
use quill_error::{GenerationError, GenerationErrorKind, QuillResult};
use quill_retry::CallSite;
use quill_storage::truncate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const MAX_CONTINUATIONS: usize = 2;
const MIN_CONTINUATION_CHARS: usize = 200;
const CONTINUATION_TAIL_CHARS: usize = 1200;
const FEEDBACK_CHARS: usize = 1600;
const PREVIOUS_DRAFT_CHARS: usize = 6000;

/// Everything the writer sees for one draft.
#[derive(Debug, Clone, Copy)]
pub struct WriterBrief<'a> {
    /// Chapter being written
    pub chapter_index: u32,
    /// Draft version this call produces (1-based)
    pub writer_version: u32,
    /// Outline entry
    pub outline: &'a OutlineChapter,
    /// Canon digest
    pub canon_digest: &'a str,
    /// Execution-layer digest
    pub materials_digest: &'a str,
    /// Summary of the previous chapter, empty for the first
    pub previous_summary: &'a str,
    /// Rewrite instructions from the last review
    pub feedback: &'a [String],
    /// Draft being rewritten
    pub previous_draft: Option<&'a str>,
    /// Target length in characters
    pub target_chars: u32,
    /// Length window
    pub bounds: LengthBounds,
    /// Name used by the template prose
    pub lead: &'a str,
}

/// A chapter draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Prose
    pub text: String,
    /// 1-based version
    pub writer_version: u32,
    /// True when the template produced the prose
    pub used_fallback: bool,
    /// Driver calls spent (first call, continuations, shortening)
    pub calls: u32,
}

impl Draft {
    /// Length in characters.
    pub fn chars(&self) -> usize {
        self.text.chars().count()
    }
}

fn chars(text: &str) -> usize {
    text.chars().count()
}

fn tail(text: &str, n: usize) -> String {
    let total = chars(text);
    text.chars().skip(total.saturating_sub(n)).collect()
}

/// Deterministic prose built from the outline entry, sized to the target and
/// capped at the window's upper bound.
pub fn template_prose(outline: &OutlineChapter, lead: &str, target_chars: u32, bounds: LengthBounds) -> String {
    let lead = if lead.trim().is_empty() { "The protagonist" } else { lead.trim() };
    let mut paragraphs = vec![format!(
        "{} woke before the light, already turning over what had to be done: {}.",
        lead,
        if outline.goal.is_empty() { "keep moving" } else { &outline.goal }
    )];
    if !outline.conflict.is_empty() {
        paragraphs.push(format!("Nothing about it would be easy; {}.", outline.conflict));
    }
    for beat in &outline.beats {
        paragraphs.push(format!("Then it was time to {}, and {} did not look away.", beat, lead));
    }
    const FILLER: [&str; 4] = [
        "The street smelled of rain and old smoke.",
        "Somewhere a door closed, and the silence after it felt deliberate.",
        "Every answer seemed to open two more questions.",
        "The light shifted on the walls while the argument went nowhere.",
    ];

    let target = (target_chars as usize).clamp(bounds.min_chars, bounds.max_chars.max(bounds.min_chars));
    let mut text = paragraphs.join("\n\n");
    let mut i = 0;
    while chars(&text) < target {
        text.push(' ');
        text.push_str(FILLER[i % FILLER.len()]);
        i += 1;
    }
    if !outline.ending_hook.is_empty() {
        text.push_str(&format!("\n\nBy nightfall only one thing was certain: {}.", outline.ending_hook));
    }
    if bounds.max_chars > 0 && chars(&text) > bounds.max_chars {
        text = text.chars().take(bounds.max_chars).collect::<String>().trim_end().to_string();
    }
    text
}

fn first_messages(brief: &WriterBrief<'_>) -> Vec<Message> {
    let mut user = format!(
        "{}\n\nExecution notes:\n{}\n\nCanon (ground truth):\n{}\n",
        outline_entry(brief.outline),
        brief.materials_digest,
        brief.canon_digest
    );
    if !brief.previous_summary.is_empty() {
        user.push_str(&format!("\nPrevious chapter:\n{}\n", brief.previous_summary));
    }
    if !brief.feedback.is_empty() {
        user.push_str(&format!(
            "\nRewrite instructions (highest priority, never against canon):\n{}\n",
            truncate(&brief.feedback.join("\n"), FEEDBACK_CHARS)
        ));
    }
    if let Some(previous) = brief.previous_draft {
        user.push_str(&format!(
            "\nDraft to revise:\n{}\n",
            truncate(previous, PREVIOUS_DRAFT_CHARS)
        ));
    }
    vec![
        Message::system(format!(
            "You are the writer of a serialized novel. Write chapter {} as prose only: no headings \
             about the task, no notes to the reader. Aim for about {} characters and stay between \
             {} and {}.",
            brief.chapter_index, brief.target_chars, brief.bounds.min_chars, brief.bounds.max_chars
        )),
        Message::user(user),
    ]
}

/// Writes one draft.
///
/// A truncated or short first answer gets up to two continuation calls; an
/// overlong result gets one shortening call. Continuations already contained
/// in the text are discarded.
///
/// # Errors
///
/// In `llm` mode, driver errors on any call (first draft, continuation or
/// shortening) and an empty first answer.
#[instrument(skip_all, fields(chapter = brief.chapter_index, version = brief.writer_version))]
pub async fn write_chapter(rt: &AgentRuntime, brief: WriterBrief<'_>) -> QuillResult<Draft> {
    let template = || Draft {
        text: template_prose(brief.outline, brief.lead, brief.target_chars, brief.bounds),
        writer_version: brief.writer_version,
        used_fallback: true,
        calls: 0,
    };
    let site = CallSite::new("writer".to_string(), brief.chapter_index);

    let Some(first) = rt.prose(first_messages(&brief), &site).await? else {
        return Ok(template());
    };
    let mut calls = 1;
    let mut text = first.text.trim().to_string();
    if text.is_empty() {
        if rt.mode() == GenerationMode::Llm {
            return Err(GenerationError::new(GenerationErrorKind::GenerationRequired(format!(
                "writer: empty draft for chapter {}",
                brief.chapter_index
            )))
            .into());
        }
        warn!("Writer returned nothing, using template prose");
        return Ok(template());
    }

    let mut finish = first.finish_reason;
    let bounds = brief.bounds;
    for _ in 0..MAX_CONTINUATIONS {
        if !finish.is_truncated() && chars(&text) >= bounds.min_chars {
            break;
        }
        let remaining = (brief.target_chars as usize)
            .saturating_sub(chars(&text))
            .max(MIN_CONTINUATION_CHARS);
        let messages = vec![
            Message::system(format!(
                "You are continuing a chapter of a serialized novel. Continue from exactly where the \
                 text stops, write about {} more characters and end on a complete paragraph. Do not \
                 repeat what is already written.",
                remaining
            )),
            Message::user(format!(
                "{}\n\nEnd of the chapter so far:\n{}\n\nContinue:",
                outline_entry(brief.outline),
                tail(&text, CONTINUATION_TAIL_CHARS)
            )),
        ];
        // Auto mode already turned driver failures into `None`.
        let Some(response) = rt.prose(messages, &site.with_node("writer_continue")).await? else {
            debug!("No continuation, keeping the draft as is");
            break;
        };
        calls += 1;
        finish = response.finish_reason;
        let addition = response.text.trim();
        if addition.is_empty() || text.contains(addition) {
            debug!("Continuation added nothing new");
            break;
        }
        text = format!("{}\n\n{}", text.trim_end(), addition);
    }

    if chars(&text) > bounds.max_chars {
        let messages = vec![
            Message::system(format!(
                "You are an editor cutting a chapter to length. Keep every beat, the ending hook and \
                 all canon facts. Output only the shortened prose, at most {} characters.",
                bounds.max_chars
            )),
            Message::user(format!("Length limit: {}\n\n{}", bounds.max_chars, text)),
        ];
        match rt.prose(messages, &site.with_node("writer_shorten")).await? {
            Some(response) => {
                calls += 1;
                let shorter = response.text.trim();
                if !shorter.is_empty() && chars(shorter) < chars(&text) {
                    text = shorter.to_string();
                }
            }
            None => warn!("Shortening unavailable, keeping the long draft"),
        }
    }

    if finish == FinishReason::ContentFilter {
        warn!("Draft ended on a content filter stop");
    }
    Ok(Draft {
        text,
        writer_version: brief.writer_version,
        used_fallback: false,
        calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_interface::{GenerationDriver, MockBehavior, MockDriver, NullTrace};
    use quill_retry::{RetryExecutor, RetryPolicy};
    use std::sync::Arc;

    #[test]
    fn test_template_prose_respects_bounds() {
        let outline = OutlineChapter {
            chapter_index: 1,
            title: "Arrival".into(),
            goal: "reach Harrow".into(),
            beats: vec!["cross the salt flats".into()],
            ending_hook: "the gate is already open".into(),
            ..Default::default()
        };
        for target in [50u32, 300, 800] {
            let bounds = LengthBounds::from_target(target, 0.75, 1.25);
            let text = template_prose(&outline, "Mara", target, bounds);
            let n = text.chars().count();
            assert!(n >= bounds.min_chars, "{} < {}", n, bounds.min_chars);
            assert!(n <= bounds.max_chars, "{} > {}", n, bounds.max_chars);
            assert!(text.starts_with("Mara woke"));
        }
    }

    fn outline() -> OutlineChapter {
        OutlineChapter {
            chapter_index: 1,
            title: "Arrival".into(),
            goal: "reach Harrow".into(),
            ..Default::default()
        }
    }

    fn runtime(driver: Arc<MockDriver>, mode: GenerationMode) -> AgentRuntime {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        };
        let shared: Arc<dyn GenerationDriver> = driver;
        AgentRuntime::new(Some(shared), RetryExecutor::new(policy, Arc::new(NullTrace)), mode)
    }

    fn brief<'a>(outline: &'a OutlineChapter, bounds: LengthBounds) -> WriterBrief<'a> {
        WriterBrief {
            chapter_index: 1,
            writer_version: 1,
            outline,
            canon_digest: "",
            materials_digest: "",
            previous_summary: "",
            feedback: &[],
            previous_draft: None,
            target_chars: 100,
            bounds,
            lead: "Mara",
        }
    }

    fn refused() -> MockBehavior {
        MockBehavior::Fail(GenerationErrorKind::MissingCredentials("key revoked".into()))
    }

    #[tokio::test]
    async fn test_failed_continuation_is_an_error_in_llm_mode() {
        let outline = outline();
        let bounds = LengthBounds::from_target(100, 0.75, 1.25);
        let driver = Arc::new(MockDriver::new(vec![MockBehavior::truncated("Mara woke."), refused()]));
        let err = write_chapter(&runtime(driver.clone(), GenerationMode::Llm), brief(&outline, bounds))
            .await
            .unwrap_err();
        assert!(err.detail().contains("key revoked"));
        assert_eq!(driver.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_continuation_keeps_draft_in_auto_mode() {
        let outline = outline();
        let bounds = LengthBounds::from_target(100, 0.75, 1.25);
        let driver = Arc::new(MockDriver::new(vec![MockBehavior::truncated("Mara woke."), refused()]));
        let draft = write_chapter(&runtime(driver, GenerationMode::Auto), brief(&outline, bounds))
            .await
            .unwrap();
        assert_eq!(draft.text, "Mara woke.");
        assert_eq!(draft.calls, 1);
        assert!(!draft.used_fallback);
    }

    #[tokio::test]
    async fn test_failed_shortening_is_an_error_in_llm_mode() {
        let outline = outline();
        let bounds = LengthBounds::from_target(100, 0.75, 1.25);
        let driver = Arc::new(MockDriver::new(vec![MockBehavior::text("a".repeat(400)), refused()]));
        let err = write_chapter(&runtime(driver, GenerationMode::Llm), brief(&outline, bounds))
            .await
            .unwrap_err();
        assert_eq!(err.type_name(), "AuthenticationError");
    }

    #[test]
    fn test_tail_is_char_safe() {
        assert_eq!(tail("章节正文", 2), "正文");
        assert_eq!(tail("ab", 10), "ab");
    }
}
