//! Chapter pipeline state.
//!
//! A [`ChapterContext`] carries everything the stages read and never changes
//! while the chapter runs. Stages return a [`StageDelta`]; only the
//! orchestrator applies it to the [`ChapterState`].

use crate::agents::Draft;
use crate::gate::{CanonConflict, GateVerdict, LengthBounds};
use derive_getters::Getters;
use quill_core::{ChapterMemory, Decision, OutlineChapter};

/// Read-only inputs of one chapter.
#[derive(Debug, Clone, PartialEq, Getters, derive_new::new)]
pub struct ChapterContext {
    /// 1-based chapter index
    chapter_index: u32,
    /// Outline entry
    outline: OutlineChapter,
    /// Canon digest at chapter start
    canon_digest: String,
    /// Execution-layer digest of the pack in use
    materials_digest: String,
    /// Summary of the previous chapter
    previous_summary: String,
    /// Target length in characters
    target_chars: u32,
    /// Length window
    bounds: LengthBounds,
    /// Forbidden phrases from canon
    conflicts: Vec<CanonConflict>,
    /// Lead character name
    lead: String,
    /// Rewrite cap
    max_rewrites: u32,
}

/// Output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageDelta {
    /// Writer produced a draft
    Drafted(Draft),
    /// Editor reviewed the current draft
    Reviewed(GateVerdict),
    /// Memory compiled for the final draft
    Remembered(ChapterMemory),
}

/// Accumulated stage results of one chapter.
#[derive(Debug, Clone, Default, PartialEq, Getters)]
pub struct ChapterState {
    /// Current draft
    draft: Option<Draft>,
    /// Every review, in order
    verdicts: Vec<GateVerdict>,
    /// Memory record
    memory: Option<ChapterMemory>,
}

impl ChapterState {
    /// Applies a stage result.
    pub fn apply(&mut self, delta: StageDelta) {
        match delta {
            StageDelta::Drafted(draft) => self.draft = Some(draft),
            StageDelta::Reviewed(verdict) => self.verdicts.push(verdict),
            StageDelta::Remembered(memory) => self.memory = Some(memory),
        }
    }

    /// Version of the current draft, 0 before the first.
    pub fn writer_version(&self) -> u32 {
        self.draft.as_ref().map_or(0, |d| d.writer_version)
    }

    /// Latest verdict.
    pub fn last_verdict(&self) -> Option<&GateVerdict> {
        self.verdicts.last()
    }

    /// Decision of the latest review, rejected when there is none.
    pub fn decision(&self) -> Decision {
        self.last_verdict().map_or(Decision::Rejected, |v| v.decision)
    }

    /// True once the write/review loop must stop: the draft was accepted or
    /// escalated, or the rewrite budget is spent.
    pub fn is_settled(&self, max_rewrites: u32) -> bool {
        match self.last_verdict() {
            None => false,
            Some(v) if v.decision != Decision::Rejected => true,
            Some(_) => self.writer_version() >= 1 + max_rewrites,
        }
    }

    /// Rewrite instructions from the latest review.
    pub fn feedback(&self) -> Vec<String> {
        self.last_verdict().map(GateVerdict::instructions).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{GatePolicy, GateThresholds};

    fn draft(version: u32) -> Draft {
        Draft {
            text: format!("draft {}", version),
            writer_version: version,
            used_fallback: true,
            calls: 0,
        }
    }

    fn verdict(decision: Decision, version: u32) -> GateVerdict {
        GateVerdict {
            decision,
            issues: Vec::new(),
            advisory: Vec::new(),
            used_fallback: false,
            policy: GatePolicy::for_round(version, 2, &GateThresholds::default(), false),
        }
    }

    #[test]
    fn test_state_settles_on_accept() {
        let mut state = ChapterState::default();
        assert!(!state.is_settled(2));
        state.apply(StageDelta::Drafted(draft(1)));
        state.apply(StageDelta::Reviewed(verdict(Decision::Accepted, 1)));
        assert!(state.is_settled(2));
        assert_eq!(state.decision(), Decision::Accepted);
    }

    #[test]
    fn test_state_settles_when_budget_spent() {
        let mut state = ChapterState::default();
        for version in 1..=3 {
            state.apply(StageDelta::Drafted(draft(version)));
            state.apply(StageDelta::Reviewed(verdict(Decision::Rejected, version)));
            assert_eq!(state.is_settled(2), version == 3, "version {}", version);
        }
        assert_eq!(state.verdicts().len(), 3);
        assert_eq!(state.writer_version(), 3);
    }

    #[test]
    fn test_escalation_settles() {
        let mut state = ChapterState::default();
        state.apply(StageDelta::Drafted(draft(1)));
        state.apply(StageDelta::Reviewed(verdict(Decision::Escalate, 1)));
        assert!(state.is_settled(5));
    }
}
