//! Materials aggregation: the execution layer and the draft pack.
//!
//! The four planning outputs are reconciled into a [`MaterialsBundle`]; the
//! chief editor then settles the rules the writer works under (decisions,
//! checklists, risks), and [`build_pack`] assembles everything into the
//! [`MaterialsPack`] that is saved as a draft and frozen.

use crate::agents::{AgentRuntime, Drafted};
use crate::prompts::{EXECUTION_SCHEMA, canon_digest, outline_entry};
use crate::repair::SchemaCall;
use quill_core::{
    CanonBundle, Checklists, Constraints, ExecDecision, Execution, Glossary, GlossaryEntry,
    MaterialsBundle, MaterialsPack, Message, OpenQuestion, PackMeta, Planning, Risk, Tone,
    str_field, string_list,
};
use quill_error::QuillResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write;
use tracing::{debug, instrument};

const LOGLINE_TOPIC: &str = "logline";
const PACING_TOPIC: &str = "pacing plan";

/// The chief editor's output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// One-sentence premise
    pub logline: String,
    /// How the story's pace is distributed over the chapters
    pub pacing_plan: String,
    /// Binding decisions
    pub decisions: Vec<ExecDecision>,
    /// Checklists
    pub checklists: Checklists,
    /// Known risks
    pub risks: Vec<String>,
    /// Unresolved questions
    pub open_questions: Vec<OpenQuestion>,
}

impl ExecutionPlan {
    /// Normalises model output.
    pub fn ensure(value: &Value) -> Self {
        let list = |key: &str| -> Vec<Value> {
            value
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let decisions = list("decisions")
            .iter()
            .filter_map(|d| {
                let decision = match d {
                    Value::String(s) => s.trim().to_string(),
                    _ => str_field(d, "decision"),
                };
                (!decision.is_empty()).then(|| ExecDecision {
                    id: String::new(),
                    topic: str_field(d, "topic"),
                    decision,
                    rationale: str_field(d, "rationale"),
                })
            })
            .collect();
        let risks = list("risks")
            .iter()
            .filter_map(|r| match r {
                Value::String(s) => Some(s.trim().to_string()),
                _ => {
                    let risk = str_field(r, "risk");
                    (!risk.is_empty()).then_some(risk)
                }
            })
            .filter(|r| !r.is_empty())
            .collect();
        let open_questions = list("open_questions")
            .iter()
            .filter_map(|q| match q {
                Value::String(s) if !s.trim().is_empty() => Some(OpenQuestion {
                    question: s.trim().to_string(),
                    severity: "minor".into(),
                    blocking: false,
                }),
                Value::Object(_) => {
                    let question = str_field(q, "question");
                    (!question.is_empty()).then(|| OpenQuestion {
                        question,
                        severity: str_field(q, "severity"),
                        blocking: q.get("blocking").and_then(Value::as_bool).unwrap_or(false),
                    })
                }
                _ => None,
            })
            .collect();
        let checklists = value.get("checklists").cloned().unwrap_or(Value::Null);
        Self {
            logline: str_field(value, "logline"),
            pacing_plan: str_field(value, "pacing_plan"),
            decisions,
            checklists: Checklists {
                global: string_list(&checklists, "global"),
                per_arc: string_list(&checklists, "per_arc"),
                per_chapter: string_list(&checklists, "per_chapter"),
            },
            risks,
            open_questions,
        }
    }
}

fn validate_execution(map: &Map<String, Value>) -> String {
    let text = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or("").trim().is_empty();
    if text("logline") {
        return "missing logline".into();
    }
    if text("pacing_plan") {
        return "missing pacing_plan".into();
    }
    if !map
        .get("decisions")
        .and_then(Value::as_array)
        .is_some_and(|d| !d.is_empty())
    {
        return "missing decisions".into();
    }
    String::new()
}

/// Deterministic execution layer derived from the tone and outline.
pub fn template_execution(idea: &str, bundle: &MaterialsBundle, target_words: u32) -> ExecutionPlan {
    let tone = &bundle.tone;
    let chapters = bundle.outline.chapters.len().max(1);
    let mut decisions = Vec::new();

    decisions.push(if tone.narration.is_empty() {
        ExecDecision {
            topic: "point of view".into(),
            decision: "close third person following the protagonist".into(),
            rationale: "(template) no narration was set; one fixed viewpoint prevents drift".into(),
            ..Default::default()
        }
    } else {
        ExecDecision {
            topic: "point of view".into(),
            decision: tone.narration.clone(),
            rationale: "(template) taken from the tone".into(),
            ..Default::default()
        }
    });
    if !tone.pacing.is_empty() {
        decisions.push(ExecDecision {
            topic: "pacing".into(),
            decision: tone.pacing.clone(),
            rationale: "(template) taken from the tone".into(),
            ..Default::default()
        });
    }
    if let Some(last) = bundle.outline.chapters.last() {
        decisions.push(ExecDecision {
            topic: "structure".into(),
            decision: format!(
                "{} chapters; every chapter ends on its outline hook, the last one on: {}",
                chapters,
                if last.ending_hook.is_empty() { "a resolution" } else { &last.ending_hook }
            ),
            rationale: "(template) derived from the outline".into(),
            ..Default::default()
        });
    }

    let mut global = vec![
        "the central conflict does not drift".to_string(),
        "rules and their costs stay consistent".to_string(),
        "every motivation can be traced".to_string(),
    ];
    global.extend(tone.style_constraints.iter().cloned());

    ExecutionPlan {
        logline: idea.trim().to_string(),
        pacing_plan: format!(
            "(template) {} chapters of about {} characters: establish the pressure early, escalate \
             in the middle, close every chapter on a hook",
            chapters, target_words
        ),
        decisions,
        checklists: Checklists {
            global,
            per_arc: vec![
                "the arc has a clear goal and opponent".into(),
                "at least one escalation or reversal mid-arc".into(),
                "the arc closes and opens a new threat".into(),
            ],
            per_chapter: vec![
                "enter the scene fast".into(),
                "escalate the conflict".into(),
                "reveal something".into(),
                "end on a hook".into(),
            ],
        },
        risks: vec!["loose pacing: chapters that repeat instead of advancing".into()],
        open_questions: Vec::new(),
    }
}

/// Chief editor: settles decisions, checklists and risks for the writer.
#[instrument(skip_all)]
pub async fn chief_editor(
    rt: &AgentRuntime,
    idea: &str,
    bundle: &MaterialsBundle,
    canon: &CanonBundle,
    target_words: u32,
) -> QuillResult<Drafted<ExecutionPlan>> {
    let mut outline = String::new();
    for chapter in &bundle.outline.chapters {
        let _ = writeln!(outline, "{}\n", outline_entry(chapter));
    }
    let tone = serde_json::to_string(&bundle.tone).unwrap_or_default();
    let messages = [
        Message::system(
            "You are the chief editor of a serialized novel. Read the planning materials, find \
             where they conflict and settle each conflict with an explicit, actionable decision. \
             Add checklists for every chapter and arc, the main risks, and any open questions; mark \
             a question blocking only when writing cannot start without an answer.",
        ),
        Message::user(format!(
            "Idea: {}\nTarget length per chapter: {} characters\n\nOutline:\n{}\nTone:\n{}\n\nCanon:\n{}",
            idea.trim(),
            target_words,
            outline.trim_end(),
            tone,
            canon_digest(canon)
        )),
    ];
    let call = SchemaCall::new("chief_editor", EXECUTION_SCHEMA).validate(validate_execution);
    Ok(match rt.structured(&messages, call).await? {
        Some(map) => Drafted::generated(ExecutionPlan::ensure(&Value::Object(map))),
        None => {
            debug!("Using template execution layer");
            Drafted::template(template_execution(idea, bundle, target_words))
        }
    })
}

/// Renders the tone as `canon/style.md` content.
pub fn tone_style(tone: &Tone) -> String {
    if tone.is_empty() {
        return String::new();
    }
    let mut out = String::from("# Style\n\n");
    if !tone.narration.is_empty() {
        let _ = writeln!(out, "- narration: {}", tone.narration);
    }
    if !tone.pacing.is_empty() {
        let _ = writeln!(out, "- pacing: {}", tone.pacing);
    }
    for rule in &tone.style_constraints {
        let _ = writeln!(out, "- {}", rule);
    }
    for avoid in &tone.avoid {
        let _ = writeln!(out, "- avoid: {}", avoid);
    }
    if !tone.reference_style.is_empty() {
        let _ = writeln!(out, "- reference: {}", tone.reference_style);
    }
    out
}

/// Canon content the planning roles contribute.
pub fn planned_canon(bundle: &MaterialsBundle) -> CanonBundle {
    CanonBundle {
        world: bundle.world.clone(),
        characters: bundle.characters.clone(),
        timeline: Default::default(),
        style: tone_style(&bundle.tone),
    }
}

/// Glossary seeded from canon names.
pub fn glossary_from(canon: &CanonBundle) -> Glossary {
    let entry = |term: &str, desc: &str| GlossaryEntry {
        id: String::new(),
        term: term.to_string(),
        desc: desc.to_string(),
    };
    Glossary {
        characters: canon
            .characters
            .characters
            .iter()
            .map(|c| entry(&c.name, &c.role))
            .collect(),
        factions: canon.world.factions.iter().map(|f| entry(&f.name, &f.detail)).collect(),
        places: canon.world.places.iter().map(|p| entry(&p.name, &p.detail)).collect(),
        rules: canon.world.rules.iter().map(|r| entry(&r.name, &r.detail)).collect(),
    }
}

/// Assembles the draft pack. `canon` is the merged canon snapshot.
pub fn build_pack(
    project_dir: &str,
    bundle: MaterialsBundle,
    canon: CanonBundle,
    plan: ExecutionPlan,
    mut constraints: Constraints,
) -> MaterialsPack {
    let glossary = glossary_from(&canon);
    if constraints.naming_policy.is_empty() {
        constraints.naming_policy = if glossary.characters.is_empty() {
            "new proper nouns may be introduced; record them in memory".into()
        } else {
            "use glossary names exactly; new proper nouns only when the outline requires them".into()
        };
    }

    let mut decisions = Vec::new();
    if !plan.logline.is_empty() {
        decisions.push(ExecDecision {
            topic: LOGLINE_TOPIC.into(),
            decision: plan.logline,
            ..Default::default()
        });
    }
    if !plan.pacing_plan.is_empty() {
        decisions.push(ExecDecision {
            topic: PACING_TOPIC.into(),
            decision: plan.pacing_plan,
            ..Default::default()
        });
    }
    decisions.extend(plan.decisions);

    let created_at = chrono::Utc::now().to_rfc3339();
    MaterialsPack {
        meta: PackMeta {
            project_dir: project_dir.to_string(),
            created_at: created_at.clone(),
            ..Default::default()
        },
        canon,
        planning: Planning {
            outline: bundle.outline,
            tone: bundle.tone,
        },
        execution: Execution {
            decisions,
            checklists: plan.checklists,
            glossary,
            constraints,
            risks: plan.risks.clone(),
            open_questions: Vec::new(),
        },
        risk: Risk {
            risks: plan.risks,
            open_questions: plan.open_questions,
        },
        changelog: vec![format!("{} drafted", created_at)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{template_characters, template_outline, template_tone, template_world};
    use quill_canon::validate_materials_pack;
    use serde_json::json;

    fn bundle() -> MaterialsBundle {
        MaterialsBundle {
            world: template_world("a courier in a drowned city"),
            characters: template_characters(),
            outline: template_outline(3),
            tone: template_tone(),
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            target_words: 800,
            writer_min_ratio: 0.75,
            writer_max_ratio: 1.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_template_pack_passes_dod() {
        let bundle = bundle();
        let plan = template_execution("a courier in a drowned city", &bundle, 800);
        assert!(validate_execution(&serde_json::to_value(&plan).unwrap().as_object().cloned().unwrap()).is_empty());

        let canon = planned_canon(&bundle);
        assert!(canon.style.contains("narration"));
        let pack = build_pack("outputs/drowned", bundle, canon, plan, constraints());
        assert_eq!(pack.execution.decisions[0].topic, LOGLINE_TOPIC);
        assert_eq!(pack.execution.glossary.characters.len(), 3);
        assert!(!pack.execution.constraints.naming_policy.is_empty());

        let report = validate_materials_pack(&Value::Object(pack.to_object()));
        assert!(report.ok, "{}", report.one_line());
    }

    #[test]
    fn test_execution_plan_normalises_loose_output() {
        let plan = ExecutionPlan::ensure(&json!({
            "logline": " A courier ",
            "pacing_plan": "fast",
            "decisions": ["no flashbacks", {"topic": "pov", "decision": ""}],
            "risks": [{"risk": "sag in the middle"}],
            "open_questions": ["who sank the city?", {"question": "ending?", "severity": "blocker"}]
        }));
        assert_eq!(plan.logline, "A courier");
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.risks, vec!["sag in the middle".to_string()]);
        assert!(!plan.open_questions[0].is_blocking());
        assert!(plan.open_questions[1].is_blocking());
    }

    #[test]
    fn test_validate_execution() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(validate_execution(&obj(json!({"pacing_plan": "x"}))), "missing logline");
        assert_eq!(
            validate_execution(&obj(json!({"logline": "x", "pacing_plan": "y", "decisions": []}))),
            "missing decisions"
        );
    }
}
