//! Prompt rendering for the judgement agents.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds its byte budget, droppable sections are
//! removed in a per-template order, then the last section is truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const REFLECTION_TEMPLATE: &str = include_str!("prompts/reflection.md");
const DIAGNOSIS_TEMPLATE: &str = include_str!("prompts/diagnosis.md");
const ALIGNMENT_TEMPLATE: &str = include_str!("prompts/alignment.md");

const REFLECTION_DROP_ORDER: &[&str] = &["priors", "artifacts", "history", "failures"];
const DIAGNOSIS_DROP_ORDER: &[&str] = &["stdout", "stderr"];

/// Inputs for the per-iteration reflection prompt.
#[derive(Debug, Clone, Default)]
pub struct ReflectionInputs {
    pub goal: String,
    pub category: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub progress: f64,
    pub errors: u32,
    pub max_errors: u32,
    pub tools: Vec<String>,
    pub clarification: Option<String>,
    /// Rendered failure records, oldest first.
    pub failures: Vec<String>,
    /// One line per recent iteration, oldest first.
    pub history: Vec<String>,
    pub artifacts: Vec<String>,
    pub priors: Option<String>,
}

/// Inputs for the diagnosis prompt.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisInputs {
    pub goal: String,
    pub iteration: u32,
    pub call: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub classification: String,
    pub classification_confidence: f64,
    pub recent_actions: Vec<String>,
    pub tools: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub steps: Vec<String>,
}

/// Inputs for the alignment prompt.
#[derive(Debug, Clone, Default)]
pub struct AlignmentInputs {
    pub goal: String,
    pub plans: Vec<PlanSummary>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("reflection", REFLECTION_TEMPLATE)
            .expect("reflection template should be valid");
        env.add_template("diagnosis", DIAGNOSIS_TEMPLATE)
            .expect("diagnosis template should be valid");
        env.add_template("alignment", ALIGNMENT_TEMPLATE)
            .expect("alignment template should be valid");
        Self { env }
    }

    fn render_reflection(&self, input: &ReflectionInputs) -> Result<String> {
        let template = self.env.get_template("reflection")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            category => &input.category,
            iteration => input.iteration,
            max_iterations => input.max_iterations,
            progress => format!("{:.0}", input.progress),
            errors => input.errors,
            max_errors => input.max_errors,
            tools => &input.tools,
            clarification => non_empty(input.clarification.as_deref()),
            failures => &input.failures,
            history => &input.history,
            artifacts => &input.artifacts,
            priors => non_empty(input.priors.as_deref()),
        })?;
        Ok(rendered)
    }

    fn render_diagnosis(&self, input: &DiagnosisInputs) -> Result<String> {
        let template = self.env.get_template("diagnosis")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            iteration => input.iteration,
            call => &input.call,
            error => &input.error,
            exit_code => input.exit_code,
            signal => non_empty(input.signal.as_deref()),
            stdout => non_empty(input.stdout.as_deref()),
            stderr => non_empty(input.stderr.as_deref()),
            classification => &input.classification,
            classification_confidence => format!("{:.2}", input.classification_confidence),
            recent_actions => &input.recent_actions,
            tools => &input.tools,
            categories => &input.categories,
        })?;
        Ok(rendered)
    }

    fn render_alignment(&self, input: &AlignmentInputs) -> Result<String> {
        let template = self.env.get_template("alignment")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            plans => &input.plans,
        })?;
        Ok(rendered)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker pattern should be valid")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let stop = markers
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(rendered.len());
        let content = rendered[*end..stop].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in drop_order {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total - last.content.len());
    let marker = "\n[truncated]";
    let mut cut = allowed.saturating_sub(marker.len());
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    let before_len = last.content.len();
    last.content.truncate(cut);
    last.content.push_str(marker);
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated prompt section for budget"
    );
}

fn assemble(rendered: &str, budget: usize, drop_order: &[&str]) -> String {
    let mut sections = parse_sections(rendered);
    apply_budget(&mut sections, budget, drop_order);
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn reflection_prompt(input: &ReflectionInputs, budget: usize) -> Result<String> {
    let rendered = PromptEngine::new().render_reflection(input)?;
    Ok(assemble(&rendered, budget, REFLECTION_DROP_ORDER))
}

pub fn diagnosis_prompt(input: &DiagnosisInputs, budget: usize) -> Result<String> {
    let rendered = PromptEngine::new().render_diagnosis(input)?;
    Ok(assemble(&rendered, budget, DIAGNOSIS_DROP_ORDER))
}

pub fn alignment_prompt(input: &AlignmentInputs, budget: usize) -> Result<String> {
    let rendered = PromptEngine::new().render_alignment(input)?;
    Ok(assemble(&rendered, budget, &[]))
}
