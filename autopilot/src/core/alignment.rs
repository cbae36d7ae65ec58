//! Heuristic plan-to-goal alignment.
//!
//! Scores keyword overlap between the goal and everything an alternative says
//! about itself (name, step tools and arguments, assumptions). This is the
//! deterministic checker; the judgement-backed one lives in `agents::alignment`
//! and falls back to this.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Alternative;

/// Score used when no alignment result exists for an alternative.
pub const FALLBACK_ALIGNMENT: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "then", "this", "to", "with", "all", "any", "each", "my",
    "our", "please", "should", "will",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Low,
    Medium,
    High,
}

impl Relevance {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Relevance::High
        } else if score >= 0.4 {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub alternative_id: String,
    /// `[0, 1]`, higher serves the goal more directly.
    pub score: f64,
    pub relevance: Relevance,
    pub contribution: String,
    pub reasoning: String,
}

impl AlignmentResult {
    pub fn fallback(alternative_id: &str) -> Self {
        Self {
            alternative_id: alternative_id.to_string(),
            score: FALLBACK_ALIGNMENT,
            relevance: Relevance::from_score(FALLBACK_ALIGNMENT),
            contribution: "unknown".to_string(),
            reasoning: "no alignment data; using mid-scale default".to_string(),
        }
    }
}

/// Lowercased content words of `text` (length ≥ 3, stopwords removed).
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.len() >= 3 && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push(' ');
            out.push_str(s);
        }
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn plan_text(alternative: &Alternative) -> String {
    let mut text = alternative.name.clone();
    for step in &alternative.steps {
        text.push(' ');
        text.push_str(&step.tool.replace('_', " "));
        collect_strings(&step.args, &mut text);
    }
    for assumption in &alternative.assumptions {
        text.push(' ');
        text.push_str(assumption);
    }
    text
}

/// Score alignment as `0.2 + 0.8 × (share of goal keywords the plan mentions)`.
pub fn check_alignment(goal: &str, alternative: &Alternative) -> AlignmentResult {
    let goal_words = keywords(goal);
    let plan_words = keywords(&plan_text(alternative));

    if goal_words.is_empty() {
        return AlignmentResult {
            reasoning: "goal has no content words; using mid-scale default".to_string(),
            ..AlignmentResult::fallback(&alternative.id)
        };
    }

    let shared: Vec<&String> = goal_words.intersection(&plan_words).collect();
    let overlap = shared.len() as f64 / goal_words.len() as f64;
    let score = (0.2 + 0.8 * overlap).clamp(0.0, 1.0);
    let relevance = Relevance::from_score(score);

    let contribution = if shared.is_empty() {
        "does not mention any goal terms".to_string()
    } else {
        let terms: Vec<&str> = shared.iter().map(|s| s.as_str()).collect();
        format!("addresses {}", terms.join(", "))
    };

    AlignmentResult {
        alternative_id: alternative.id.clone(),
        score,
        relevance,
        contribution,
        reasoning: format!(
            "{} of {} goal keywords covered",
            shared.len(),
            goal_words.len()
        ),
    }
}
