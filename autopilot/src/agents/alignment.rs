//! Judgement-backed alignment scoring.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::config::AlignmentMode;
use crate::core::alignment::{AlignmentResult, Relevance, check_alignment};
use crate::core::types::{Alternative, clamp_finite};
use crate::io::inference::{InferenceBackend, JudgeRequest, JudgementKind};
use crate::io::prompt::{AlignmentInputs, PlanSummary, alignment_prompt};

pub const ALIGNMENT_SCHEMA: &str = include_str!("../../schemas/alignment.schema.json");

#[derive(Debug, Deserialize)]
struct JudgedAlignment {
    results: Vec<JudgedResult>,
}

#[derive(Debug, Deserialize)]
struct JudgedResult {
    alternative_id: String,
    score: f64,
    contribution: String,
    reasoning: String,
}

#[derive(Debug, Clone)]
pub struct AlignmentJudge {
    prompt_budget_bytes: usize,
}

impl AlignmentJudge {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// One result per alternative, in input order. Alternatives the backend
    /// skipped are scored heuristically.
    #[instrument(skip_all, fields(alternatives = alternatives.len()))]
    pub fn judge<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        goal: &str,
        alternatives: &[Alternative],
        timeout: Duration,
    ) -> Result<Vec<AlignmentResult>> {
        let inputs = AlignmentInputs {
            goal: goal.to_string(),
            plans: alternatives
                .iter()
                .map(|alt| PlanSummary {
                    id: alt.id.clone(),
                    name: alt.name.clone(),
                    steps: alt.steps.iter().map(|step| step.describe()).collect(),
                })
                .collect(),
        };
        let prompt = alignment_prompt(&inputs, self.prompt_budget_bytes)?;
        let value = backend.judge(&JudgeRequest {
            kind: JudgementKind::Alignment,
            prompt,
            schema: ALIGNMENT_SCHEMA,
            timeout,
        })?;
        let judged: JudgedAlignment = serde_json::from_value(value).context("decode alignment")?;

        Ok(alternatives
            .iter()
            .map(|alt| {
                match judged
                    .results
                    .iter()
                    .find(|r| r.alternative_id == alt.id)
                {
                    Some(result) => {
                        let score = clamp_finite(result.score, 0.0, 1.0);
                        AlignmentResult {
                            alternative_id: alt.id.clone(),
                            score,
                            relevance: Relevance::from_score(score),
                            contribution: result.contribution.clone(),
                            reasoning: result.reasoning.clone(),
                        }
                    }
                    None => check_alignment(goal, alt),
                }
            })
            .collect())
    }
}

/// Score every alternative per the configured mode. Judgement failures
/// degrade to the keyword heuristic.
pub fn score_alignment<B: InferenceBackend + ?Sized>(
    mode: AlignmentMode,
    judge: &AlignmentJudge,
    backend: &B,
    goal: &str,
    alternatives: &[Alternative],
    timeout: Duration,
) -> Vec<AlignmentResult> {
    let heuristic = || {
        alternatives
            .iter()
            .map(|alt| check_alignment(goal, alt))
            .collect()
    };
    match mode {
        AlignmentMode::Heuristic => heuristic(),
        AlignmentMode::Judgement => match judge.judge(backend, goal, alternatives, timeout) {
            Ok(results) => results,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "alignment judgement failed, using heuristic");
                heuristic()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolCall;
    use crate::test_support::ScriptedBackend;
    use serde_json::json;

    fn alternative(id: &str, name: &str) -> Alternative {
        Alternative {
            id: id.to_string(),
            name: name.to_string(),
            steps: vec![ToolCall::new("shell", json!({"command": "wc -l data.csv"}))],
            assumptions: Vec::new(),
            prerequisites: Vec::new(),
            confidence: 0.7,
        }
    }

    #[test]
    fn judged_scores_are_used_and_missing_ids_fall_back() {
        let backend = ScriptedBackend::new();
        backend.push_alignment(json!({
            "results": [
                {"alternative_id": "a", "score": 0.9, "contribution": "counts rows", "reasoning": "direct"}
            ]
        }));
        let alts = vec![alternative("a", "count rows"), alternative("b", "count rows again")];
        let results = score_alignment(
            AlignmentMode::Judgement,
            &AlignmentJudge::new(10_000),
            &backend,
            "Count the rows in data.csv",
            &alts,
            Duration::from_secs(1),
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, 0.9);
        assert_eq!(results[0].relevance, Relevance::High);
        assert_eq!(results[1], check_alignment("Count the rows in data.csv", &alts[1]));
    }

    #[test]
    fn heuristic_mode_never_calls_the_backend() {
        let backend = ScriptedBackend::new();
        let alts = vec![alternative("a", "count rows")];
        let results = score_alignment(
            AlignmentMode::Heuristic,
            &AlignmentJudge::new(10_000),
            &backend,
            "Count the rows",
            &alts,
            Duration::from_secs(1),
        );
        assert_eq!(results.len(), 1);
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn judgement_failure_degrades_to_heuristic() {
        let backend = ScriptedBackend::new();
        let alts = vec![alternative("a", "count rows")];
        let results = score_alignment(
            AlignmentMode::Judgement,
            &AlignmentJudge::new(10_000),
            &backend,
            "Count the rows",
            &alts,
            Duration::from_secs(1),
        );
        assert_eq!(results[0], check_alignment("Count the rows", &alts[0]));
        assert_eq!(backend.requests().len(), 1);
    }
}
