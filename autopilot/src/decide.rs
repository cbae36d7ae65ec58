//! Decision engine: estimate, align, rank.
//!
//! Composes the pure estimators in `core` with the (optional) alignment
//! judgement, and wraps the weight learner around the outcome store.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::agents::alignment::{AlignmentJudge, score_alignment};
use crate::config::{DecisionConfig, LearnerConfig};
use crate::core::effort::{EffortEstimate, estimate_effort};
use crate::core::error::DecisionError;
use crate::core::evaluator::{Evaluation, evaluate};
use crate::core::learner::{LearnedWeights, learn_weights as learn_from_samples};
use crate::core::multi_step::{CandidatePath, PathEstimates, evaluate_paths};
use crate::core::types::{Alternative, TaskCategory};
use crate::core::weights::WeightVector;
use crate::io::inference::InferenceBackend;
use crate::io::outcomes::OutcomeStore;

#[derive(Debug, Clone)]
pub struct DecisionEngine<'a> {
    config: &'a DecisionConfig,
    judge: AlignmentJudge,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(config: &'a DecisionConfig, prompt_budget_bytes: usize) -> Self {
        Self {
            config,
            judge: AlignmentJudge::new(prompt_budget_bytes),
        }
    }

    /// Rank single-plan alternatives and choose one.
    #[instrument(skip_all, fields(alternatives = alternatives.len()))]
    pub fn evaluate<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        goal: &str,
        alternatives: &[Alternative],
        weights: &WeightVector,
        timeout: Duration,
    ) -> Result<Evaluation, DecisionError> {
        if alternatives.is_empty() {
            return Err(DecisionError::NoCandidates);
        }
        let efforts: Vec<EffortEstimate> = alternatives.iter().map(estimate_effort).collect();
        let alignments = score_alignment(
            self.config.alignment_mode,
            &self.judge,
            backend,
            goal,
            alternatives,
            timeout,
        );
        let evaluation = evaluate(alternatives, &efforts, &alignments, weights)?;
        info!(
            chosen = %evaluation.chosen.alternative_id,
            score = evaluation.chosen.score,
            "alternative chosen"
        );
        debug!(justification = %evaluation.chosen.justification, "selection rationale");
        Ok(evaluation)
    }

    /// Rank multi-step paths. Every path is estimated on its own, step by
    /// step; the path takes its final step's alignment.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn evaluate_paths<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        goal: &str,
        paths: &[CandidatePath],
        weights: &WeightVector,
        timeout: Duration,
    ) -> Result<Evaluation, DecisionError> {
        if paths.is_empty() {
            return Err(DecisionError::NoCandidates);
        }
        if let Some(empty) = paths.iter().find(|p| p.steps.is_empty()) {
            return Err(DecisionError::EmptyPath(empty.id.clone()));
        }
        let estimates: Vec<PathEstimates> = paths
            .iter()
            .map(|path| PathEstimates {
                efforts: path.steps.iter().map(estimate_effort).collect(),
                alignments: score_alignment(
                    self.config.alignment_mode,
                    &self.judge,
                    backend,
                    goal,
                    &path.steps,
                    timeout,
                ),
            })
            .collect();
        let evaluation = evaluate_paths(paths, &estimates, weights, self.config)?;
        info!(
            chosen = %evaluation.chosen.alternative_id,
            score = evaluation.chosen.score,
            "path chosen"
        );
        debug!(justification = %evaluation.chosen.justification, "selection rationale");
        Ok(evaluation)
    }
}

/// Learn weights for `category` from the outcome store.
pub fn learn_weights<S: OutcomeStore + ?Sized>(
    store: &S,
    category: TaskCategory,
    decision: &DecisionConfig,
    learner: &LearnerConfig,
) -> Result<LearnedWeights> {
    let samples = store
        .query_outcomes(category)
        .with_context(|| format!("query outcomes for {category}"))?;
    let learned = learn_from_samples(&samples, &decision.default_weights, learner);
    info!(
        category = %category,
        method = %learned.method,
        data_points = learned.data_points,
        confidence = learned.confidence,
        "weights learned"
    );
    Ok(learned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::learner::{LearnMethod, Outcome, OutcomeSample};
    use crate::core::types::ToolCall;
    use crate::io::outcomes::MemoryOutcomeStore;
    use crate::test_support::{ScriptedBackend, alternative};
    use serde_json::json;

    #[test]
    fn no_alternatives_is_a_contract_error() {
        let config = DecisionConfig::default();
        let engine = DecisionEngine::new(&config, 10_000);
        let err = engine
            .evaluate(
                &ScriptedBackend::new(),
                "goal",
                &[],
                &config.default_weights,
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert_eq!(err, DecisionError::NoCandidates);
    }

    #[test]
    fn evaluation_ranks_every_alternative() {
        let config = DecisionConfig::default();
        let engine = DecisionEngine::new(&config, 10_000);
        let alts = vec![
            alternative(
                "read",
                "read the csv header",
                ToolCall::new("read_file", json!({"path": "data.csv"})),
                0.9,
            ),
            alternative(
                "guess",
                "guess",
                ToolCall::new("shell", json!({"command": "rm -rf build && make"})),
                0.2,
            ),
        ];
        let evaluation = engine
            .evaluate(
                &ScriptedBackend::new(),
                "Count the rows in data.csv",
                &alts,
                &config.default_weights,
                Duration::from_secs(1),
            )
            .expect("evaluate");
        assert_eq!(evaluation.ranked.len(), 2);
        assert_eq!(evaluation.chosen.alternative_id, "read");
        assert_eq!(evaluation.ranked[0].rank, 1);
    }

    #[test]
    fn empty_path_is_a_contract_error() {
        let config = DecisionConfig::default();
        let engine = DecisionEngine::new(&config, 10_000);
        let err = engine
            .evaluate_paths(
                &ScriptedBackend::new(),
                "goal",
                &[CandidatePath {
                    id: "p".to_string(),
                    name: "empty".to_string(),
                    steps: Vec::new(),
                }],
                &config.default_weights,
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert_eq!(err, DecisionError::EmptyPath("p".to_string()));
    }

    #[test]
    fn paths_are_ranked_on_their_own_steps() {
        let config = DecisionConfig::default();
        let engine = DecisionEngine::new(&config, 10_000);
        let inspect = CandidatePath {
            id: "inspect".to_string(),
            name: "inspect then count".to_string(),
            steps: vec![
                alternative(
                    "s1",
                    "read the csv header",
                    ToolCall::new("read_file", json!({"path": "data.csv"})),
                    0.9,
                ),
                alternative(
                    "s2",
                    "count the csv rows",
                    ToolCall::new("shell", json!({"command": "wc -l data.csv"})),
                    0.9,
                ),
            ],
        };
        let rebuild = CandidatePath {
            id: "rebuild".to_string(),
            name: "wipe and regenerate".to_string(),
            steps: vec![
                alternative(
                    "s1",
                    "wipe the outputs",
                    ToolCall::new("shell", json!({"command": "rm -rf out"})),
                    0.6,
                ),
                alternative(
                    "s2",
                    "regenerate the data",
                    ToolCall::new("shell", json!({"command": "make data"})),
                    0.6,
                ),
            ],
        };
        let evaluation = engine
            .evaluate_paths(
                &ScriptedBackend::new(),
                "Count the rows in data.csv",
                &[rebuild, inspect],
                &config.default_weights,
                Duration::from_secs(1),
            )
            .expect("evaluate");
        assert_eq!(evaluation.ranked.len(), 2);
        assert_eq!(evaluation.chosen.alternative_id, "inspect");
        assert_eq!(evaluation.ranked[1].alternative_id, "rebuild");
        assert!(evaluation.ranked[0].metrics.risk < evaluation.ranked[1].metrics.risk);
    }

    #[test]
    fn learn_weights_reads_only_the_category() {
        let store = MemoryOutcomeStore::with_samples(
            (0..25)
                .map(|i| OutcomeSample {
                    category: TaskCategory::Coding,
                    outcome: if i % 5 == 0 {
                        Outcome::Failure
                    } else {
                        Outcome::Success
                    },
                    weights: WeightVector::new(0.5, 0.2, 0.2, 0.1),
                    session_id: None,
                })
                .collect(),
        );
        let decision = DecisionConfig::default();
        let learner = LearnerConfig::default();

        let coding = learn_weights(&store, TaskCategory::Coding, &decision, &learner)
            .expect("learn");
        assert_eq!(coding.method, LearnMethod::Learned);
        assert_eq!(coding.data_points, 25);
        assert!(coding.weights.is_normalized());

        let research = learn_weights(&store, TaskCategory::Research, &decision, &learner)
            .expect("learn");
        assert_eq!(research.method, LearnMethod::Default);
        assert_eq!(research.weights, decision.default_weights);
    }
}
