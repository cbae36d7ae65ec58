//! Multi-step path evaluation.
//!
//! A path is an ordered sequence of single-step alternatives. Its metrics are
//! aggregated from the per-step estimates and scored with the same weighted
//! formula as single alternatives, except that effort is the compound
//! complexity normalized against 20.

use serde::{Deserialize, Serialize};

use crate::config::DecisionConfig;
use crate::core::alignment::AlignmentResult;
use crate::core::effort::EffortEstimate;
use crate::core::error::DecisionError;
use crate::core::evaluator::{
    Evaluation, NormalizedMetrics, RankingEntry, choose, sort_and_rank, weighted_contributions,
};
use crate::core::types::Alternative;
use crate::core::weights::WeightVector;

const COMPOUND_NORMALIZER: f64 = 20.0;

/// How per-step risks combine into a path risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStrategy {
    /// Weakest link: the riskiest step dominates.
    #[default]
    Max,
    Avg,
    /// Later steps weigh more (linear weights 1..N).
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePath {
    pub id: String,
    pub name: String,
    pub steps: Vec<Alternative>,
}

/// Per-step estimates for one path, positionally aligned with its steps.
///
/// Step ids are only unique within a path, so estimates are never looked up
/// by id. Missing positions fall back to the neutral estimates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathEstimates {
    pub efforts: Vec<EffortEstimate>,
    pub alignments: Vec<AlignmentResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathAggregate {
    pub path_id: String,
    pub step_count: usize,
    /// Σ step complexity.
    pub total_effort: f64,
    /// `total_effort × compound_multiplier`.
    pub compound_complexity: f64,
    pub risk: f64,
    /// Alignment of the final step.
    pub alignment: f64,
    /// Product of step confidences.
    pub confidence: f64,
    pub iterations: u32,
}

/// `1 + (n − 1)(factor − 1)`; exactly 1 for a single step.
pub fn compound_multiplier(steps: usize, factor: f64) -> f64 {
    1.0 + steps.saturating_sub(1) as f64 * (factor - 1.0)
}

/// Combine per-step risks. An empty slice yields 0.
pub fn aggregate_risk(risks: &[f64], strategy: RiskStrategy) -> f64 {
    if risks.is_empty() {
        return 0.0;
    }
    match strategy {
        RiskStrategy::Max => risks.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        RiskStrategy::Avg => risks.iter().sum::<f64>() / risks.len() as f64,
        RiskStrategy::Weighted => {
            let (weighted, total) = risks
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(acc, total), (idx, risk)| {
                    let weight = (idx + 1) as f64;
                    (acc + weight * risk, total + weight)
                });
            weighted / total
        }
    }
}

/// Aggregate per-step estimates into path metrics.
pub fn aggregate_path(
    path: &CandidatePath,
    estimates: &PathEstimates,
    config: &DecisionConfig,
) -> Result<PathAggregate, DecisionError> {
    let last_idx = path
        .steps
        .len()
        .checked_sub(1)
        .ok_or_else(|| DecisionError::EmptyPath(path.id.clone()))?;

    let step_efforts: Vec<EffortEstimate> = path
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            estimates
                .efforts
                .get(idx)
                .cloned()
                .unwrap_or_else(|| EffortEstimate::fallback(&step.id))
        })
        .collect();

    let total_effort: f64 = step_efforts.iter().map(|e| e.complexity).sum();
    let compound_complexity =
        total_effort * compound_multiplier(path.steps.len(), config.compound_factor);
    let risks: Vec<f64> = step_efforts.iter().map(|e| e.risk).collect();
    let alignment = estimates
        .alignments
        .get(last_idx)
        .map(|a| a.score)
        .unwrap_or_else(|| AlignmentResult::fallback(&path.steps[last_idx].id).score);

    Ok(PathAggregate {
        path_id: path.id.clone(),
        step_count: path.steps.len(),
        total_effort,
        compound_complexity,
        risk: aggregate_risk(&risks, config.risk_strategy),
        alignment,
        confidence: path
            .steps
            .iter()
            .map(|s| s.confidence.clamp(0.0, 1.0))
            .product(),
        iterations: step_efforts.iter().map(|e| e.iterations.expected).sum(),
    })
}

/// Rank candidate paths and pick the best one. `estimates[i]` belongs to
/// `paths[i]`.
pub fn evaluate_paths(
    paths: &[CandidatePath],
    estimates: &[PathEstimates],
    weights: &WeightVector,
    config: &DecisionConfig,
) -> Result<Evaluation, DecisionError> {
    if paths.is_empty() {
        return Err(DecisionError::NoCandidates);
    }
    let weights = weights.normalized()?;

    let neutral = PathEstimates::default();
    let mut entries = paths
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            let aggregate = aggregate_path(path, estimates.get(idx).unwrap_or(&neutral), config)?;
            let metrics = NormalizedMetrics {
                effort: (aggregate.compound_complexity / COMPOUND_NORMALIZER).min(1.0),
                risk: (aggregate.risk / 10.0).clamp(0.0, 1.0),
                alignment: aggregate.alignment.clamp(0.0, 1.0),
                confidence: aggregate.confidence,
            };
            let contributions = weighted_contributions(&metrics, &weights);
            Ok(RankingEntry {
                alternative_id: path.id.clone(),
                name: path.name.clone(),
                overall: contributions.total(),
                metrics,
                contributions,
                rank: 0,
                estimated_iterations: aggregate.iterations,
                justification: format!(
                    "{} steps, compound complexity {:.2}, path risk {:.2}",
                    aggregate.step_count, aggregate.compound_complexity, aggregate.risk
                ),
            })
        })
        .collect::<Result<Vec<_>, DecisionError>>()?;

    sort_and_rank(&mut entries);
    let chosen = choose(&entries)?;
    Ok(Evaluation {
        ranked: entries,
        chosen,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::effort::estimate_effort;
    use crate::core::types::ToolCall;
    use serde_json::json;

    fn step(id: &str, confidence: f64) -> Alternative {
        Alternative {
            id: id.to_string(),
            name: id.to_string(),
            steps: vec![ToolCall::new("read_file", json!({"path": id}))],
            assumptions: Vec::new(),
            prerequisites: Vec::new(),
            confidence,
        }
    }

    #[test]
    fn risk_strategies_aggregate_as_documented() {
        let risks = [2.0, 5.0, 9.0];
        assert_eq!(aggregate_risk(&risks, RiskStrategy::Max), 9.0);
        assert!((aggregate_risk(&risks, RiskStrategy::Avg) - 16.0 / 3.0).abs() < 1e-12);
        let weighted = aggregate_risk(&risks, RiskStrategy::Weighted);
        assert!((weighted - 6.5).abs() < 1e-12);
        assert!(weighted >= 16.0 / 3.0 && weighted <= 9.0);
    }

    #[test]
    fn compound_multiplier_grows_with_steps() {
        assert_eq!(compound_multiplier(1, 1.2), 1.0);
        assert!((compound_multiplier(3, 1.2) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn empty_path_is_a_contract_error() {
        let path = CandidatePath {
            id: "p".to_string(),
            name: "empty".to_string(),
            steps: Vec::new(),
        };
        let err = aggregate_path(&path, &PathEstimates::default(), &DecisionConfig::default())
            .unwrap_err();
        assert_eq!(err, DecisionError::EmptyPath("p".to_string()));
    }

    #[test]
    fn aggregate_uses_last_step_alignment_and_confidence_product() {
        let path = CandidatePath {
            id: "p".to_string(),
            name: "two".to_string(),
            steps: vec![step("a", 0.5), step("b", 0.8)],
        };
        let estimates = PathEstimates {
            efforts: Vec::new(),
            alignments: vec![
                AlignmentResult::fallback("a"),
                AlignmentResult {
                    score: 0.9,
                    ..AlignmentResult::fallback("b")
                },
            ],
        };
        let aggregate =
            aggregate_path(&path, &estimates, &DecisionConfig::default()).expect("ok");
        assert_eq!(aggregate.alignment, 0.9);
        assert!((aggregate.confidence - 0.4).abs() < 1e-12);
        assert_eq!(aggregate.total_effort, 10.0);
        assert!((aggregate.compound_complexity - 12.0).abs() < 1e-12);
        assert_eq!(aggregate.iterations, 2);
    }

    #[test]
    fn shorter_path_wins_when_steps_are_equivalent() {
        let short = CandidatePath {
            id: "short".to_string(),
            name: "short".to_string(),
            steps: vec![step("s1", 0.9)],
        };
        let long = CandidatePath {
            id: "long".to_string(),
            name: "long".to_string(),
            steps: vec![step("l1", 0.9), step("l2", 0.9), step("l3", 0.9)],
        };
        let paths = [long, short];
        let estimates: Vec<PathEstimates> = paths.iter().map(efforts_only).collect();
        let config = DecisionConfig::default();
        let evaluation = evaluate_paths(&paths, &estimates, &config.default_weights, &config)
            .expect("evaluate");
        assert_eq!(evaluation.chosen.alternative_id, "short");
        assert_eq!(evaluation.ranked[1].rank, 2);
    }

    fn efforts_only(path: &CandidatePath) -> PathEstimates {
        PathEstimates {
            efforts: path.steps.iter().map(estimate_effort).collect(),
            alignments: Vec::new(),
        }
    }

    #[test]
    fn step_ids_shared_across_paths_keep_their_own_estimates() {
        let safe = CandidatePath {
            id: "safe".to_string(),
            name: "safe".to_string(),
            steps: vec![step("s1", 0.8)],
        };
        let mut destructive = step("s1", 0.8);
        destructive.steps = vec![ToolCall::new("shell", json!({"command": "rm -rf /tmp/x"}))];
        let risky = CandidatePath {
            id: "risky".to_string(),
            name: "risky".to_string(),
            steps: vec![destructive],
        };
        let paths = [risky, safe];
        let estimates: Vec<PathEstimates> = paths.iter().map(efforts_only).collect();
        let config = DecisionConfig::default();

        let risky_agg = aggregate_path(&paths[0], &estimates[0], &config).expect("risky");
        let safe_agg = aggregate_path(&paths[1], &estimates[1], &config).expect("safe");
        assert!(risky_agg.risk > safe_agg.risk);

        let evaluation = evaluate_paths(&paths, &estimates, &config.default_weights, &config)
            .expect("evaluate");
        assert_eq!(evaluation.chosen.alternative_id, "safe");
        assert!(evaluation.ranked[0].overall > evaluation.ranked[1].overall);
    }
}
