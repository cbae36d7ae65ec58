//! Single-step alternative evaluation.
//!
//! Combines effort, risk, alignment and confidence into one weighted score per
//! alternative and ranks them. Normalization rules are fixed:
//!
//! - complexity and risk are divided by 10;
//! - iteration estimates are min–max normalized across the candidate set (a
//!   zero range uses denominator 1);
//! - effort = 0.4 × complexity + 0.4 × risk + 0.2 × iterations;
//! - overall = (1 − effort)·w_effort + (1 − risk)·w_risk + alignment·w_alignment
//!   + confidence·w_confidence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::alignment::AlignmentResult;
use crate::core::effort::EffortEstimate;
use crate::core::error::DecisionError;
use crate::core::types::Alternative;
use crate::core::weights::WeightVector;

const STRONG_ALIGNMENT: f64 = 0.7;
const HIGH_CONFIDENCE: f64 = 0.7;
const LOW_EFFORT: f64 = 0.3;
const LOW_RISK: f64 = 0.3;

/// Direction-naive metrics in `[0, 1]` (effort and risk: lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetrics {
    pub effort: f64,
    pub risk: f64,
    pub alignment: f64,
    pub confidence: f64,
}

/// Per-metric share of the overall score (direction-corrected × weight).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricContributions {
    pub effort: f64,
    pub risk: f64,
    pub alignment: f64,
    pub confidence: f64,
}

impl MetricContributions {
    pub fn total(&self) -> f64 {
        self.effort + self.risk + self.alignment + self.confidence
    }
}

/// Weighted score of normalized metrics. `weights` must already be normalized.
pub fn weighted_contributions(
    metrics: &NormalizedMetrics,
    weights: &WeightVector,
) -> MetricContributions {
    MetricContributions {
        effort: (1.0 - metrics.effort) * weights.effort,
        risk: (1.0 - metrics.risk) * weights.risk,
        alignment: metrics.alignment * weights.alignment,
        confidence: metrics.confidence * weights.confidence,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub alternative_id: String,
    pub name: String,
    /// `[0, 1]`.
    pub overall: f64,
    pub metrics: NormalizedMetrics,
    pub contributions: MetricContributions,
    /// 1 = best.
    pub rank: usize,
    pub estimated_iterations: u32,
    pub justification: String,
}

/// The selected alternative with a human-readable rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub alternative_id: String,
    pub score: f64,
    pub estimated_iterations: u32,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub ranked: Vec<RankingEntry>,
    pub chosen: Choice,
    pub weights: WeightVector,
}

/// Rank alternatives by weighted score, best first.
///
/// Missing effort estimates default to mid-scale complexity/risk (5.0) and a
/// single iteration; missing alignment defaults to 0.5.
pub fn rank_alternatives(
    alternatives: &[Alternative],
    efforts: &[EffortEstimate],
    alignments: &[AlignmentResult],
    weights: &WeightVector,
) -> Result<Vec<RankingEntry>, DecisionError> {
    if alternatives.is_empty() {
        return Err(DecisionError::NoCandidates);
    }
    let weights = weights.normalized()?;

    let efforts_by_id: HashMap<&str, &EffortEstimate> = efforts
        .iter()
        .map(|e| (e.alternative_id.as_str(), e))
        .collect();
    let alignment_by_id: HashMap<&str, &AlignmentResult> = alignments
        .iter()
        .map(|a| (a.alternative_id.as_str(), a))
        .collect();

    let resolved: Vec<(EffortEstimate, f64)> = alternatives
        .iter()
        .map(|alt| {
            let effort = efforts_by_id
                .get(alt.id.as_str())
                .map(|e| (*e).clone())
                .unwrap_or_else(|| EffortEstimate::fallback(&alt.id));
            let alignment = alignment_by_id
                .get(alt.id.as_str())
                .map(|a| a.score)
                .unwrap_or_else(|| AlignmentResult::fallback(&alt.id).score);
            (effort, alignment)
        })
        .collect();

    let iteration_counts: Vec<f64> = resolved
        .iter()
        .map(|(e, _)| f64::from(e.iterations.expected))
        .collect();
    let min_iter = iteration_counts.iter().copied().fold(f64::INFINITY, f64::min);
    let max_iter = iteration_counts
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let range = if max_iter - min_iter == 0.0 {
        1.0
    } else {
        max_iter - min_iter
    };

    let mut entries: Vec<RankingEntry> = alternatives
        .iter()
        .zip(&resolved)
        .map(|(alt, (effort, alignment))| {
            let complexity = (effort.complexity / 10.0).clamp(0.0, 1.0);
            let risk = (effort.risk / 10.0).clamp(0.0, 1.0);
            let iterations = (f64::from(effort.iterations.expected) - min_iter) / range;
            let metrics = NormalizedMetrics {
                effort: 0.4 * complexity + 0.4 * risk + 0.2 * iterations,
                risk,
                alignment: alignment.clamp(0.0, 1.0),
                confidence: alt.confidence.clamp(0.0, 1.0),
            };
            let contributions = weighted_contributions(&metrics, &weights);
            RankingEntry {
                alternative_id: alt.id.clone(),
                name: alt.name.clone(),
                overall: contributions.total(),
                metrics,
                contributions,
                rank: 0,
                estimated_iterations: effort.iterations.expected,
                justification: entry_summary(contributions.total(), &metrics),
            }
        })
        .collect();

    sort_and_rank(&mut entries);
    Ok(entries)
}

/// Stable sort by overall score descending, then assign 1-based ranks.
pub(crate) fn sort_and_rank(entries: &mut [RankingEntry]) {
    entries.sort_by(|a, b| b.overall.total_cmp(&a.overall));
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.rank = idx + 1;
    }
}

/// Rank alternatives and pick the best one.
pub fn evaluate(
    alternatives: &[Alternative],
    efforts: &[EffortEstimate],
    alignments: &[AlignmentResult],
    weights: &WeightVector,
) -> Result<Evaluation, DecisionError> {
    let ranked = rank_alternatives(alternatives, efforts, alignments, weights)?;
    let chosen = choose(&ranked)?;
    Ok(Evaluation {
        ranked,
        chosen,
        weights: weights.normalized()?,
    })
}

/// Select the top ranked entry and justify it against the runner-up.
pub fn choose(ranked: &[RankingEntry]) -> Result<Choice, DecisionError> {
    let best = ranked.first().ok_or(DecisionError::NoCandidates)?;
    Ok(Choice {
        alternative_id: best.alternative_id.clone(),
        score: best.overall,
        estimated_iterations: best.estimated_iterations,
        justification: selection_justification(best, ranked.get(1)),
    })
}

fn entry_summary(overall: f64, metrics: &NormalizedMetrics) -> String {
    format!(
        "score {overall:.3} (effort {:.2}, risk {:.2}, alignment {:.2}, confidence {:.2})",
        metrics.effort, metrics.risk, metrics.alignment, metrics.confidence
    )
}

pub(crate) fn selection_justification(
    best: &RankingEntry,
    runner_up: Option<&RankingEntry>,
) -> String {
    let mut parts = vec![format!(
        "Chose '{}' with score {:.3}.",
        best.name, best.overall
    )];

    let m = &best.metrics;
    let mut strengths = Vec::new();
    if m.alignment >= STRONG_ALIGNMENT {
        strengths.push(format!("strong goal alignment ({:.2})", m.alignment));
    }
    if m.confidence >= HIGH_CONFIDENCE {
        strengths.push(format!("high confidence ({:.2})", m.confidence));
    }
    if m.effort <= LOW_EFFORT {
        strengths.push(format!("low effort ({:.2})", m.effort));
    }
    if m.risk <= LOW_RISK {
        strengths.push(format!("low risk ({:.2})", m.risk));
    }
    if !strengths.is_empty() {
        parts.push(format!("Strengths: {}.", strengths.join(", ")));
    }

    if let Some(second) = runner_up {
        if second.overall > 0.0 {
            let margin = (best.overall - second.overall) / second.overall * 100.0;
            parts.push(format!(
                "Leads runner-up '{}' by {margin:.1}%.",
                second.name
            ));
        } else {
            parts.push(format!("Runner-up '{}' scored 0.", second.name));
        }
    }

    parts.push(format!(
        "Estimated {} iteration(s) to completion.",
        best.estimated_iterations
    ));
    parts.join(" ")
}
