//! Effort estimation for candidate plans.
//!
//! Produces a complexity score, a likelihood × impact risk score and an
//! iteration band for one alternative. Pure function of the alternative.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{Alternative, ToolCall};

/// Complexity sub-factor weights: step count, tool diversity, assumptions,
/// prerequisites, uncertainty.
const FACTOR_WEIGHTS: [f64; 5] = [0.30, 0.20, 0.15, 0.15, 0.20];

/// Score used when an estimate is missing for an alternative.
pub const FALLBACK_SCORE: f64 = 5.0;

/// Weighted sub-factors of the complexity score, each in `[0, 10]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityFactors {
    pub step_count: f64,
    pub tool_diversity: f64,
    pub assumptions: f64,
    pub prerequisites: f64,
    pub uncertainty: f64,
}

impl ComplexityFactors {
    pub fn weighted_score(&self) -> f64 {
        let scores = [
            self.step_count,
            self.tool_diversity,
            self.assumptions,
            self.prerequisites,
            self.uncertainty,
        ];
        scores
            .iter()
            .zip(FACTOR_WEIGHTS)
            .map(|(score, weight)| score * weight)
            .sum::<f64>()
            .clamp(0.0, 10.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Probability in `[0, 1]`.
    pub likelihood: f64,
    /// Damage if it happens, in `[0, 10]`.
    pub impact: f64,
}

impl RiskFactor {
    pub fn score(&self) -> f64 {
        self.likelihood * self.impact
    }
}

/// Expected iteration count with a min/max band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationEstimate {
    pub expected: u32,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortEstimate {
    pub alternative_id: String,
    /// `[0, 10]`, lower is easier.
    pub complexity: f64,
    pub factors: ComplexityFactors,
    /// `[0, 10]`, lower is safer.
    pub risk: f64,
    pub risk_factors: Vec<RiskFactor>,
    pub iterations: IterationEstimate,
}

impl EffortEstimate {
    /// Mid-scale estimate used when no estimate exists for an alternative.
    pub fn fallback(alternative_id: &str) -> Self {
        Self {
            alternative_id: alternative_id.to_string(),
            complexity: FALLBACK_SCORE,
            factors: ComplexityFactors {
                step_count: FALLBACK_SCORE,
                tool_diversity: FALLBACK_SCORE,
                assumptions: FALLBACK_SCORE,
                prerequisites: FALLBACK_SCORE,
                uncertainty: FALLBACK_SCORE,
            },
            risk: FALLBACK_SCORE,
            risk_factors: Vec::new(),
            iterations: IterationEstimate {
                expected: 1,
                min: 1,
                max: 1,
            },
        }
    }
}

/// Estimate complexity, risk and iterations for one alternative.
pub fn estimate_effort(alternative: &Alternative) -> EffortEstimate {
    let factors = complexity_factors(alternative);
    let complexity = factors.weighted_score();
    let risk_factors = risk_factors(alternative);
    let risk = risk_factors
        .iter()
        .map(RiskFactor::score)
        .sum::<f64>()
        .clamp(0.0, 10.0);
    let iterations = estimate_iterations(alternative.steps.len(), complexity, risk);

    EffortEstimate {
        alternative_id: alternative.id.clone(),
        complexity,
        factors,
        risk,
        risk_factors,
        iterations,
    }
}

fn complexity_factors(alternative: &Alternative) -> ComplexityFactors {
    let steps = alternative.steps.len() as f64;
    let distinct_tools = alternative
        .steps
        .iter()
        .map(|step| step.tool.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len() as f64;
    let confidence = alternative.confidence.clamp(0.0, 1.0);

    ComplexityFactors {
        step_count: (steps * 1.5).min(10.0),
        tool_diversity: (distinct_tools * 2.5).min(10.0),
        assumptions: (alternative.assumptions.len() as f64 * 2.0).min(10.0),
        prerequisites: (alternative.prerequisites.len() as f64 * 2.0).min(10.0),
        uncertainty: (1.0 - confidence) * 10.0,
    }
}

/// Per-step hazard classification: (name, likelihood, impact).
fn step_hazard(step: &ToolCall) -> Option<(&'static str, f64, f64)> {
    static DESTRUCTIVE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(^|[\s;&|])(rm|mv|chmod|chown|sudo|dd|mkfs|truncate|kill)\s|>\s*\S")
            .expect("destructive pattern should be valid")
    });
    static NETWORK: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(curl|wget|ssh|scp|git\s+(push|pull|clone)|pip\s+install|npm\s+install|cargo\s+install)\b")
            .expect("network pattern should be valid")
    });

    match step.tool.as_str() {
        "read_file" | "list_dir" | "search" => None,
        "write_file" => Some(("modifies files", 0.3, 5.0)),
        "shell" => {
            let command = step.arg_str("command").unwrap_or_default();
            if DESTRUCTIVE.is_match(command) {
                Some(("destructive shell command", 0.6, 8.0))
            } else if NETWORK.is_match(command) {
                Some(("network access", 0.3, 4.0))
            } else {
                Some(("shell execution", 0.2, 4.0))
            }
        }
        _ => Some(("unfamiliar tool", 0.2, 3.0)),
    }
}

fn risk_factors(alternative: &Alternative) -> Vec<RiskFactor> {
    // Same-named hazards combine as "at least one occurrence goes wrong".
    let mut hazards: BTreeMap<&'static str, (f64, f64)> = BTreeMap::new();
    for step in &alternative.steps {
        if let Some((name, likelihood, impact)) = step_hazard(step) {
            let entry = hazards.entry(name).or_insert((0.0, impact));
            entry.0 = 1.0 - (1.0 - entry.0) * (1.0 - likelihood);
        }
    }

    let mut factors: Vec<RiskFactor> = hazards
        .into_iter()
        .map(|(name, (likelihood, impact))| RiskFactor {
            name: name.to_string(),
            likelihood,
            impact,
        })
        .collect();

    if !alternative.assumptions.is_empty() {
        factors.push(RiskFactor {
            name: "unverified assumptions".to_string(),
            likelihood: (alternative.assumptions.len() as f64 * 0.1).min(0.6),
            impact: 5.0,
        });
    }
    if !alternative.prerequisites.is_empty() {
        factors.push(RiskFactor {
            name: "unmet prerequisites".to_string(),
            likelihood: (alternative.prerequisites.len() as f64 * 0.15).min(0.6),
            impact: 4.0,
        });
    }
    let doubt = 1.0 - alternative.confidence.clamp(0.0, 1.0);
    if doubt > 0.0 {
        factors.push(RiskFactor {
            name: "low self-reported confidence".to_string(),
            likelihood: doubt,
            impact: 3.0,
        });
    }
    factors
}

fn estimate_iterations(steps: usize, complexity: f64, risk: f64) -> IterationEstimate {
    let steps = steps.max(1) as f64;
    let mut expected = (steps * (1.0 + complexity / 20.0)).round() as u32;
    if risk > 5.0 {
        expected += 1;
    }
    let expected = expected.max(1);
    let min = (steps as u32).min(expected).max(1);
    let max = ((expected as f64) * (1.0 + risk / 10.0)).ceil() as u32;
    IterationEstimate {
        expected,
        min,
        max: max.max(expected),
    }
}
