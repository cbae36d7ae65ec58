//! Adaptive weight learning from recorded outcomes.
//!
//! Pure: the caller supplies the samples for one category (see
//! `decide::learn_weights` for the store-backed wrapper).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LearnerConfig;
use crate::core::types::TaskCategory;
use crate::core::weights::WeightVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Weights that were in effect for a finished session, and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub category: TaskCategory,
    pub outcome: Outcome,
    pub weights: WeightVector,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnMethod {
    Default,
    InsufficientSuccess,
    Blended,
    Learned,
}

impl fmt::Display for LearnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LearnMethod::Default => "default",
            LearnMethod::InsufficientSuccess => "insufficient_success",
            LearnMethod::Blended => "blended",
            LearnMethod::Learned => "learned",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedWeights {
    pub weights: WeightVector,
    /// Blend factor actually applied, in `[0, 1]`.
    pub confidence: f64,
    pub data_points: usize,
    pub method: LearnMethod,
}

impl LearnedWeights {
    fn defaults(defaults: WeightVector, data_points: usize, method: LearnMethod) -> Self {
        Self {
            weights: defaults,
            confidence: 0.0,
            data_points,
            method,
        }
    }
}

/// Learn a weight vector from outcome samples of one category.
///
/// Below `min_samples`, or without any successful sample, the defaults are
/// returned unchanged. Otherwise the success mean is pushed away from the
/// failure mean, renormalized, and blended with the defaults by
/// `min(n / blend_threshold, 1)`.
pub fn learn_weights(
    samples: &[OutcomeSample],
    defaults: &WeightVector,
    config: &LearnerConfig,
) -> LearnedWeights {
    let n = samples.len();
    if n < config.min_samples {
        return LearnedWeights::defaults(*defaults, n, LearnMethod::Default);
    }

    let successes: Vec<WeightVector> = samples
        .iter()
        .filter(|s| s.outcome == Outcome::Success)
        .map(|s| s.weights)
        .collect();
    let failures: Vec<WeightVector> = samples
        .iter()
        .filter(|s| s.outcome == Outcome::Failure)
        .map(|s| s.weights)
        .collect();

    let Some(success_mean) = WeightVector::mean(&successes) else {
        return LearnedWeights::defaults(*defaults, n, LearnMethod::InsufficientSuccess);
    };

    let pushed = match WeightVector::mean(&failures) {
        Some(failure_mean) => {
            let rate = config.learning_rate;
            WeightVector::new(
                success_mean.effort + rate * (success_mean.effort - failure_mean.effort),
                success_mean.risk + rate * (success_mean.risk - failure_mean.risk),
                success_mean.alignment
                    + rate * (success_mean.alignment - failure_mean.alignment),
                success_mean.confidence
                    + rate * (success_mean.confidence - failure_mean.confidence),
            )
        }
        None => success_mean,
    };

    let Ok(learned) = pushed.clamp_non_negative().normalized() else {
        return LearnedWeights::defaults(*defaults, n, LearnMethod::InsufficientSuccess);
    };

    let blend = (n as f64 / config.blend_threshold.max(1) as f64).min(1.0);
    let weights = defaults
        .blend(&learned, blend)
        .normalized()
        .unwrap_or(*defaults);

    LearnedWeights {
        weights,
        confidence: blend,
        data_points: n,
        method: if blend >= 1.0 {
            LearnMethod::Learned
        } else {
            LearnMethod::Blended
        },
    }
}
