//! Agent configuration shared by every component.
//!
//! One `AgentConfig` is loaded per process and injected (by reference or by
//! cloned section) into the session loop, the evaluators, the weight learner
//! and the I/O adapters. Defaults live here and nowhere else.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::DecisionError;
use crate::core::multi_step::RiskStrategy;
use crate::core::weights::WeightVector;

/// Agent configuration (TOML).
///
/// Missing fields default to the values below, so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(rename = "loop")]
    pub session: LoopConfig,
    pub decision: DecisionConfig,
    pub learner: LearnerConfig,
    pub inference: InferenceConfig,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Hard iteration cap.
    pub max_iterations: u32,
    /// Hard cap on counted errors (iteration faults and unrecovered tool failures).
    pub max_errors: u32,
    /// Save a checkpoint every N iterations.
    pub checkpoint_interval: u32,
    /// Ask for clarification instead of terminating on soft stop criteria.
    pub interactive: bool,
    /// Minimum self-reported confidence for a `complete` assessment to stop the loop.
    pub completion_confidence: f64,
    /// Consecutive non-improving progress reports before stopping.
    pub stall_limit: u32,
    /// Identical consecutive action signatures before stopping.
    pub repeat_limit: u32,
    /// Session wall-clock budget in seconds (0 disables it).
    pub session_timeout_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_errors: 5,
            checkpoint_interval: 3,
            interactive: false,
            completion_confidence: 0.9,
            stall_limit: 3,
            repeat_limit: 3,
            session_timeout_secs: 0,
        }
    }
}

/// How plan alignment is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Deterministic keyword overlap.
    Heuristic,
    /// Ask the inference backend, falling back to the heuristic.
    Judgement,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecisionConfig {
    /// Process-wide default scoring weights.
    pub default_weights: WeightVector,
    /// Per-step interaction multiplier for compound path complexity.
    pub compound_factor: f64,
    pub risk_strategy: RiskStrategy,
    pub alignment_mode: AlignmentMode,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            default_weights: WeightVector::new(0.35, 0.25, 0.30, 0.10),
            compound_factor: 1.2,
            risk_strategy: RiskStrategy::Max,
            alignment_mode: AlignmentMode::Heuristic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearnerConfig {
    /// Outcome samples required before deviating from the defaults.
    pub min_samples: usize,
    /// Sample count at which learned weights are fully trusted.
    pub blend_threshold: usize,
    /// How far the success mean is pushed away from the failure mean.
    pub learning_rate: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            blend_threshold: 20,
            learning_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Backend command. `{schema}` and `{output}` are replaced with file paths;
    /// the prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Rendered prompts above this size lose their least important sections.
    pub prompt_budget_bytes: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "--output-schema".to_string(),
                "{schema}".to_string(),
                "--output-last-message".to_string(),
                "{output}".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 120,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools the agent may invoke.
    pub allowed: Vec<String>,
    pub shell_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed: ["shell", "read_file", "write_file", "list_dir", "search"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            shell_timeout_secs: 60,
            output_limit_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub checkpoint_dir: PathBuf,
    pub outcomes_path: PathBuf,
    /// Finished-session log that feeds prompt priors.
    pub episodes_path: PathBuf,
    /// Schema and output files exchanged with the inference command.
    pub scratch_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(".autopilot/checkpoints"),
            outcomes_path: PathBuf::from(".autopilot/outcomes.jsonl"),
            episodes_path: PathBuf::from(".autopilot/episodes.jsonl"),
            scratch_dir: PathBuf::from(".autopilot/scratch"),
        }
    }
}

impl LoopConfig {
    /// Also applied to loop settings restored from a checkpoint.
    pub fn validate(&self) -> Result<(), DecisionError> {
        let invalid = |msg: &str| Err(DecisionError::InvalidConfig(msg.to_string()));
        if self.max_iterations == 0 {
            return invalid("loop.max_iterations must be > 0");
        }
        if self.max_errors == 0 {
            return invalid("loop.max_errors must be > 0");
        }
        if self.checkpoint_interval == 0 {
            return invalid("loop.checkpoint_interval must be > 0");
        }
        if !(0.0..=1.0).contains(&self.completion_confidence) {
            return invalid("loop.completion_confidence must be within [0, 1]");
        }
        if self.stall_limit == 0 || self.repeat_limit == 0 {
            return invalid("loop.stall_limit and loop.repeat_limit must be > 0");
        }
        Ok(())
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), DecisionError> {
        let invalid = |msg: &str| Err(DecisionError::InvalidConfig(msg.to_string()));
        self.session.validate()?;
        self.decision.default_weights.normalized()?;
        if !self.decision.compound_factor.is_finite() || self.decision.compound_factor < 1.0 {
            return invalid("decision.compound_factor must be >= 1.0");
        }
        if self.learner.blend_threshold == 0 {
            return invalid("learner.blend_threshold must be > 0");
        }
        if !(0.0..=1.0).contains(&self.learner.learning_rate) {
            return invalid("learner.learning_rate must be within [0, 1]");
        }
        if self.inference.command.is_empty() || self.inference.command[0].trim().is_empty() {
            return invalid("inference.command must be a non-empty array");
        }
        if self.inference.timeout_secs == 0 || self.tools.shell_timeout_secs == 0 {
            return invalid("timeouts must be > 0");
        }
        if self.inference.output_limit_bytes == 0
            || self.tools.output_limit_bytes == 0
            || self.inference.prompt_budget_bytes == 0
        {
            return invalid("output limits must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AgentConfig::default().validate().expect("valid");
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(DecisionConfig::default().default_weights.is_normalized());
    }

    #[test]
    fn zero_checkpoint_interval_is_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.session.checkpoint_interval = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("checkpoint_interval"));
    }

    #[test]
    fn negative_default_weights_are_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.decision.default_weights = WeightVector::new(-1.0, 1.0, 1.0, 1.0);
        assert!(matches!(
            cfg.validate(),
            Err(DecisionError::InvalidWeights(_))
        ));
    }
}
