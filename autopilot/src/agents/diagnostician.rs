//! Root-cause diagnosis of failed tool calls.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::agents::{generate_id, now_rfc3339};
use crate::core::classifier::{Classification, ErrorCategory, Severity};
use crate::core::diagnosis::{
    Diagnosis, DiagnosisSource, FailureContext, LearningOpportunity, RecoveryStrategy, RootCause,
    heuristic_diagnosis,
};
use crate::core::intent::is_permitted;
use crate::core::recovery::plan_recovery;
use crate::io::inference::{InferenceBackend, JudgeRequest, JudgementKind};
use crate::io::prompt::{DiagnosisInputs, diagnosis_prompt};

pub const DIAGNOSIS_SCHEMA: &str = include_str!("../../schemas/diagnosis.schema.json");

const ALL_CATEGORIES: [ErrorCategory; 12] = [
    ErrorCategory::CommandNotFound,
    ErrorCategory::PermissionDenied,
    ErrorCategory::FileNotFound,
    ErrorCategory::Timeout,
    ErrorCategory::Network,
    ErrorCategory::Syntax,
    ErrorCategory::InvalidArguments,
    ErrorCategory::ResourceExhausted,
    ErrorCategory::Dependency,
    ErrorCategory::ToolNotPermitted,
    ErrorCategory::RateLimited,
    ErrorCategory::Unknown,
];

/// Backend answer before ids, timestamps and the plan are attached.
#[derive(Debug, Deserialize)]
struct JudgedDiagnosis {
    why_chain: Vec<String>,
    root_cause: RootCause,
    severity: Severity,
    recoverable: bool,
    alternatives: Vec<RecoveryStrategy>,
    #[serde(default)]
    learning: Option<LearningOpportunity>,
}

fn strategy_is_permitted(strategy: &RecoveryStrategy, permitted: &[String]) -> bool {
    strategy
        .required_tools
        .iter()
        .chain(strategy.steps.iter().map(|step| &step.tool))
        .all(|tool| is_permitted(tool, permitted))
}

fn inputs_for(context: &FailureContext, classification: &Classification) -> DiagnosisInputs {
    DiagnosisInputs {
        goal: context.goal.clone(),
        iteration: context.iteration,
        call: context.call.describe(),
        error: context.error.message.clone(),
        exit_code: context.error.exit_code,
        signal: context.error.signal.clone(),
        stdout: context.error.stdout.clone(),
        stderr: context.error.stderr.clone(),
        classification: classification.category.to_string(),
        classification_confidence: classification.confidence,
        recent_actions: context.recent_actions.clone(),
        tools: context.permitted_tools.clone(),
        categories: ALL_CATEGORIES
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostician {
    prompt_budget_bytes: usize,
}

impl Diagnostician {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Ask the backend for a diagnosis. Strategies needing unpermitted tools
    /// are discarded before normalization.
    #[instrument(skip_all, fields(tool = %context.call.tool, iteration = context.iteration))]
    pub fn judge<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        context: &FailureContext,
        classification: &Classification,
        timeout: Duration,
    ) -> Result<Diagnosis> {
        let prompt = diagnosis_prompt(
            &inputs_for(context, classification),
            self.prompt_budget_bytes,
        )?;
        let value = backend.judge(&JudgeRequest {
            kind: JudgementKind::Diagnosis,
            prompt,
            schema: DIAGNOSIS_SCHEMA,
            timeout,
        })?;
        let judged: JudgedDiagnosis =
            serde_json::from_value(value).context("decode diagnosis")?;
        let alternatives = judged
            .alternatives
            .into_iter()
            .filter(|s| strategy_is_permitted(s, &context.permitted_tools))
            .collect();
        Ok(Diagnosis {
            id: generate_id("diag"),
            timestamp: now_rfc3339(),
            why_chain: judged.why_chain,
            root_cause: judged.root_cause,
            severity: judged.severity,
            recoverable: judged.recoverable,
            alternatives,
            recovery_plan: None,
            learning: judged.learning,
            source: DiagnosisSource::Judgement,
        }
        .normalized())
    }

    /// Judgement first, heuristic on any backend fault; the recovery plan is
    /// attached either way.
    pub fn diagnose<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        context: &FailureContext,
        classification: &Classification,
        timeout: Duration,
    ) -> Diagnosis {
        let mut diagnosis = match self.judge(backend, context, classification, timeout) {
            Ok(diagnosis) => diagnosis,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "diagnosis judgement failed, using heuristic");
                heuristic_diagnosis(
                    context,
                    classification,
                    generate_id("diag"),
                    now_rfc3339(),
                )
            }
        };
        diagnosis.recovery_plan = Some(plan_recovery(&diagnosis));
        debug!(
            source = ?diagnosis.source,
            category = %diagnosis.root_cause.category,
            recoverable = diagnosis.recoverable,
            "diagnosis ready"
        );
        diagnosis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify;
    use crate::core::diagnosis::WHY_CHAIN_LEN;
    use crate::core::types::{ToolCall, ToolError};
    use crate::test_support::ScriptedBackend;
    use serde_json::json;

    fn context() -> FailureContext {
        FailureContext {
            call: ToolCall::new("shell", json!({"command": "cargo-nextest run"})),
            error: ToolError {
                message: "command exited with status 127".to_string(),
                exit_code: Some(127),
                stderr: Some("sh: cargo-nextest: not found".to_string()),
                ..ToolError::default()
            },
            iteration: 3,
            recent_actions: vec!["tool: read_file Cargo.toml".to_string()],
            permitted_tools: vec!["shell".to_string(), "read_file".to_string()],
            goal: "Run the test suite".to_string(),
        }
    }

    #[test]
    fn judged_diagnosis_is_normalized_and_filtered() {
        let ctx = context();
        let classification = classify(&ctx.call, &ctx.error);
        let backend = ScriptedBackend::new();
        backend.push_diagnosis(json!({
            "why_chain": ["nextest missing", "not installed"],
            "root_cause": {
                "category": "command_not_found",
                "description": "cargo-nextest is not installed",
                "confidence": 0.9
            },
            "severity": "recoverable",
            "recoverable": true,
            "alternatives": [
                {
                    "name": "install nextest",
                    "required_tools": ["installer"],
                    "description": "install it",
                    "confidence": 0.95,
                    "estimated_iterations": 2,
                    "steps": []
                },
                {
                    "name": "use cargo test",
                    "required_tools": ["shell"],
                    "description": "fall back to the builtin runner",
                    "confidence": 0.8,
                    "estimated_iterations": 1,
                    "steps": [{"tool": "shell", "args": {"command": "cargo test"}}]
                }
            ],
            "learning": null
        }));

        let diagnosis = Diagnostician::new(10_000).diagnose(
            &backend,
            &ctx,
            &classification,
            Duration::from_secs(1),
        );
        assert_eq!(diagnosis.source, DiagnosisSource::Judgement);
        assert_eq!(diagnosis.why_chain.len(), WHY_CHAIN_LEN);
        assert_eq!(diagnosis.alternatives.len(), 1);
        assert_eq!(diagnosis.alternatives[0].name, "use cargo test");
        let plan = diagnosis.recovery_plan.expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.fallback_chain.is_empty());

        let prompt = &backend.requests()[0].prompt;
        assert!(prompt.contains("Exit code: 127"));
        assert!(prompt.contains("command_not_found"));
    }

    #[test]
    fn backend_failure_falls_back_to_heuristic() {
        let ctx = context();
        let classification = classify(&ctx.call, &ctx.error);
        let backend = ScriptedBackend::new();
        let diagnosis = Diagnostician::new(10_000).diagnose(
            &backend,
            &ctx,
            &classification,
            Duration::from_secs(1),
        );
        assert_eq!(diagnosis.source, DiagnosisSource::Heuristic);
        assert_eq!(diagnosis.root_cause.category, ErrorCategory::CommandNotFound);
        assert!(diagnosis.recoverable);
        assert!(!diagnosis.alternatives.is_empty());
        assert!(diagnosis.recovery_plan.is_some());
        assert!(diagnosis.id.starts_with("diag-"));
    }
}
