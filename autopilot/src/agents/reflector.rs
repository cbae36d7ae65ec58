//! Per-iteration self-assessment.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, instrument};

use crate::core::types::{Assessment, Reflection, ToolIntent};
use crate::io::inference::{InferenceBackend, JudgeRequest, JudgementKind};
use crate::io::prompt::{ReflectionInputs, reflection_prompt};

pub const REFLECTION_SCHEMA: &str = include_str!("../../schemas/reflection.schema.json");

/// Confidence of the substituted reflection.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct Reflector {
    prompt_budget_bytes: usize,
}

impl Reflector {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    #[instrument(skip_all, fields(iteration = inputs.iteration))]
    pub fn reflect<B: InferenceBackend + ?Sized>(
        &self,
        backend: &B,
        inputs: &ReflectionInputs,
        timeout: Duration,
    ) -> Result<Reflection> {
        let prompt = reflection_prompt(inputs, self.prompt_budget_bytes)?;
        let value = backend.judge(&JudgeRequest {
            kind: JudgementKind::Reflection,
            prompt,
            schema: REFLECTION_SCHEMA,
            timeout,
        })?;
        let reflection: Reflection =
            serde_json::from_value(value).context("decode reflection")?;
        let reflection = reflection.sanitized();
        debug!(
            assessment = ?reflection.assessment,
            progress = reflection.progress,
            confidence = reflection.confidence,
            alternatives = reflection.alternatives.len(),
            "reflection received"
        );
        Ok(reflection)
    }
}

/// Reflection substituted when the backend cannot answer: keep going at the
/// last known progress and look around.
pub fn default_reflection(last_progress: f64) -> Reflection {
    Reflection {
        assessment: Assessment::Continue,
        progress: last_progress,
        confidence: FALLBACK_CONFIDENCE,
        next_action: "inspect the workspace".to_string(),
        tool: Some(ToolIntent {
            name: "list_dir".to_string(),
            args: json!({ "path": "." }),
            purpose: "re-orient after a failed reflection".to_string(),
        }),
        alternatives: Vec::new(),
        fallback: true,
    }
}
