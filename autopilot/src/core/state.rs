//! Mutable session state owned by the control loop.
//!
//! Everything here is serialized into checkpoints, so a resumed session sees
//! exactly the counters, history and bounded memories it had when saved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::classifier::Classification;
use crate::core::diagnosis::Diagnosis;
use crate::core::recovery::RecoveryOutcome;
use crate::core::ring::RingBuffer;
use crate::core::types::{Assessment, IterationRecord, Reflection, ToolCall, ToolError};

/// Action signatures remembered for loop detection.
pub const SIGNATURE_WINDOW: usize = 10;
/// Failures remembered for the reflection prompt.
pub const FAILURE_WINDOW: usize = 5;
/// A signature occupying this many slots of the window marks the session stuck.
pub const REPEAT_OCCUPANCY: usize = 3;
/// A call signature that failed this often is skipped.
pub const MAX_SIGNATURE_FAILURES: u32 = 2;

/// One failed tool attempt together with what was done about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub iteration: u32,
    pub call: ToolCall,
    pub error: ToolError,
    pub classification: Classification,
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default)]
    pub recovery: Option<RecoveryOutcome>,
}

impl FailureRecord {
    /// Plain-text rendering for the next reflection prompt.
    pub fn render(&self) -> String {
        let mut out = format!(
            "iteration {}: `{}` failed: {} [{} / {:?}, confidence {:.2}]",
            self.iteration,
            self.call.describe(),
            self.error,
            self.classification.category,
            self.classification.severity,
            self.classification.confidence,
        );
        if let Some(diagnosis) = &self.diagnosis {
            out.push_str(&format!(
                "\n  root cause: {}",
                diagnosis.root_cause.description
            ));
            for (level, why) in diagnosis.why_chain.iter().enumerate() {
                out.push_str(&format!("\n  why {}: {why}", level + 1));
            }
        }
        match &self.recovery {
            Some(outcome) => out.push_str(&format!(
                "\n  recovery: {} ({})",
                if outcome.success {
                    "succeeded"
                } else if outcome.attempted {
                    "failed"
                } else {
                    "not attempted"
                },
                outcome.message
            )),
            None => out.push_str("\n  recovery: none"),
        }
        out
    }

    pub fn recovered(&self) -> bool {
        self.recovery.as_ref().is_some_and(|r| r.success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub iteration: u32,
    pub error_count: u32,
    pub no_progress_count: u32,
    /// `[0, 100]`.
    pub last_progress: f64,
    pub confidence: f64,
    pub completed: bool,
    pub history: Vec<IterationRecord>,
    pub artifacts: Vec<String>,
    pub reflections: Vec<Reflection>,
    pub action_signatures: RingBuffer<String>,
    pub recent_failures: RingBuffer<FailureRecord>,
    pub failed_signatures: BTreeMap<String, u32>,
    pub stuck: bool,
    pub clarification_requested: bool,
    #[serde(default)]
    pub pending_clarification: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            error_count: 0,
            no_progress_count: 0,
            last_progress: 0.0,
            confidence: 0.0,
            completed: false,
            history: Vec::new(),
            artifacts: Vec::new(),
            reflections: Vec::new(),
            action_signatures: RingBuffer::new(SIGNATURE_WINDOW),
            recent_failures: RingBuffer::new(FAILURE_WINDOW),
            failed_signatures: BTreeMap::new(),
            stuck: false,
            clarification_requested: false,
            pending_clarification: None,
        }
    }

    pub fn last_reflection(&self) -> Option<&Reflection> {
        self.reflections.last()
    }

    /// Store a reflection and update confidence, progress counters and the
    /// stuck flag. Returns whether progress improved.
    pub fn record_reflection(&mut self, reflection: Reflection) -> bool {
        let improved = reflection.progress > self.last_progress;
        if improved {
            self.no_progress_count = 0;
        } else {
            self.no_progress_count += 1;
        }
        self.last_progress = reflection.progress;
        self.confidence = reflection.confidence;
        if reflection.assessment == Assessment::Stuck {
            self.stuck = true;
        }
        self.reflections.push(reflection);
        improved
    }

    /// Remember the signature of this iteration's action.
    ///
    /// A run of identical consecutive signatures is left to the repeat
    /// criterion; a signature that returns after something else and already
    /// fills `REPEAT_OCCUPANCY` slots marks the session stuck (oscillation).
    pub fn record_action(&mut self, signature: String) {
        let extends_run = self.action_signatures.latest() == Some(&signature);
        self.action_signatures.push(signature);
        if extends_run {
            return;
        }
        let Some(latest) = self.action_signatures.latest() else {
            return;
        };
        let occupancy = self
            .action_signatures
            .iter()
            .filter(|sig| *sig == latest)
            .count();
        if occupancy >= REPEAT_OCCUPANCY {
            self.stuck = true;
        }
    }

    /// Length of the trailing run of identical action signatures.
    pub fn consecutive_repeats(&self) -> usize {
        let Some(latest) = self.action_signatures.latest() else {
            return 0;
        };
        self.action_signatures
            .iter()
            .rev()
            .take_while(|sig| *sig == latest)
            .count()
    }

    pub fn should_skip(&self, signature: &str) -> bool {
        self.failed_signatures
            .get(signature)
            .is_some_and(|count| *count >= MAX_SIGNATURE_FAILURES)
    }

    /// Record a failed call. Unrecovered failures count against the error budget.
    pub fn record_failure(&mut self, record: FailureRecord) {
        *self
            .failed_signatures
            .entry(record.call.signature())
            .or_insert(0) += 1;
        if !record.recovered() {
            self.error_count += 1;
        }
        self.recent_failures.push(record);
    }

    /// Count an iteration-level fault (backend crash, checkpoint failure, ...).
    pub fn record_iteration_error(&mut self) {
        self.error_count += 1;
    }

    pub fn add_artifacts<I: IntoIterator<Item = String>>(&mut self, artifacts: I) {
        for artifact in artifacts {
            if !self.artifacts.contains(&artifact) {
                self.artifacts.push(artifact);
            }
        }
    }

    /// Descriptions of the last `n` iterations, oldest first.
    pub fn recent_actions(&self, n: usize) -> Vec<String> {
        let skip = self.history.len().saturating_sub(n);
        self.history
            .iter()
            .skip(skip)
            .map(|record| format!("{}: {}", record.action, record.description))
            .collect()
    }

    /// Apply a user's answer to a clarification request.
    ///
    /// Soft-stop counters are reset so the session gets a fresh chance; hard
    /// caps (iterations, errors) are untouched.
    pub fn accept_clarification(&mut self, clarification: Option<String>) {
        self.pending_clarification = clarification.filter(|c| !c.trim().is_empty());
        self.stuck = false;
        self.no_progress_count = 0;
        self.action_signatures = RingBuffer::new(SIGNATURE_WINDOW);
    }
}
