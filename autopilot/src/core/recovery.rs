//! Recovery-plan synthesis from a diagnosis.

use serde::{Deserialize, Serialize};

use crate::core::diagnosis::{Diagnosis, RecoveryPlan};

/// Turn the best-ranked alternative into ordered steps; the remaining
/// alternatives become the fallback chain. Unrecoverable diagnoses get an
/// empty plan.
pub fn plan_recovery(diagnosis: &Diagnosis) -> RecoveryPlan {
    if !diagnosis.recoverable {
        return RecoveryPlan {
            steps: Vec::new(),
            fallback_chain: Vec::new(),
        };
    }
    let mut alternatives = diagnosis.alternatives.iter();
    let steps = alternatives
        .next()
        .map(|best| best.steps.clone())
        .unwrap_or_default();
    RecoveryPlan {
        steps,
        fallback_chain: alternatives.map(|alt| alt.name.clone()).collect(),
    }
}

/// Result of executing a recovery plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// False when the plan had no steps.
    pub attempted: bool,
    /// True iff every attempted step succeeded.
    pub success: bool,
    pub steps_run: usize,
    #[serde(default)]
    pub failed_step: Option<String>,
    pub message: String,
}

impl RecoveryOutcome {
    pub fn not_attempted(reason: impl Into<String>) -> Self {
        Self {
            attempted: false,
            success: false,
            steps_run: 0,
            failed_step: None,
            message: reason.into(),
        }
    }
}
