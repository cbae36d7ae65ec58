//! Recovery plan execution.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::diagnosis::RecoveryPlan;
use crate::core::intent::is_permitted;
use crate::core::recovery::RecoveryOutcome;
use crate::io::tools::{ExecutionContext, ToolExecutor};

/// Run the plan's steps in order. The first failing step aborts the rest;
/// the recovery succeeds only if every attempted step succeeded. A plan
/// without steps is reported as not attempted.
///
/// `Err` is reserved for executor infrastructure failures.
#[instrument(skip_all, fields(steps = plan.steps.len()))]
pub fn execute_recovery<E: ToolExecutor + ?Sized>(
    executor: &E,
    plan: &RecoveryPlan,
    context: &ExecutionContext,
) -> Result<RecoveryOutcome> {
    if plan.steps.is_empty() {
        debug!("recovery plan has no steps");
        return Ok(RecoveryOutcome::not_attempted("no executable recovery steps"));
    }

    for (idx, step) in plan.steps.iter().enumerate() {
        if !is_permitted(&step.tool, &context.permitted_tools) {
            warn!(tool = %step.tool, "recovery step uses an unpermitted tool");
            return Ok(RecoveryOutcome {
                attempted: true,
                success: false,
                steps_run: idx,
                failed_step: Some(step.describe()),
                message: format!("step {} uses unpermitted tool '{}'", idx + 1, step.tool),
            });
        }
        let result = executor.execute(step, context)?;
        if let Some(error) = result.error {
            warn!(step = idx + 1, err = %error, "recovery step failed");
            return Ok(RecoveryOutcome {
                attempted: true,
                success: false,
                steps_run: idx + 1,
                failed_step: Some(step.describe()),
                message: format!("step {} failed: {error}", idx + 1),
            });
        }
    }

    info!(steps = plan.steps.len(), "recovery succeeded");
    Ok(RecoveryOutcome {
        attempted: true,
        success: true,
        steps_run: plan.steps.len(),
        failed_step: None,
        message: format!("{} step(s) succeeded", plan.steps.len()),
    })
}
