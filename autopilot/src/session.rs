//! The iteration control loop.
//!
//! One `AgentSession` drives a task to a terminal state: check the stopping
//! criteria, checkpoint on cadence, reflect, decode the next action, execute
//! it step by step (diagnosing and recovering failed steps) and record the
//! iteration. Faults inside an iteration are counted against the error
//! budget and never escape [`AgentSession::run`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::agents::diagnostician::Diagnostician;
use crate::agents::reflector::{Reflector, default_reflection};
use crate::agents::{generate_id, now_rfc3339};
use crate::config::{AgentConfig, LoopConfig};
use crate::core::budget::SessionBudget;
use crate::core::classifier::classify;
use crate::core::diagnosis::FailureContext;
use crate::core::intent::{ActionIntent, action_signature, decode_intent};
use crate::core::learner::{Outcome, OutcomeSample};
use crate::core::recovery::RecoveryOutcome;
use crate::core::state::{FailureRecord, SessionState};
use crate::core::stopping::{StopDecision, check_stop};
use crate::core::types::{
    IterationRecord, SessionStatus, StepRecord, StepStatus, StopReason, Task, ToolCall,
};
use crate::core::weights::WeightVector;
use crate::decide::{DecisionEngine, learn_weights};
use crate::io::checkpoint::{Checkpoint, CheckpointSettings, CheckpointStore};
use crate::io::inference::InferenceBackend;
use crate::io::outcomes::OutcomeStore;
use crate::io::priors::{NoPriors, PriorSource, Priors, load_priors};
use crate::io::prompt::ReflectionInputs;
use crate::io::tools::{ExecutionContext, ToolExecutor};
use crate::recover::execute_recovery;

/// Iterations shown in the reflection prompt and passed to diagnosis.
const RECENT_ACTIONS: usize = 5;
const STEP_SUMMARY_CHARS: usize = 200;

static NO_PRIORS: NoPriors = NoPriors;

/// Per-run environment: where tools operate and how to ask the loop to stop.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workspace_root: PathBuf,
    stop: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag; setting it stops the loop before its next iteration.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Final report of a run or resume.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub session_id: String,
    pub task: Task,
    pub completed: bool,
    pub reason: StopReason,
    pub status: SessionStatus,
    /// For `needs_clarification`: the criterion that triggered the request.
    pub clarification_cause: Option<StopReason>,
    pub iterations: u32,
    pub confidence: f64,
    pub history: Vec<IterationRecord>,
    pub artifacts: Vec<String>,
    pub weights: WeightVector,
    pub summary: String,
}

pub struct AgentSession<'a> {
    config: &'a AgentConfig,
    backend: &'a dyn InferenceBackend,
    checkpoints: &'a dyn CheckpointStore,
    outcomes: &'a dyn OutcomeStore,
    priors: &'a dyn PriorSource,
}

/// Everything a single drive of the loop needs besides the state.
struct Drive<'r> {
    session_id: String,
    task: Task,
    weights: WeightVector,
    loop_config: LoopConfig,
    tools: &'r dyn ToolExecutor,
    context: &'r RunContext,
    exec_context: ExecutionContext,
    budget: SessionBudget,
    priors: Priors,
}

impl<'a> AgentSession<'a> {
    pub fn new(
        config: &'a AgentConfig,
        backend: &'a dyn InferenceBackend,
        checkpoints: &'a dyn CheckpointStore,
        outcomes: &'a dyn OutcomeStore,
    ) -> Self {
        Self {
            config,
            backend,
            checkpoints,
            outcomes,
            priors: &NO_PRIORS,
        }
    }

    pub fn with_priors(self, priors: &'a dyn PriorSource) -> Self {
        Self { priors, ..self }
    }

    /// Start a new session for `task`.
    ///
    /// Returns `Err` only for an invalid configuration.
    pub fn run(
        &self,
        task: Task,
        tools: &dyn ToolExecutor,
        context: &RunContext,
    ) -> Result<RunOutcome> {
        self.config.validate().context("invalid agent config")?;
        let session_id = generate_id("session");
        let weights = match learn_weights(
            self.outcomes,
            task.category,
            &self.config.decision,
            &self.config.learner,
        ) {
            Ok(learned) => learned.weights,
            Err(err) => {
                warn!(
                    err = %format!("{err:#}"),
                    "outcome store unavailable, using default weights"
                );
                self.config.decision.default_weights
            }
        };
        info!(
            session_id = %session_id,
            category = %task.category,
            goal = %task.goal,
            "session started"
        );
        let drive = self.prepare(
            session_id,
            task,
            weights,
            self.config.session.clone(),
            tools,
            context,
        );
        Ok(self.drive(drive, SessionState::new()))
    }

    /// Continue a checkpointed session, optionally with the user's answer to
    /// a clarification request.
    ///
    /// Returns `Err` for an invalid configuration, an unreadable or invalid
    /// checkpoint, or a session that already finished.
    pub fn resume(
        &self,
        session_id: &str,
        tools: &dyn ToolExecutor,
        context: &RunContext,
        clarification: Option<String>,
    ) -> Result<RunOutcome> {
        self.config.validate().context("invalid agent config")?;
        let checkpoint = self
            .checkpoints
            .load(session_id)
            .with_context(|| format!("load checkpoint for session {session_id}"))?;
        if let Some(reason) = checkpoint.stop_reason {
            bail!("session {session_id} already finished ({reason})");
        }
        let loop_config = checkpoint.settings.apply_to(&self.config.session);
        loop_config
            .validate()
            .with_context(|| format!("invalid loop settings in checkpoint for {session_id}"))?;
        let mut state = checkpoint.state;
        state.accept_clarification(clarification);
        info!(
            session_id = %session_id,
            iteration = state.iteration,
            "session resumed"
        );
        let drive = self.prepare(
            checkpoint.session_id,
            checkpoint.task,
            checkpoint.weights,
            loop_config,
            tools,
            context,
        );
        Ok(self.drive(drive, state))
    }

    fn prepare<'r>(
        &self,
        session_id: String,
        task: Task,
        weights: WeightVector,
        loop_config: LoopConfig,
        tools: &'r dyn ToolExecutor,
        context: &'r RunContext,
    ) -> Drive<'r> {
        let priors = load_priors(self.priors, &task);
        Drive {
            session_id,
            task,
            weights,
            budget: SessionBudget::start(loop_config.session_timeout_secs),
            loop_config,
            tools,
            context,
            exec_context: ExecutionContext::new(&context.workspace_root, &self.config.tools),
            priors,
        }
    }

    fn drive(&self, drive: Drive<'_>, mut state: SessionState) -> RunOutcome {
        loop {
            if drive.budget.is_exhausted() {
                warn!("session time budget exhausted");
                return self.finish(&drive, state, StopReason::MaxIterations, None);
            }
            match check_stop(&state, &drive.loop_config, drive.context.stop_requested()) {
                StopDecision::Continue => {}
                StopDecision::Stop(reason) => {
                    return self.finish(&drive, state, reason, None);
                }
                StopDecision::Clarify(cause) => {
                    info!(cause = %cause, "asking for clarification");
                    state.clarification_requested = true;
                    return self.finish(&drive, state, StopReason::NeedsClarification, Some(cause));
                }
            }

            if state.iteration > 0 && state.iteration % drive.loop_config.checkpoint_interval == 0
            {
                let checkpoint = self.checkpoint(&drive, &state, None);
                if let Err(err) = self.checkpoints.save(&drive.session_id, &checkpoint) {
                    warn!(err = %format!("{err:#}"), "checkpoint save failed");
                    state.record_iteration_error();
                }
            }

            state.iteration += 1;
            let iteration = state.iteration;
            debug!(iteration, "iteration started");
            // Faults before any step runs; step faults are recorded in place.
            if let Err(err) = self.iterate(&drive, &mut state) {
                warn!(iteration, err = %format!("{err:#}"), "iteration failed");
                state.record_iteration_error();
                state.history.push(IterationRecord {
                    iteration,
                    action: "error".to_string(),
                    description: format!("{err:#}"),
                    steps: Vec::new(),
                    tools_used: Vec::new(),
                    artifacts: Vec::new(),
                    progress: state.last_progress,
                    confidence: state.confidence,
                });
            }
        }
    }

    fn iterate(&self, drive: &Drive<'_>, state: &mut SessionState) -> Result<()> {
        let inference_timeout = drive
            .budget
            .call_timeout(Duration::from_secs(self.config.inference.timeout_secs))?;
        let budget_bytes = self.config.inference.prompt_budget_bytes;

        let inputs = self.reflection_inputs(drive, state);
        let reflection = match Reflector::new(budget_bytes).reflect(
            self.backend,
            &inputs,
            inference_timeout,
        ) {
            Ok(reflection) => reflection,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reflection failed, substituting default");
                default_reflection(state.last_progress)
            }
        };
        // Consumed by the reflection it was shown to.
        state.pending_clarification = None;
        let improved = state.record_reflection(reflection.clone());
        debug!(
            progress = reflection.progress,
            improved,
            no_progress = state.no_progress_count,
            "progress recorded"
        );

        let permitted = &self.config.tools.allowed;
        let intent = decode_intent(&reflection, drive.task.category, permitted);
        let (calls, description) = match &intent {
            ActionIntent::Plan(alternatives) if alternatives.len() >= 2 => {
                let evaluation = DecisionEngine::new(&self.config.decision, budget_bytes)
                    .evaluate(
                        self.backend,
                        &drive.task.goal,
                        alternatives,
                        &drive.weights,
                        inference_timeout,
                    )?;
                let chosen = alternatives
                    .iter()
                    .find(|alt| alt.id == evaluation.chosen.alternative_id)
                    .context("chosen alternative missing from candidates")?;
                (
                    chosen.steps.clone(),
                    format!("{}: {}", chosen.name, evaluation.chosen.justification),
                )
            }
            ActionIntent::Plan(alternatives) => match alternatives.first() {
                Some(only) => (only.steps.clone(), only.name.clone()),
                None => (Vec::new(), "empty plan".to_string()),
            },
            ActionIntent::Tool(call)
            | ActionIntent::Inferred(call)
            | ActionIntent::Inspect(call) => (vec![call.clone()], call.describe()),
            ActionIntent::Idle => (Vec::new(), "no action".to_string()),
        };
        debug!(kind = intent.kind(), steps = calls.len(), "action decoded");

        if !calls.is_empty() {
            state.record_action(action_signature(&calls));
        }

        let mut steps = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut artifacts = Vec::new();
        for call in &calls {
            let StepOutcome(record, produced) =
                match self.execute_step(drive, state, call, inference_timeout) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        // Later steps depend on this one; keep what already ran.
                        warn!(
                            call = %call.describe(),
                            err = %format!("{err:#}"),
                            "step aborted"
                        );
                        state.record_iteration_error();
                        steps.push(StepRecord {
                            call: call.clone(),
                            status: StepStatus::Failed,
                            summary: format!("aborted: {err:#}"),
                        });
                        break;
                    }
                };
            if record.status != StepStatus::Skipped && !tools_used.contains(&call.tool) {
                tools_used.push(call.tool.clone());
            }
            let produced: Vec<String> = produced.into_iter().flatten().collect();
            state.add_artifacts(produced.iter().cloned());
            artifacts.extend(produced);
            steps.push(record);
        }

        state.history.push(IterationRecord {
            iteration: state.iteration,
            action: intent.kind().to_string(),
            description,
            steps,
            tools_used,
            artifacts,
            progress: reflection.progress,
            confidence: reflection.confidence,
        });
        Ok(())
    }

    /// Run one planned step. Tool failures are diagnosed, recovered and
    /// recorded here; only executor infrastructure faults return `Err`.
    fn execute_step(
        &self,
        drive: &Drive<'_>,
        state: &mut SessionState,
        call: &ToolCall,
        inference_timeout: Duration,
    ) -> Result<StepOutcome> {
        let signature = call.signature();
        if state.should_skip(&signature) {
            warn!(call = %call.describe(), "skipping call that already failed repeatedly");
            return Ok(StepOutcome(
                StepRecord {
                    call: call.clone(),
                    status: StepStatus::Skipped,
                    summary: "skipped: failed repeatedly before".to_string(),
                },
                None,
            ));
        }

        let tool_timeout = drive
            .budget
            .call_timeout(Duration::from_secs(self.config.tools.shell_timeout_secs))?;
        let exec_context = drive.exec_context.with_timeout(tool_timeout);
        let result = drive
            .tools
            .execute(call, &exec_context)
            .with_context(|| format!("execute {}", call.tool))?;

        let Some(error) = result.error else {
            debug!(tool = %call.tool, "step succeeded");
            return Ok(StepOutcome(
                StepRecord {
                    call: call.clone(),
                    status: StepStatus::Succeeded,
                    summary: summarize(&result.content),
                },
                Some(result.artifacts),
            ));
        };

        let classification = classify(call, &error);
        info!(
            tool = %call.tool,
            category = %classification.category,
            confidence = classification.confidence,
            "step failed"
        );
        let failure_context = FailureContext {
            call: call.clone(),
            error: error.clone(),
            iteration: state.iteration,
            recent_actions: state.recent_actions(RECENT_ACTIONS),
            permitted_tools: self.config.tools.allowed.clone(),
            goal: drive.task.goal.clone(),
        };
        let diagnosis = Diagnostician::new(self.config.inference.prompt_budget_bytes).diagnose(
            self.backend,
            &failure_context,
            &classification,
            inference_timeout,
        );

        let recovery = match diagnosis.recovery_plan.as_ref() {
            Some(plan) if diagnosis.recoverable => {
                execute_recovery(drive.tools, plan, &exec_context).unwrap_or_else(|err| {
                    warn!(err = %format!("{err:#}"), "recovery aborted");
                    RecoveryOutcome {
                        attempted: true,
                        success: false,
                        steps_run: 0,
                        failed_step: None,
                        message: format!("recovery aborted: {err:#}"),
                    }
                })
            }
            _ => RecoveryOutcome::not_attempted("failure diagnosed as unrecoverable"),
        };

        let status = if recovery.success {
            StepStatus::Recovered
        } else {
            StepStatus::Failed
        };
        let summary = format!("{error}; recovery: {}", recovery.message);
        state.record_failure(FailureRecord {
            iteration: state.iteration,
            call: call.clone(),
            error,
            classification,
            diagnosis: Some(diagnosis),
            recovery: Some(recovery),
        });
        Ok(StepOutcome(
            StepRecord {
                call: call.clone(),
                status,
                summary,
            },
            None,
        ))
    }

    fn reflection_inputs(&self, drive: &Drive<'_>, state: &SessionState) -> ReflectionInputs {
        let skip = state.history.len().saturating_sub(RECENT_ACTIONS);
        ReflectionInputs {
            goal: drive.task.goal.clone(),
            category: drive.task.category.to_string(),
            iteration: state.iteration,
            max_iterations: drive.loop_config.max_iterations,
            progress: state.last_progress,
            errors: state.error_count,
            max_errors: drive.loop_config.max_errors,
            tools: self.config.tools.allowed.clone(),
            clarification: state.pending_clarification.clone(),
            failures: state.recent_failures.iter().map(FailureRecord::render).collect(),
            history: state.history.iter().skip(skip).map(history_line).collect(),
            artifacts: state.artifacts.clone(),
            priors: (!drive.priors.is_empty()).then(|| drive.priors.render()),
        }
    }

    fn checkpoint(
        &self,
        drive: &Drive<'_>,
        state: &SessionState,
        stop_reason: Option<StopReason>,
    ) -> Checkpoint {
        Checkpoint {
            session_id: drive.session_id.clone(),
            task: drive.task.clone(),
            settings: CheckpointSettings::from_loop(&drive.loop_config),
            state: state.clone(),
            weights: drive.weights,
            stop_reason,
            saved_at: now_rfc3339(),
        }
    }

    /// Final save. Pauses stay resumable; any other reason marks the
    /// checkpoint finished. Failures are logged.
    fn save_final_checkpoint(
        &self,
        drive: &Drive<'_>,
        state: &SessionState,
        reason: StopReason,
    ) {
        let stop_reason = (!reason.is_pause()).then_some(reason);
        let checkpoint = self.checkpoint(drive, state, stop_reason);
        if let Err(err) = self.checkpoints.save(&drive.session_id, &checkpoint) {
            warn!(err = %format!("{err:#}"), "final checkpoint save failed");
        }
    }

    fn finish(
        &self,
        drive: &Drive<'_>,
        mut state: SessionState,
        reason: StopReason,
        clarification_cause: Option<StopReason>,
    ) -> RunOutcome {
        let status = reason.status();
        let completed = reason == StopReason::Complete;
        state.completed = completed;
        self.save_final_checkpoint(drive, &state, reason);

        let outcome = match reason {
            StopReason::Complete => Some(Outcome::Success),
            _ if reason.is_pause() => None,
            _ => Some(Outcome::Failure),
        };
        if let Some(outcome) = outcome {
            let sample = OutcomeSample {
                category: drive.task.category,
                outcome,
                weights: drive.weights,
                session_id: Some(drive.session_id.clone()),
            };
            if let Err(err) = self.outcomes.record_outcome(&sample) {
                warn!(err = %format!("{err:#}"), "failed to record outcome");
            }
        }

        let summary = match clarification_cause {
            Some(cause) => format!(
                "paused after {} iteration(s) ({cause}); waiting for clarification",
                state.iteration
            ),
            None => format!(
                "{reason} after {} iteration(s) at {:.0}% progress",
                state.iteration, state.last_progress
            ),
        };
        info!(
            session_id = %drive.session_id,
            reason = %reason,
            iterations = state.iteration,
            errors = state.error_count,
            "session stopped"
        );

        RunOutcome {
            session_id: drive.session_id.clone(),
            task: drive.task.clone(),
            completed,
            reason,
            status,
            clarification_cause,
            iterations: state.iteration,
            confidence: state.confidence,
            history: state.history,
            artifacts: state.artifacts,
            weights: drive.weights,
            summary,
        }
    }
}

/// A step's record plus the artifacts it produced, if it succeeded.
struct StepOutcome(StepRecord, Option<Vec<String>>);

fn summarize(content: &str) -> String {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut summary: String = first.chars().take(STEP_SUMMARY_CHARS).collect();
    if first.chars().count() > STEP_SUMMARY_CHARS {
        summary.push_str("...");
    }
    summary
}

fn history_line(record: &IterationRecord) -> String {
    let steps: Vec<String> = record
        .steps
        .iter()
        .map(|step| format!("{} {:?}: {}", step.call.tool, step.status, step.summary))
        .collect();
    let mut line = format!(
        "iteration {} [{}] {} (progress {:.0}%)",
        record.iteration, record.action, record.description, record.progress
    );
    if !steps.is_empty() {
        line.push_str(&format!(" -> {}", steps.join(" | ")));
    }
    line
}
