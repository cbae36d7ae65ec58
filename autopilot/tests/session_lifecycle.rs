//! Loop-level tests for full session lifecycles.
//!
//! Each test drives `AgentSession` with a scripted backend and tool executor
//! and checks how and when the session stops, what it records, and that a
//! paused session resumes where it left off.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde_json::json;

use autopilot::config::AgentConfig;
use autopilot::core::learner::Outcome;
use autopilot::core::types::{SessionStatus, StepStatus, StopReason, Task, ToolCall, ToolResult};
use autopilot::exit_codes;
use autopilot::io::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use autopilot::io::inference::JudgementKind;
use autopilot::io::outcomes::MemoryOutcomeStore;
use autopilot::io::tools::{ExecutionContext, ToolExecutor};
use autopilot::session::{AgentSession, RunContext};
use autopilot::test_support::{
    ScriptedBackend, ScriptedToolExecutor, alternative, complete_reflection, plan_reflection,
    shell_failure, tool_reflection,
};

fn workspace() -> RunContext {
    RunContext::new(Path::new("/workspace"))
}

/// Reflections that keep reporting the same progress with a fresh tool call each time.
fn push_flat_progress(backend: &ScriptedBackend, count: usize) {
    for i in 0..count {
        backend.push_reflection(tool_reflection(
            10.0,
            0.5,
            "read_file",
            json!({ "path": format!("notes-{i}.md") }),
        ));
    }
}

#[test]
fn stalled_progress_stops_with_no_progress() {
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    push_flat_progress(&backend, 10);
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();

    let outcome = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .run(Task::new("Summarize the notes"), &tools, &workspace())
        .expect("run");

    // First report improves on 0%, the next three are flat.
    assert_eq!(outcome.reason, StopReason::NoProgress);
    assert_eq!(outcome.status, SessionStatus::Stuck);
    assert_eq!(outcome.iterations, 4);
    assert!(outcome.iterations < config.session.max_iterations);
    assert_eq!(exit_codes::for_stop_reason(outcome.reason), exit_codes::STUCK);
    // Cadence save before iteration 4, then the final one.
    assert_eq!(checkpoints.saved_iterations(), vec![3, 4]);
    assert_eq!(outcomes.all()[0].outcome, Outcome::Failure);
}

#[test]
fn identical_actions_stop_with_repeated_action() {
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    for progress in [10.0, 20.0, 30.0, 40.0] {
        backend.push_reflection(tool_reflection(
            progress,
            0.6,
            "list_dir",
            json!({ "path": "src" }),
        ));
    }
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();

    let outcome = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .run(Task::new("Explore the src folder"), &tools, &workspace())
        .expect("run");

    assert_eq!(outcome.reason, StopReason::RepeatedAction);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(tools.calls().len(), 3);
}

#[test]
fn unrecovered_failures_exhaust_the_error_budget() {
    let mut config = AgentConfig::default();
    config.tools.allowed = vec!["shell".to_string()];
    let backend = ScriptedBackend::new();
    for i in 0..10 {
        backend.push_reflection(tool_reflection(
            10.0 * (i + 1) as f64,
            0.5,
            "shell",
            json!({ "command": format!("make target-{i}") }),
        ));
    }
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();
    tools.always("shell", shell_failure(2, "make: *** No rule to make target"));

    let outcome = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .run(Task::new("Build the project"), &tools, &workspace())
        .expect("run");

    assert_eq!(outcome.reason, StopReason::MaxErrors);
    assert_eq!(outcome.status, SessionStatus::ErrorExhausted);
    assert_eq!(outcome.iterations, config.session.max_errors);
    assert!(
        outcome
            .history
            .iter()
            .all(|record| record.steps[0].status == StepStatus::Failed)
    );
    // Every failure went through diagnosis (judgement first, then heuristic).
    assert_eq!(
        backend.requests_of(JudgementKind::Diagnosis).len(),
        config.session.max_errors as usize
    );
    assert_eq!(exit_codes::for_stop_reason(outcome.reason), exit_codes::EXHAUSTED);
}

#[test]
fn plan_alternatives_are_ranked_and_the_best_is_executed() {
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    let alternatives = vec![
        alternative(
            "read",
            "read the csv header",
            ToolCall::new("read_file", json!({ "path": "data.csv" })),
            0.9,
        ),
        alternative(
            "rebuild",
            "rebuild everything",
            ToolCall::new("shell", json!({ "command": "rm -rf build && make" })),
            0.2,
        ),
    ];
    backend.push_reflection(plan_reflection(40.0, &alternatives));
    backend.push_reflection(complete_reflection(0.95));
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();

    let outcome = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .run(Task::new("Count the rows in data.csv"), &tools, &workspace())
        .expect("run");

    assert!(outcome.completed);
    assert_eq!(outcome.history[0].action, "plan");
    assert!(outcome.history[0].description.starts_with("read the csv header"));
    assert_eq!(tools.calls()[0].tool, "read_file");
    assert_eq!(outcomes.all()[0].outcome, Outcome::Success);
}

#[test]
fn interactive_session_pauses_then_resumes_with_clarification() {
    let mut config = AgentConfig::default();
    config.session.interactive = true;
    let backend = ScriptedBackend::new();
    push_flat_progress(&backend, 4);
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();
    let session = AgentSession::new(&config, &backend, &checkpoints, &outcomes);

    let paused = session
        .run(Task::new("Summarize the notes"), &tools, &workspace())
        .expect("run");
    assert_eq!(paused.reason, StopReason::NeedsClarification);
    assert_eq!(paused.clarification_cause, Some(StopReason::NoProgress));
    assert_eq!(
        exit_codes::for_stop_reason(paused.reason),
        exit_codes::NEEDS_CLARIFICATION
    );
    assert!(outcomes.all().is_empty());

    let saved = checkpoints.load(&paused.session_id).expect("checkpoint");
    assert!(saved.state.clarification_requested);
    assert_eq!(saved.state.iteration, 4);

    backend.push_reflection(complete_reflection(0.95));
    let resumed = session
        .resume(
            &paused.session_id,
            &tools,
            &workspace(),
            Some("the notes live in docs/".to_string()),
        )
        .expect("resume");
    assert_eq!(resumed.session_id, paused.session_id);
    assert!(resumed.completed);
    assert_eq!(resumed.iterations, 5);
    assert_eq!(resumed.history.len(), 5);

    let last_prompt = backend
        .requests_of(JudgementKind::Reflection)
        .last()
        .map(|request| request.prompt.clone())
        .expect("reflection request");
    assert!(last_prompt.contains("### Clarification"));
    assert!(last_prompt.contains("the notes live in docs/"));
}

#[test]
fn second_soft_stop_after_clarification_is_terminal() {
    let mut config = AgentConfig::default();
    config.session.interactive = true;
    let backend = ScriptedBackend::new();
    push_flat_progress(&backend, 4);
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();
    let session = AgentSession::new(&config, &backend, &checkpoints, &outcomes);

    let paused = session
        .run(Task::new("Summarize the notes"), &tools, &workspace())
        .expect("run");
    assert_eq!(paused.reason, StopReason::NeedsClarification);

    push_flat_progress(&backend, 10);
    let stopped = session
        .resume(&paused.session_id, &tools, &workspace(), None)
        .expect("resume");
    assert_eq!(stopped.reason, StopReason::NoProgress);
    assert_eq!(stopped.clarification_cause, None);
    assert_eq!(outcomes.all().len(), 1);
}

/// Sets the shared stop flag as soon as it runs a tool.
struct StoppingExecutor {
    inner: ScriptedToolExecutor,
    stop: Arc<AtomicBool>,
}

impl ToolExecutor for StoppingExecutor {
    fn execute(&self, call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
        self.stop.store(true, Ordering::SeqCst);
        self.inner.execute(call, context)
    }
}

#[test]
fn stop_request_ends_after_the_running_iteration() {
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    backend.push_reflection(tool_reflection(30.0, 0.6, "list_dir", json!({ "path": "." })));
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let context = workspace();
    let tools = StoppingExecutor {
        inner: ScriptedToolExecutor::new(),
        stop: context.stop_handle(),
    };

    let outcome = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .run(Task::new("List the files"), &tools, &context)
        .expect("run");

    assert_eq!(outcome.reason, StopReason::UserStop);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(exit_codes::for_stop_reason(outcome.reason), exit_codes::STOPPED);
    assert_eq!(checkpoints.saved_iterations(), vec![1]);
    assert!(outcomes.all().is_empty());
}

#[test]
fn file_checkpoint_resume_continues_after_user_stop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = AgentConfig::default();
    config.session.max_iterations = 3;
    let backend = ScriptedBackend::new();
    for i in 0..3 {
        backend.push_reflection(tool_reflection(
            20.0 * (i + 1) as f64,
            0.6,
            "read_file",
            json!({ "path": format!("part-{i}.txt") }),
        ));
    }
    let checkpoints = FileCheckpointStore::new(&temp.path().join("checkpoints"));
    let outcomes = MemoryOutcomeStore::new();
    let session = AgentSession::new(&config, &backend, &checkpoints, &outcomes);
    let context = workspace();
    let stopping = StoppingExecutor {
        inner: ScriptedToolExecutor::new(),
        stop: context.stop_handle(),
    };

    let first = session
        .run(Task::new("Read every part"), &stopping, &context)
        .expect("run");
    assert_eq!(first.reason, StopReason::UserStop);

    let saved = checkpoints.load(&first.session_id).expect("load");
    assert_eq!(saved.state.iteration, 1);
    assert_eq!(saved.stop_reason, None);
    assert_eq!(saved.settings.max_iterations, 3);

    let tools = ScriptedToolExecutor::new();
    let resumed = session
        .resume(&first.session_id, &tools, &workspace(), None)
        .expect("resume");
    assert_eq!(resumed.reason, StopReason::MaxIterations);
    assert_eq!(resumed.iterations, 3);
    assert_eq!(resumed.history.len(), 3);
    assert_eq!(resumed.history[1].iteration, 2);
    assert_eq!(resumed.task.goal, "Read every part");
    assert_eq!(tools.calls().len(), 2);
}

#[test]
fn finished_session_is_not_resumed() {
    let mut config = AgentConfig::default();
    config.session.max_iterations = 2;
    let backend = ScriptedBackend::new();
    push_flat_progress(&backend, 2);
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();
    let session = AgentSession::new(&config, &backend, &checkpoints, &outcomes);

    let finished = session
        .run(Task::new("Summarize the notes"), &tools, &workspace())
        .expect("run");
    assert_eq!(finished.reason, StopReason::MaxIterations);
    let saved = checkpoints.load(&finished.session_id).expect("checkpoint");
    assert_eq!(saved.stop_reason, Some(StopReason::MaxIterations));
    assert_eq!(saved.state.iteration, 2);

    push_flat_progress(&backend, 2);
    let err = session
        .resume(&finished.session_id, &tools, &workspace(), None)
        .unwrap_err();
    assert!(err.to_string().contains("already finished (max_iterations)"));
    assert_eq!(tools.calls().len(), 2);
    assert_eq!(outcomes.all().len(), 1);
}

#[test]
fn checkpoint_with_invalid_settings_is_rejected() {
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    let checkpoints = MemoryCheckpointStore::new();
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();
    let session = AgentSession::new(&config, &backend, &checkpoints, &outcomes);
    let context = workspace();
    context.request_stop();

    let stopped = session
        .run(Task::new("List files"), &tools, &context)
        .expect("run");
    let mut saved = checkpoints.load(&stopped.session_id).expect("checkpoint");
    saved.settings.checkpoint_interval = 0;
    saved.state.iteration = 1;
    checkpoints.save(&stopped.session_id, &saved).expect("save");

    let err = session
        .resume(&stopped.session_id, &tools, &workspace(), None)
        .unwrap_err();
    assert!(format!("{err:#}").contains("checkpoint_interval must be > 0"));
    assert!(tools.calls().is_empty());
}

#[test]
fn resuming_an_unknown_session_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = AgentConfig::default();
    let backend = ScriptedBackend::new();
    let checkpoints = FileCheckpointStore::new(temp.path());
    let outcomes = MemoryOutcomeStore::new();
    let tools = ScriptedToolExecutor::new();

    let err = AgentSession::new(&config, &backend, &checkpoints, &outcomes)
        .resume("session-missing", &tools, &workspace(), None)
        .unwrap_err();
    assert!(format!("{err:#}").contains("session-missing"));
}
