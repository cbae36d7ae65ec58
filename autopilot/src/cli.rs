//! CLI command implementations.
//!
//! Each command returns the process exit code; `Err` maps to
//! [`exit_codes::INVALID`] in `main`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::core::classifier::classify;
use crate::core::learner::Outcome;
use crate::core::multi_step::CandidatePath;
use crate::core::types::{Alternative, StopReason, Task, TaskCategory, ToolCall, ToolError};
use crate::decide::{DecisionEngine, learn_weights};
use crate::exit_codes;
use crate::io::checkpoint::FileCheckpointStore;
use crate::io::config::load_config;
use crate::io::inference::CommandBackend;
use crate::io::outcomes::JsonlOutcomeStore;
use crate::io::priors::{Episode, EpisodeLog};
use crate::io::tools::LocalToolExecutor;
use crate::session::{AgentSession, RunContext, RunOutcome};

/// Workspace-level collaborators built from the config.
struct Stores {
    backend: CommandBackend,
    checkpoints: FileCheckpointStore,
    outcomes: JsonlOutcomeStore,
    episodes: EpisodeLog,
}

impl Stores {
    fn open(root: &Path, config: &AgentConfig) -> Self {
        let storage = &config.storage;
        Self {
            backend: CommandBackend::new(
                &config.inference,
                root,
                &root.join(&storage.scratch_dir),
            ),
            checkpoints: FileCheckpointStore::new(&root.join(&storage.checkpoint_dir)),
            outcomes: JsonlOutcomeStore::new(&root.join(&storage.outcomes_path)),
            episodes: EpisodeLog::new(&root.join(&storage.episodes_path)),
        }
    }
}

fn load(root: &Path, config_path: Option<&Path>) -> Result<AgentConfig> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => root.join(crate::io::config::DEFAULT_CONFIG_PATH),
    };
    load_config(&path)
}

/// `autopilot run`: start a new session.
pub fn run_goal(
    root: &Path,
    goal: &str,
    interactive: bool,
    config_path: Option<&Path>,
) -> Result<i32> {
    if goal.trim().is_empty() {
        bail!("goal must not be empty");
    }
    let mut config = load(root, config_path)?;
    config.session.interactive |= interactive;
    let stores = Stores::open(root, &config);
    let task = Task::new(goal.trim());
    debug!(category = %task.category, "task categorized");

    let session = AgentSession::new(
        &config,
        &stores.backend,
        &stores.checkpoints,
        &stores.outcomes,
    )
    .with_priors(&stores.episodes);
    let outcome = session.run(task, &LocalToolExecutor, &RunContext::new(root))?;
    record_episode(&stores.episodes, &outcome);
    report(&outcome);
    Ok(exit_codes::for_stop_reason(outcome.reason))
}

/// `autopilot resume`: continue a checkpointed session.
pub fn resume_session(
    root: &Path,
    session_id: &str,
    clarification: Option<String>,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = load(root, config_path)?;
    let stores = Stores::open(root, &config);
    let session = AgentSession::new(
        &config,
        &stores.backend,
        &stores.checkpoints,
        &stores.outcomes,
    )
    .with_priors(&stores.episodes);
    let outcome = session.resume(
        session_id,
        &LocalToolExecutor,
        &RunContext::new(root),
        clarification,
    )?;
    record_episode(&stores.episodes, &outcome);
    report(&outcome);
    Ok(exit_codes::for_stop_reason(outcome.reason))
}

/// `autopilot evaluate`: rank alternatives (or, with `paths`, multi-step
/// candidate paths) from a JSON array file.
pub fn evaluate_file(
    root: &Path,
    candidates_path: &Path,
    goal: &str,
    paths: bool,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = load(root, config_path)?;
    let raw = fs::read_to_string(candidates_path)
        .with_context(|| format!("read {}", candidates_path.display()))?;
    let stores = Stores::open(root, &config);
    let category = Task::new(goal).category;
    let weights = learn_weights(&stores.outcomes, category, &config.decision, &config.learner)
        .map(|learned| learned.weights)
        .unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "outcome store unavailable, using default weights");
            config.decision.default_weights
        });
    let engine = DecisionEngine::new(&config.decision, config.inference.prompt_budget_bytes);
    let timeout = Duration::from_secs(config.inference.timeout_secs);
    let evaluation = if paths {
        let candidates: Vec<CandidatePath> = serde_json::from_str(&raw)
            .with_context(|| format!("parse paths {}", candidates_path.display()))?;
        engine.evaluate_paths(&stores.backend, goal, &candidates, &weights, timeout)?
    } else {
        let alternatives: Vec<Alternative> = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", candidates_path.display()))?;
        engine.evaluate(&stores.backend, goal, &alternatives, &weights, timeout)?
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&evaluation).context("serialize evaluation")?
    );
    Ok(exit_codes::OK)
}

#[derive(Debug, Deserialize)]
struct ClassifyInput {
    #[serde(default = "unknown_call")]
    call: ToolCall,
    error: ToolError,
}

fn unknown_call() -> ToolCall {
    ToolCall::without_args("shell")
}

/// `autopilot classify`: classify a recorded tool error.
pub fn classify_file(error_path: &Path) -> Result<i32> {
    let raw = fs::read_to_string(error_path)
        .with_context(|| format!("read {}", error_path.display()))?;
    let input: ClassifyInput =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", error_path.display()))?;
    let classification = classify(&input.call, &input.error);
    println!(
        "{}",
        serde_json::to_string_pretty(&classification).context("serialize classification")?
    );
    Ok(exit_codes::OK)
}

/// `autopilot weights`: show learned weights for a category.
pub fn show_weights(root: &Path, category: &str, config_path: Option<&Path>) -> Result<i32> {
    let Some(category) = TaskCategory::parse(category) else {
        bail!("unknown category '{category}'");
    };
    let config = load(root, config_path)?;
    let outcomes = JsonlOutcomeStore::new(&root.join(&config.storage.outcomes_path));
    let learned = learn_weights(&outcomes, category, &config.decision, &config.learner)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&learned).context("serialize weights")?
    );
    Ok(exit_codes::OK)
}

fn record_episode(log: &EpisodeLog, outcome: &RunOutcome) {
    let verdict = match outcome.reason {
        StopReason::Complete => Outcome::Success,
        StopReason::UserStop | StopReason::NeedsClarification => return,
        _ => Outcome::Failure,
    };
    let episode = Episode {
        category: outcome.task.category,
        goal: outcome.task.goal.clone(),
        outcome: verdict,
        summary: outcome.summary.clone(),
        iterations: outcome.iterations,
    };
    if let Err(err) = log.record(&episode) {
        warn!(err = %format!("{err:#}"), "failed to record episode");
    }
}

fn report(outcome: &RunOutcome) {
    println!(
        "session: id={} status={} iterations={} confidence={:.2}",
        outcome.session_id, outcome.reason, outcome.iterations, outcome.confidence
    );
    if let Some(cause) = outcome.clarification_cause {
        println!(
            "session: paused ({cause}); resume with `autopilot resume {} --clarification <text>`",
            outcome.session_id
        );
    }
    for artifact in &outcome.artifacts {
        println!("artifact: {artifact}");
    }
    println!("summary: {}", outcome.summary);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_file_reads_call_and_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("error.json");
        fs::write(
            &path,
            r#"{"call": {"tool": "shell", "args": {"command": "foo"}},
                "error": {"message": "command exited with status 127", "exit_code": 127}}"#,
        )
        .expect("write");
        assert_eq!(classify_file(&path).expect("classify"), exit_codes::OK);
    }

    #[test]
    fn evaluate_ranks_paths_from_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("paths.json");
        fs::write(
            &path,
            r#"[
              {"id": "inspect", "name": "inspect", "steps": [
                {"id": "s1", "name": "read header", "confidence": 0.9,
                 "steps": [{"tool": "read_file", "args": {"path": "data.csv"}}]}]},
              {"id": "wipe", "name": "wipe", "steps": [
                {"id": "s1", "name": "wipe outputs", "confidence": 0.5,
                 "steps": [{"tool": "shell", "args": {"command": "rm -rf out"}}]}]}
            ]"#,
        )
        .expect("write");
        let code = evaluate_file(temp.path(), &path, "Count rows", true, None).expect("evaluate");
        assert_eq!(code, exit_codes::OK);
    }

    #[test]
    fn evaluate_rejects_empty_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("paths.json");
        fs::write(&path, r#"[{"id": "p", "name": "nothing", "steps": []}]"#).expect("write");
        let err = evaluate_file(temp.path(), &path, "Count rows", true, None).unwrap_err();
        assert!(err.to_string().contains("has no steps"));
    }

    #[test]
    fn weights_rejects_unknown_category() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = show_weights(temp.path(), "astrology", None).unwrap_err();
        assert!(err.to_string().contains("unknown category"));
    }

    #[test]
    fn weights_without_history_are_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            show_weights(temp.path(), "coding", None).expect("weights"),
            exit_codes::OK
        );
    }

    #[test]
    fn empty_goal_is_invalid() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(run_goal(temp.path(), "   ", false, None).is_err());
    }
}
