//! Session checkpoints (`.autopilot/checkpoints/<session-id>.json`).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LoopConfig;
use crate::core::state::SessionState;
use crate::core::types::{StopReason, Task};
use crate::core::weights::WeightVector;
use crate::io::atomic::write_atomic;

/// Loop settings a resumed session must keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    pub max_iterations: u32,
    pub checkpoint_interval: u32,
    pub max_errors: u32,
    pub interactive: bool,
}

impl CheckpointSettings {
    pub fn from_loop(config: &LoopConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            checkpoint_interval: config.checkpoint_interval,
            max_errors: config.max_errors,
            interactive: config.interactive,
        }
    }

    /// Overlay the saved caps onto `config`, keeping its other knobs.
    pub fn apply_to(&self, config: &LoopConfig) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            checkpoint_interval: self.checkpoint_interval,
            max_errors: self.max_errors,
            interactive: self.interactive,
            ..config.clone()
        }
    }
}

/// Everything needed to resume a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub task: Task,
    pub settings: CheckpointSettings,
    pub state: SessionState,
    /// Scoring weights the session was using.
    pub weights: WeightVector,
    /// Set once the session has finished; such a checkpoint is a record,
    /// not a resume point.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// RFC 3339.
    pub saved_at: String,
}

pub trait CheckpointStore {
    fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()>;
    fn load(&self, session_id: &str) -> Result<Checkpoint>;
}

/// Session ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty()
        || !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("invalid session id '{session_id}'");
    }
    Ok(())
}

/// One pretty-printed JSON file per session, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(session_id)?;
        debug!(
            path = %path.display(),
            iteration = checkpoint.state.iteration,
            "writing checkpoint"
        );
        let mut buf = serde_json::to_string_pretty(checkpoint).context("serialize checkpoint")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    fn load(&self, session_id: &str) -> Result<Checkpoint> {
        let path = self.path_for(session_id)?;
        debug!(path = %path.display(), "loading checkpoint");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("parse checkpoint {}", path.display()))?;
        if checkpoint.session_id != session_id {
            bail!(
                "checkpoint {} belongs to session '{}'",
                path.display(),
                checkpoint.session_id
            );
        }
        Ok(checkpoint)
    }
}

/// In-process store; also counts saves so tests can observe the cadence.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RefCell<BTreeMap<String, Checkpoint>>,
    saves: RefCell<Vec<u32>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration counter of every save, in order.
    pub fn saved_iterations(&self) -> Vec<u32> {
        self.saves.borrow().clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.saves.borrow_mut().push(checkpoint.state.iteration);
        self.checkpoints
            .borrow_mut()
            .insert(session_id.to_string(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Checkpoint> {
        self.checkpoints
            .borrow()
            .get(session_id)
            .cloned()
            .ok_or_else(|| anyhow!("no checkpoint for session '{session_id}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Assessment, IterationRecord, Reflection};

    fn checkpoint(session_id: &str) -> Checkpoint {
        let mut state = SessionState::new();
        state.iteration = 4;
        state.error_count = 1;
        state.record_action("abc".to_string());
        state.history.push(IterationRecord {
            iteration: 1,
            action: "tool".to_string(),
            description: "list_dir".to_string(),
            steps: Vec::new(),
            tools_used: vec!["list_dir".to_string()],
            artifacts: Vec::new(),
            progress: 10.0,
            confidence: 0.5,
        });
        state.reflections.push(Reflection {
            assessment: Assessment::Continue,
            progress: 10.0,
            confidence: 0.5,
            next_action: "look around".to_string(),
            tool: None,
            alternatives: Vec::new(),
            fallback: false,
        });
        Checkpoint {
            session_id: session_id.to_string(),
            task: Task::new("Fix the parser tests"),
            settings: CheckpointSettings::from_loop(&LoopConfig::default()),
            state,
            weights: WeightVector::new(0.35, 0.25, 0.30, 0.10),
            stop_reason: None,
            saved_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn file_store_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(&temp.path().join("checkpoints"));
        let saved = checkpoint("s-1");
        store.save("s-1", &saved).expect("save");
        let loaded = store.load("s-1").expect("load");
        assert_eq!(loaded, saved);
        assert_eq!(loaded.state.iteration, 4);
        assert_eq!(loaded.state.history.len(), 1);
        assert_eq!(loaded.state.action_signatures.len(), 1);
    }

    #[test]
    fn corrupt_ring_in_checkpoint_fails_to_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        store.save("s-2", &checkpoint("s-2")).expect("save");
        let path = store.path_for("s-2").expect("path");
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        value["state"]["action_signatures"]["head"] = serde_json::json!(7);
        fs::write(&path, value.to_string()).expect("write");

        let err = store.load("s-2").unwrap_err();
        assert!(format!("{err:#}").contains("ring head 7"));
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        let err = store.save("../evil", &checkpoint("../evil")).unwrap_err();
        assert!(err.to_string().contains("invalid session id"));
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        let err = store.load("nope").unwrap_err();
        assert!(format!("{err:#}").contains("read checkpoint"));
    }

    #[test]
    fn settings_overlay_keeps_other_knobs() {
        let mut config = LoopConfig::default();
        config.stall_limit = 7;
        let settings = CheckpointSettings {
            max_iterations: 9,
            checkpoint_interval: 2,
            max_errors: 1,
            interactive: true,
        };
        let applied = settings.apply_to(&config);
        assert_eq!(applied.max_iterations, 9);
        assert!(applied.interactive);
        assert_eq!(applied.stall_limit, 7);
    }

    #[test]
    fn memory_store_records_save_order() {
        let store = MemoryCheckpointStore::new();
        store.save("a", &checkpoint("a")).expect("save");
        assert_eq!(store.saved_iterations(), vec![4]);
        assert_eq!(store.load("a").expect("load").session_id, "a");
        assert!(store.load("b").is_err());
    }
}
