//! Outcome samples feeding the weight learner.
//!
//! The JSONL store appends one sample per finished session; readers skip
//! lines they cannot parse so a torn final line never poisons learning.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::learner::OutcomeSample;
use crate::core::types::TaskCategory;

pub trait OutcomeStore {
    fn query_outcomes(&self, category: TaskCategory) -> Result<Vec<OutcomeSample>>;
    fn record_outcome(&self, sample: &OutcomeSample) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonlOutcomeStore {
    path: PathBuf,
}

impl JsonlOutcomeStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl OutcomeStore for JsonlOutcomeStore {
    fn query_outcomes(&self, category: TaskCategory) -> Result<Vec<OutcomeSample>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read outcomes {}", self.path.display()))?;
        let mut samples = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OutcomeSample>(line) {
                Ok(sample) if sample.category == category => samples.push(sample),
                Ok(_) => {}
                Err(err) => warn!(line = idx + 1, err = %err, "skipping malformed outcome"),
            }
        }
        debug!(category = %category, count = samples.len(), "outcomes loaded");
        Ok(samples)
    }

    fn record_outcome(&self, sample: &OutcomeSample) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(sample).context("serialize outcome")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open outcomes {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append outcome {}", self.path.display()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    samples: RefCell<Vec<OutcomeSample>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(samples: Vec<OutcomeSample>) -> Self {
        Self {
            samples: RefCell::new(samples),
        }
    }

    pub fn all(&self) -> Vec<OutcomeSample> {
        self.samples.borrow().clone()
    }
}

impl OutcomeStore for MemoryOutcomeStore {
    fn query_outcomes(&self, category: TaskCategory) -> Result<Vec<OutcomeSample>> {
        Ok(self
            .samples
            .borrow()
            .iter()
            .filter(|sample| sample.category == category)
            .cloned()
            .collect())
    }

    fn record_outcome(&self, sample: &OutcomeSample) -> Result<()> {
        self.samples.borrow_mut().push(sample.clone());
        Ok(())
    }
}
