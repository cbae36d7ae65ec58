//! Read-only hints from earlier sessions.
//!
//! Priors only ever enrich the reflection prompt. A missing or broken source
//! degrades to empty priors; it never fails a session.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::alignment::keywords;
use crate::core::learner::Outcome;
use crate::core::types::{Task, TaskCategory};

const RECENT_LIMIT: usize = 3;
const SIMILAR_LIMIT: usize = 3;

/// Summary of one finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub category: TaskCategory,
    pub goal: String,
    pub outcome: Outcome,
    pub summary: String,
    pub iterations: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Priors {
    /// Summaries of the latest successful sessions in the same category.
    pub recent_successes: Vec<String>,
    pub recent_failures: Vec<String>,
    /// Episodes whose goals share keywords with the current goal.
    pub similar_episodes: Vec<Episode>,
}

impl Priors {
    pub fn is_empty(&self) -> bool {
        self.recent_successes.is_empty()
            && self.recent_failures.is_empty()
            && self.similar_episodes.is_empty()
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for success in &self.recent_successes {
            lines.push(format!("- succeeded: {success}"));
        }
        for failure in &self.recent_failures {
            lines.push(format!("- failed: {failure}"));
        }
        for episode in &self.similar_episodes {
            let verdict = match episode.outcome {
                Outcome::Success => "succeeded",
                Outcome::Failure => "failed",
            };
            lines.push(format!(
                "- similar goal \"{}\" {verdict} after {} iteration(s): {}",
                episode.goal, episode.iterations, episode.summary
            ));
        }
        lines.join("\n")
    }
}

pub trait PriorSource {
    fn priors(&self, task: &Task) -> Result<Priors>;
}

/// No history at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPriors;

impl PriorSource for NoPriors {
    fn priors(&self, _task: &Task) -> Result<Priors> {
        Ok(Priors::default())
    }
}

/// Fetch priors, degrading to empty on any error.
pub fn load_priors(source: &dyn PriorSource, task: &Task) -> Priors {
    match source.priors(task) {
        Ok(priors) => priors,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "priors unavailable, continuing without");
            Priors::default()
        }
    }
}

/// Append-only JSONL log of finished sessions.
#[derive(Debug, Clone)]
pub struct EpisodeLog {
    path: PathBuf,
}

impl EpisodeLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn record(&self, episode: &Episode) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(episode).context("serialize episode")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open episodes {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append episode {}", self.path.display()))
    }

    fn episodes(&self) -> Result<Vec<Episode>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read episodes {}", self.path.display()))?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl PriorSource for EpisodeLog {
    fn priors(&self, task: &Task) -> Result<Priors> {
        let episodes = self.episodes()?;
        let latest = |outcome: Outcome| -> Vec<String> {
            episodes
                .iter()
                .rev()
                .filter(|e| e.category == task.category && e.outcome == outcome)
                .take(RECENT_LIMIT)
                .map(|e| e.summary.clone())
                .collect()
        };

        let goal_words = keywords(&task.goal);
        let mut scored: Vec<(usize, &Episode)> = episodes
            .iter()
            .filter(|e| e.goal != task.goal)
            .map(|e| (keywords(&e.goal).intersection(&goal_words).count(), e))
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let priors = Priors {
            recent_successes: latest(Outcome::Success),
            recent_failures: latest(Outcome::Failure),
            similar_episodes: scored
                .into_iter()
                .take(SIMILAR_LIMIT)
                .map(|(_, e)| e.clone())
                .collect(),
        };
        debug!(
            successes = priors.recent_successes.len(),
            failures = priors.recent_failures.len(),
            similar = priors.similar_episodes.len(),
            "priors loaded"
        );
        Ok(priors)
    }
}
