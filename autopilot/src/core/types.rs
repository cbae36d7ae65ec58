//! Shared deterministic types for the decision core.
//!
//! These types define stable contracts between core components and the
//! session loop. They must not depend on external state or I/O, and their
//! serialized form is part of the checkpoint format.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Coarse task family used to key learned weights and retrieved priors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Coding,
    Research,
    FileManagement,
    SystemAdmin,
    DataProcessing,
    General,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Coding => "coding",
            TaskCategory::Research => "research",
            TaskCategory::FileManagement => "file_management",
            TaskCategory::SystemAdmin => "system_admin",
            TaskCategory::DataProcessing => "data_processing",
            TaskCategory::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "coding" => Some(TaskCategory::Coding),
            "research" => Some(TaskCategory::Research),
            "file_management" => Some(TaskCategory::FileManagement),
            "system_admin" => Some(TaskCategory::SystemAdmin),
            "data_processing" => Some(TaskCategory::DataProcessing),
            "general" => Some(TaskCategory::General),
            _ => None,
        }
    }

    /// Derive the category from a goal. First matching rule wins.
    pub fn infer(goal: &str) -> Self {
        static RULES: LazyLock<Vec<(Regex, TaskCategory)>> = LazyLock::new(|| {
            [
                (
                    r"(?i)\b(code|function|bug|compile|refactor|tests?|implement|rust|python|script|api)\b",
                    TaskCategory::Coding,
                ),
                (
                    r"(?i)\b(research|investigate|find out|summari[sz]e|compare|look up|learn about)\b",
                    TaskCategory::Research,
                ),
                (
                    r"(?i)\b(csv|json|parse|dataset|data|transform|aggregate|report)\b",
                    TaskCategory::DataProcessing,
                ),
                (
                    r"(?i)\b(install|configure|service|server|deploy|permissions?|disk|process|package)\b",
                    TaskCategory::SystemAdmin,
                ),
                (
                    r"(?i)\b(files?|folders?|director(y|ies)|rename|move|copy|organi[sz]e|delete)\b",
                    TaskCategory::FileManagement,
                ),
            ]
            .into_iter()
            .map(|(pattern, category)| {
                (
                    Regex::new(pattern).expect("category pattern should be valid"),
                    category,
                )
            })
            .collect()
        });

        RULES
            .iter()
            .find(|(re, _)| re.is_match(goal))
            .map(|(_, category)| *category)
            .unwrap_or(TaskCategory::General)
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable goal for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub goal: String,
    pub category: TaskCategory,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        let goal = goal.into();
        let category = TaskCategory::infer(&goal);
        Self { goal, category }
    }
}

/// A single tool invocation (also used as a plan step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    pub fn without_args(tool: impl Into<String>) -> Self {
        Self::new(tool, empty_args())
    }

    /// String argument lookup.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Stable signature of `tool` + canonical args, used for loop detection.
    ///
    /// `serde_json` maps are key-ordered, so equal calls always hash equally.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tool.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.args.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut sig = hex::encode(digest);
        sig.truncate(16);
        sig
    }

    /// Short human-readable rendering for prompts and logs.
    pub fn describe(&self) -> String {
        match &self.args {
            Value::Object(map) if map.is_empty() => self.tool.clone(),
            args => format!("{} {}", self.tool, args),
        }
    }
}

/// Raw error reported by the tool executor for a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub message: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub signal: Option<String>,
}

impl ToolError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit {code})")?;
        }
        if let Some(signal) = &self.signal {
            write!(f, " (signal {signal})")?;
        }
        Ok(())
    }
}

/// Result of one tool attempt. `error` is set when the tool ran and failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    #[serde(default)]
    pub error: Option<ToolError>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn failed(error: ToolError) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
            artifacts: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Self-assessment verdict of a reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    Continue,
    Complete,
    Stuck,
}

/// Explicit tool/purpose pair proposed by a reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolIntent {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
    #[serde(default)]
    pub purpose: String,
}

/// One candidate action plan competing to be chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub id: String,
    pub name: String,
    pub steps: Vec<ToolCall>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub confidence: f64,
}

/// One inference-mediated judgement, produced once per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub assessment: Assessment,
    pub progress: f64,
    pub confidence: f64,
    pub next_action: String,
    #[serde(default)]
    pub tool: Option<ToolIntent>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    /// True when this reflection was substituted after a backend fault.
    #[serde(default)]
    pub fallback: bool,
}

impl Reflection {
    /// Clamp numeric fields into their declared ranges.
    pub fn sanitized(mut self) -> Self {
        self.progress = clamp_finite(self.progress, 0.0, 100.0);
        self.confidence = clamp_finite(self.confidence, 0.0, 1.0);
        self.next_action = self.next_action.trim().to_string();
        for alt in &mut self.alternatives {
            alt.confidence = clamp_finite(alt.confidence, 0.0, 1.0);
        }
        if let Some(tool) = &self.tool
            && tool.name.trim().is_empty()
        {
            self.tool = None;
        }
        self
    }
}

/// Clamp `value` into `[lo, hi]`, mapping non-finite input to `lo`.
pub fn clamp_finite(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        lo
    }
}

/// Step-level outcome recorded in iteration history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub call: ToolCall,
    pub status: StepStatus,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Recovered,
    Skipped,
}

/// One entry of the session's ordered iteration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// `tool`, `plan`, `inferred`, `inspect`, `idle` or `error`.
    pub action: String,
    pub description: String,
    pub steps: Vec<StepRecord>,
    pub tools_used: Vec<String>,
    pub artifacts: Vec<String>,
    pub progress: f64,
    pub confidence: f64,
}

/// Machine-readable termination reason (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    Stuck,
    RepeatedAction,
    NoProgress,
    MaxErrors,
    MaxIterations,
    UserStop,
    NeedsClarification,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Complete => "complete",
            StopReason::Stuck => "stuck",
            StopReason::RepeatedAction => "repeated_action",
            StopReason::NoProgress => "no_progress",
            StopReason::MaxErrors => "max_errors",
            StopReason::MaxIterations => "max_iterations",
            StopReason::UserStop => "user_stop",
            StopReason::NeedsClarification => "needs_clarification",
        }
    }

    /// Stops that leave the session resumable from its checkpoint.
    pub fn is_pause(self) -> bool {
        matches!(self, StopReason::UserStop | StopReason::NeedsClarification)
    }

    /// Terminal session state this reason maps to.
    pub fn status(self) -> SessionStatus {
        match self {
            StopReason::Complete => SessionStatus::Complete,
            StopReason::Stuck | StopReason::RepeatedAction | StopReason::NoProgress => {
                SessionStatus::Stuck
            }
            StopReason::MaxErrors => SessionStatus::ErrorExhausted,
            StopReason::MaxIterations => SessionStatus::MaxIterations,
            StopReason::UserStop => SessionStatus::UserStop,
            StopReason::NeedsClarification => SessionStatus::NeedsClarification,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control-loop state. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Complete,
    Stuck,
    ErrorExhausted,
    MaxIterations,
    UserStop,
    NeedsClarification,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_inference_uses_first_matching_rule() {
        assert_eq!(
            TaskCategory::infer("Fix the failing tests in the parser"),
            TaskCategory::Coding
        );
        assert_eq!(
            TaskCategory::infer("Research the history of the printing press"),
            TaskCategory::Research
        );
        assert_eq!(
            TaskCategory::infer("Rename every file in the downloads folder"),
            TaskCategory::FileManagement
        );
        assert_eq!(TaskCategory::infer("Say hello"), TaskCategory::General);
    }

    #[test]
    fn category_parse_round_trips_names() {
        for category in [
            TaskCategory::Coding,
            TaskCategory::Research,
            TaskCategory::FileManagement,
            TaskCategory::SystemAdmin,
            TaskCategory::DataProcessing,
            TaskCategory::General,
        ] {
            assert_eq!(TaskCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(TaskCategory::parse("nope"), None);
    }

    #[test]
    fn signature_ignores_arg_insertion_order() {
        let a = ToolCall::new("shell", json!({"command": "ls", "cwd": "."}));
        let mut map = serde_json::Map::new();
        map.insert("cwd".to_string(), json!("."));
        map.insert("command".to_string(), json!("ls"));
        let b = ToolCall::new("shell", Value::Object(map));
        assert_eq!(a.signature(), b.signature());
        assert_ne!(
            a.signature(),
            ToolCall::new("shell", json!({"command": "pwd"})).signature()
        );
        assert_eq!(a.signature().len(), 16);
    }

    #[test]
    fn sanitize_clamps_ranges_and_drops_blank_tool() {
        let reflection = Reflection {
            assessment: Assessment::Continue,
            progress: 140.0,
            confidence: f64::NAN,
            next_action: "  read the file  ".to_string(),
            tool: Some(ToolIntent {
                name: " ".to_string(),
                args: json!({}),
                purpose: String::new(),
            }),
            alternatives: Vec::new(),
            fallback: false,
        }
        .sanitized();

        assert_eq!(reflection.progress, 100.0);
        assert_eq!(reflection.confidence, 0.0);
        assert_eq!(reflection.next_action, "read the file");
        assert!(reflection.tool.is_none());
    }

    #[test]
    fn stop_reasons_map_to_terminal_states() {
        assert_eq!(StopReason::NoProgress.status(), SessionStatus::Stuck);
        assert_eq!(StopReason::RepeatedAction.status(), SessionStatus::Stuck);
        assert_eq!(StopReason::MaxErrors.status(), SessionStatus::ErrorExhausted);
        assert_eq!(
            serde_json::to_string(&StopReason::NoProgress).expect("json"),
            "\"no_progress\""
        );
    }
}
