//! Canonical failure diagnosis and its heuristic producer.
//!
//! `Diagnosis` is the only diagnosis shape in the system. The judgement path
//! (`agents::diagnostician`) produces it from backend output; when that is
//! unavailable, `heuristic_diagnosis` builds one from the quick classification.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::classifier::{Classification, ErrorCategory, Severity};
use crate::core::types::{ToolCall, ToolError, clamp_finite};

/// Number of levels in a why chain.
pub const WHY_CHAIN_LEN: usize = 5;

const UNDETERMINED: &str = "no deeper cause determined";

/// Everything known about one failed tool attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub call: ToolCall,
    pub error: ToolError,
    pub iteration: u32,
    /// Descriptions of the most recent actions, oldest first (at most 5).
    pub recent_actions: Vec<String>,
    pub permitted_tools: Vec<String>,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub category: ErrorCategory,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub name: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    pub description: String,
    pub confidence: f64,
    pub estimated_iterations: u32,
    #[serde(default)]
    pub steps: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub steps: Vec<ToolCall>,
    /// Names of strategies to try next, best first.
    pub fallback_chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOpportunity {
    pub pattern: String,
    pub guidance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    Judgement,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub why_chain: Vec<String>,
    pub root_cause: RootCause,
    pub severity: Severity,
    pub recoverable: bool,
    pub alternatives: Vec<RecoveryStrategy>,
    #[serde(default)]
    pub recovery_plan: Option<RecoveryPlan>,
    #[serde(default)]
    pub learning: Option<LearningOpportunity>,
    pub source: DiagnosisSource,
}

impl Diagnosis {
    /// Enforce structural guarantees on a diagnosis from any producer:
    /// a five-level why chain, clamped confidences, and at least one
    /// alternative sorted by confidence (stable).
    pub fn normalized(mut self) -> Self {
        self.why_chain.retain(|why| !why.trim().is_empty());
        self.why_chain.truncate(WHY_CHAIN_LEN);
        while self.why_chain.len() < WHY_CHAIN_LEN {
            self.why_chain.push(UNDETERMINED.to_string());
        }

        self.root_cause.confidence = clamp_finite(self.root_cause.confidence, 0.0, 1.0);
        for alt in &mut self.alternatives {
            alt.confidence = clamp_finite(alt.confidence, 0.0, 1.0);
            alt.estimated_iterations = alt.estimated_iterations.max(1);
        }
        if self.alternatives.is_empty() {
            self.alternatives.push(reassess_strategy());
        }
        self.alternatives
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if self.severity == Severity::Fatal {
            self.recoverable = false;
        }
        self
    }

    pub fn best_alternative(&self) -> Option<&RecoveryStrategy> {
        self.alternatives.first()
    }
}

fn reassess_strategy() -> RecoveryStrategy {
    RecoveryStrategy {
        name: "reassess approach".to_string(),
        required_tools: Vec::new(),
        description: "step back and choose a different action in the next iteration".to_string(),
        confidence: 0.3,
        estimated_iterations: 1,
        steps: Vec::new(),
    }
}

fn program_of(call: &ToolCall) -> Option<&str> {
    call.arg_str("command")?.split_whitespace().next()
}

fn parent_of(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn strategy(
    name: &str,
    description: impl Into<String>,
    confidence: f64,
    steps: Vec<ToolCall>,
) -> RecoveryStrategy {
    let mut required_tools: Vec<String> = steps.iter().map(|s| s.tool.clone()).collect();
    required_tools.dedup();
    RecoveryStrategy {
        name: name.to_string(),
        required_tools,
        description: description.into(),
        confidence,
        estimated_iterations: steps.len().max(1) as u32,
        steps,
    }
}

fn shell(command: impl Into<String>) -> ToolCall {
    ToolCall::new("shell", serde_json::json!({ "command": command.into() }))
}

fn list_dir(path: impl Into<String>) -> ToolCall {
    ToolCall::new("list_dir", serde_json::json!({ "path": path.into() }))
}

/// Generic recovery strategies for a category, with concrete steps where the
/// failed call carries enough information to derive them.
fn category_strategies(category: ErrorCategory, call: &ToolCall) -> Vec<RecoveryStrategy> {
    let path = call.arg_str("path");
    match category {
        ErrorCategory::CommandNotFound => {
            let mut out = Vec::new();
            if let Some(program) = program_of(call) {
                out.push(strategy(
                    "locate program",
                    format!("check whether `{program}` is installed"),
                    0.6,
                    vec![shell(format!("command -v {program} || ls /usr/local/bin /usr/bin | head -50"))],
                ));
            }
            out.push(strategy(
                "use equivalent command",
                "replace the missing program with an available equivalent",
                0.5,
                Vec::new(),
            ));
            out
        }
        ErrorCategory::PermissionDenied => {
            let target = path.map(parent_of).unwrap_or_else(|| ".".to_string());
            vec![
                strategy(
                    "inspect permissions",
                    "list ownership and mode bits of the target location",
                    0.6,
                    vec![shell(format!("ls -la {target}"))],
                ),
                strategy(
                    "use writable location",
                    "redirect the operation to a path inside the workspace",
                    0.5,
                    Vec::new(),
                ),
            ]
        }
        ErrorCategory::FileNotFound => {
            let mut out = Vec::new();
            if let Some(path) = path {
                out.push(strategy(
                    "list parent directory",
                    "see what exists next to the missing path",
                    0.7,
                    vec![list_dir(parent_of(path))],
                ));
                if let Some(name) = file_name_of(path) {
                    out.push(strategy(
                        "search for file",
                        format!("search the workspace for `{name}`"),
                        0.6,
                        vec![ToolCall::new(
                            "search",
                            serde_json::json!({ "pattern": regex::escape(&name), "path": "." }),
                        )],
                    ));
                }
            } else {
                out.push(strategy(
                    "inspect workspace",
                    "list the workspace root to find the right path",
                    0.5,
                    vec![list_dir(".")],
                ));
            }
            out
        }
        ErrorCategory::Timeout | ErrorCategory::Network | ErrorCategory::RateLimited => vec![
            strategy(
                "retry once",
                "repeat the call; the failure is likely transient",
                0.55,
                vec![call.clone()],
            ),
            strategy(
                "reduce scope",
                "split the work into smaller calls",
                0.45,
                Vec::new(),
            ),
        ],
        ErrorCategory::Syntax => {
            let mut out = Vec::new();
            if let Some(path) = path {
                out.push(strategy(
                    "re-read input",
                    "read the file again and fix the malformed part",
                    0.6,
                    vec![ToolCall::new("read_file", serde_json::json!({ "path": path }))],
                ));
            }
            out.push(strategy(
                "rewrite command",
                "rebuild the command with correct quoting and syntax",
                0.5,
                Vec::new(),
            ));
            out
        }
        ErrorCategory::InvalidArguments => {
            let mut out = Vec::new();
            if let Some(program) = program_of(call) {
                out.push(strategy(
                    "read usage",
                    format!("show the usage text of `{program}`"),
                    0.6,
                    vec![shell(format!("{program} --help"))],
                ));
            }
            out.push(strategy(
                "correct arguments",
                "adjust the arguments to match the documented usage",
                0.5,
                Vec::new(),
            ));
            out
        }
        ErrorCategory::ResourceExhausted => vec![strategy(
            "check resources",
            "inspect free disk space in the workspace",
            0.4,
            vec![shell("df -h .")],
        )],
        ErrorCategory::Dependency => vec![
            strategy(
                "inspect project manifest",
                "list the workspace to find the dependency manifest",
                0.5,
                vec![list_dir(".")],
            ),
            strategy(
                "install dependency",
                "install the missing dependency before retrying",
                0.45,
                Vec::new(),
            ),
        ],
        ErrorCategory::ToolNotPermitted => vec![strategy(
            "switch to permitted tool",
            "achieve the same purpose with one of the permitted tools",
            0.6,
            Vec::new(),
        )],
        ErrorCategory::Unknown => vec![strategy(
            "inspect workspace",
            "gather more context before the next attempt",
            0.35,
            vec![list_dir(".")],
        )],
    }
}

fn cause_statement(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::CommandNotFound => "the program the action relies on is not installed or not on PATH",
        ErrorCategory::PermissionDenied => "the action touched a location the agent may not access",
        ErrorCategory::FileNotFound => "the action referenced a path that does not exist",
        ErrorCategory::Timeout => "the action took longer than its time budget",
        ErrorCategory::Network => "a remote resource was unreachable",
        ErrorCategory::Syntax => "the command or input was malformed",
        ErrorCategory::InvalidArguments => "the arguments did not match the program's usage",
        ErrorCategory::ResourceExhausted => "the environment ran out of a finite resource",
        ErrorCategory::Dependency => "a required library or package is missing",
        ErrorCategory::ToolNotPermitted => "the action used a tool outside the permitted set",
        ErrorCategory::RateLimited => "a remote service throttled the request",
        ErrorCategory::Unknown => "the failure does not match any known pattern",
    }
}

/// Build a diagnosis from the quick classification alone.
///
/// `id` and `timestamp` come from the caller so this stays deterministic.
pub fn heuristic_diagnosis(
    context: &FailureContext,
    classification: &Classification,
    id: String,
    timestamp: String,
) -> Diagnosis {
    let category = classification.category;
    let call = &context.call;

    let why_chain = vec![
        format!("`{}` failed: {}", call.describe(), context.error),
        format!(
            "the error matches the {} pattern (confidence {:.2})",
            category, classification.confidence
        ),
        cause_statement(category).to_string(),
        if context.recent_actions.is_empty() {
            "the action was attempted without first inspecting the environment".to_string()
        } else {
            format!(
                "the preceding actions ({}) did not establish the action's preconditions",
                context.recent_actions.join("; ")
            )
        },
        format!("next time: {}", classification.recovery_hint),
    ];

    let permitted = |s: &RecoveryStrategy| {
        s.required_tools
            .iter()
            .all(|tool| context.permitted_tools.iter().any(|p| p == tool))
    };
    let alternatives: Vec<RecoveryStrategy> = category_strategies(category, call)
        .into_iter()
        .filter(permitted)
        .collect();

    Diagnosis {
        id,
        timestamp,
        why_chain,
        root_cause: RootCause {
            category,
            description: cause_statement(category).to_string(),
            confidence: classification.confidence,
        },
        severity: classification.severity,
        recoverable: classification.severity.is_recoverable(),
        alternatives,
        recovery_plan: None,
        learning: Some(LearningOpportunity {
            pattern: format!("{}:{}", call.tool, category),
            guidance: classification.recovery_hint.clone(),
        }),
        source: DiagnosisSource::Heuristic,
    }
    .normalized()
}
