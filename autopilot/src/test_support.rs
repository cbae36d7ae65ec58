//! Scripted collaborators for tests.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{Alternative, ToolCall, ToolError, ToolResult};
use crate::io::inference::{InferenceBackend, JudgeRequest, JudgementKind};
use crate::io::tools::{ExecutionContext, ToolExecutor};

/// Inference backend that replays queued answers per judgement kind.
///
/// Answers are returned verbatim (no schema check), so tests can feed
/// out-of-range values. An empty queue is a backend fault.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    answers: RefCell<HashMap<JudgementKind, VecDeque<Result<Value, String>>>>,
    requests: RefCell<Vec<JudgeRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: JudgementKind, answer: Value) {
        self.answers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push_back(Ok(answer));
    }

    pub fn push_reflection(&self, answer: Value) {
        self.push(JudgementKind::Reflection, answer);
    }

    pub fn push_diagnosis(&self, answer: Value) {
        self.push(JudgementKind::Diagnosis, answer);
    }

    pub fn push_alignment(&self, answer: Value) {
        self.push(JudgementKind::Alignment, answer);
    }

    /// Queue a backend fault.
    pub fn push_error(&self, kind: JudgementKind, message: &str) {
        self.answers
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_of(&self, kind: JudgementKind) -> Vec<JudgeRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn judge(&self, request: &JudgeRequest) -> Result<Value> {
        self.requests.borrow_mut().push(request.clone());
        let next = self
            .answers
            .borrow_mut()
            .get_mut(&request.kind)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted {} answer", request.kind)),
        }
    }
}

/// Tool executor that replays queued results per tool name.
///
/// Without a queued or sticky result, a call succeeds with `"<tool> ok"`.
#[derive(Debug, Default)]
pub struct ScriptedToolExecutor {
    queued: RefCell<HashMap<String, VecDeque<ToolResult>>>,
    sticky: RefCell<HashMap<String, ToolResult>>,
    calls: RefCell<Vec<ToolCall>>,
}

impl ScriptedToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result for the next call of `tool`.
    pub fn respond(&self, tool: &str, result: ToolResult) {
        self.queued
            .borrow_mut()
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
    }

    /// Result for every call of `tool` once its queue is empty.
    pub fn always(&self, tool: &str, result: ToolResult) {
        self.sticky.borrow_mut().insert(tool.to_string(), result);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.borrow().clone()
    }
}

impl ToolExecutor for ScriptedToolExecutor {
    fn execute(&self, call: &ToolCall, _context: &ExecutionContext) -> Result<ToolResult> {
        self.calls.borrow_mut().push(call.clone());
        if let Some(result) = self
            .queued
            .borrow_mut()
            .get_mut(&call.tool)
            .and_then(VecDeque::pop_front)
        {
            return Ok(result);
        }
        if let Some(result) = self.sticky.borrow().get(&call.tool) {
            return Ok(result.clone());
        }
        Ok(ToolResult::ok(format!("{} ok", call.tool)))
    }
}

/// Reflection answer naming one explicit tool.
pub fn tool_reflection(progress: f64, confidence: f64, tool: &str, args: Value) -> Value {
    json!({
        "assessment": "continue",
        "progress": progress,
        "confidence": confidence,
        "next_action": format!("use {tool}"),
        "tool": { "name": tool, "args": args, "purpose": "advance the goal" },
        "alternatives": []
    })
}

/// Reflection answer declaring the goal done.
pub fn complete_reflection(confidence: f64) -> Value {
    json!({
        "assessment": "complete",
        "progress": 100.0,
        "confidence": confidence,
        "next_action": "",
        "tool": null,
        "alternatives": []
    })
}

/// Reflection answer offering candidate plans.
pub fn plan_reflection(progress: f64, alternatives: &[Alternative]) -> Value {
    json!({
        "assessment": "continue",
        "progress": progress,
        "confidence": 0.6,
        "next_action": "pick the best plan",
        "tool": null,
        "alternatives": alternatives,
    })
}

/// Single-step alternative.
pub fn alternative(id: &str, name: &str, step: ToolCall, confidence: f64) -> Alternative {
    Alternative {
        id: id.to_string(),
        name: name.to_string(),
        steps: vec![step],
        assumptions: Vec::new(),
        prerequisites: Vec::new(),
        confidence,
    }
}

/// Failed shell result with an exit code and stderr.
pub fn shell_failure(exit_code: i32, stderr: &str) -> ToolResult {
    ToolResult::failed(ToolError {
        message: format!("command exited with status {exit_code}"),
        exit_code: Some(exit_code),
        stdout: Some(String::new()),
        stderr: Some(stderr.to_string()),
        signal: None,
    })
}
