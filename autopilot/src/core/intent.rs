//! Decoding a reflection into the action to take.
//!
//! Structured fields win: alternatives, then an explicit tool. Only when the
//! reflection carries neither is the free-text `next_action` run through an
//! ordered rule table. Anything that resolves to a tool outside the permitted
//! set is replaced by the inspection default.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::core::types::{Alternative, Assessment, Reflection, TaskCategory, ToolCall};

#[derive(Debug, Clone, PartialEq)]
pub enum ActionIntent {
    /// One or more candidate plans. Two or more go through the decision engine.
    Plan(Vec<Alternative>),
    /// Tool named explicitly by the reflection.
    Tool(ToolCall),
    /// Tool derived from the free-text next action.
    Inferred(ToolCall),
    /// Safe look-around used when nothing better is available.
    Inspect(ToolCall),
    /// Nothing to do (the reflection considers the goal complete).
    Idle,
}

impl ActionIntent {
    /// Label recorded in iteration history.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionIntent::Plan(_) => "plan",
            ActionIntent::Tool(_) => "tool",
            ActionIntent::Inferred(_) => "inferred",
            ActionIntent::Inspect(_) => "inspect",
            ActionIntent::Idle => "idle",
        }
    }
}

/// `list_dir "."`.
pub fn inspection_default() -> ToolCall {
    ToolCall::new("list_dir", json!({ "path": "." }))
}

pub fn is_permitted(tool: &str, permitted: &[String]) -> bool {
    permitted.iter().any(|p| p == tool)
}

fn plan_is_permitted(alternative: &Alternative, permitted: &[String]) -> bool {
    !alternative.steps.is_empty()
        && alternative
            .steps
            .iter()
            .all(|step| is_permitted(&step.tool, permitted))
}

fn inspect(permitted: &[String]) -> ActionIntent {
    if is_permitted("list_dir", permitted) {
        ActionIntent::Inspect(inspection_default())
    } else {
        ActionIntent::Idle
    }
}

/// Decode the action for this iteration.
pub fn decode_intent(
    reflection: &Reflection,
    category: TaskCategory,
    permitted: &[String],
) -> ActionIntent {
    let plans: Vec<Alternative> = reflection
        .alternatives
        .iter()
        .filter(|alt| plan_is_permitted(alt, permitted))
        .cloned()
        .collect();
    if !plans.is_empty() {
        return ActionIntent::Plan(plans);
    }

    if let Some(tool) = &reflection.tool {
        let call = ToolCall::new(tool.name.trim(), tool.args.clone());
        if is_permitted(&call.tool, permitted) {
            return ActionIntent::Tool(call);
        }
        return inspect(permitted);
    }

    if reflection.assessment == Assessment::Complete && reflection.next_action.is_empty() {
        return ActionIntent::Idle;
    }

    match infer_tool_call(category, &reflection.next_action) {
        Some(call) if is_permitted(&call.tool, permitted) => ActionIntent::Inferred(call),
        _ => inspect(permitted),
    }
}

struct InferenceRule {
    /// Empty means every category.
    categories: &'static [TaskCategory],
    pattern: Regex,
    build: fn(&Captures<'_>) -> ToolCall,
}

fn capture(caps: &Captures<'_>, name: &str) -> String {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn path_or_dot(caps: &Captures<'_>) -> String {
    let path = capture(caps, "path");
    if path.is_empty() { ".".to_string() } else { path }
}

static RULES: LazyLock<Vec<InferenceRule>> = LazyLock::new(|| {
    let re = |pattern: &str| Regex::new(pattern).expect("intent pattern should be valid");
    vec![
        InferenceRule {
            categories: &[],
            pattern: re(r"`(?P<command>[^`]+)`"),
            build: |caps| ToolCall::new("shell", json!({ "command": capture(caps, "command") })),
        },
        InferenceRule {
            categories: &[],
            pattern: re(
                r"(?i)\b(?:read|open|view|cat|show)\s+(?:the\s+)?(?:contents\s+of\s+)?(?:file\s+)?(?P<path>[\w./-]+\.\w+)",
            ),
            build: |caps| ToolCall::new("read_file", json!({ "path": capture(caps, "path") })),
        },
        InferenceRule {
            categories: &[],
            pattern: re(
                r#"(?i)\b(?:search|grep|look)\s+(?:for\s+)?["'](?P<pattern>[^"']+)["'](?:\s+in\s+(?P<path>[\w./-]+))?"#,
            ),
            build: |caps| {
                ToolCall::new(
                    "search",
                    json!({
                        "pattern": regex::escape(&capture(caps, "pattern")),
                        "path": path_or_dot(caps),
                    }),
                )
            },
        },
        InferenceRule {
            categories: &[],
            pattern: re(
                r"(?i)\b(?:list|ls|explore)\b(?:\s+(?:the\s+)?(?:files\s+in\s+|contents\s+of\s+)?(?:directory\s+|folder\s+)?(?P<path>[\w.-]*/[\w./-]*))?",
            ),
            build: |caps| ToolCall::new("list_dir", json!({ "path": path_or_dot(caps) })),
        },
        InferenceRule {
            categories: &[TaskCategory::DataProcessing, TaskCategory::Research],
            pattern: re(r"(?i)\b(?:summari[sz]e|analy[sz]e|inspect)\s+(?P<path>[\w./-]+\.\w+)"),
            build: |caps| ToolCall::new("read_file", json!({ "path": capture(caps, "path") })),
        },
    ]
});

/// Map free-text intent to a tool call. First applicable matching rule wins.
pub fn infer_tool_call(category: TaskCategory, text: &str) -> Option<ToolCall> {
    RULES
        .iter()
        .filter(|rule| rule.categories.is_empty() || rule.categories.contains(&category))
        .find_map(|rule| rule.pattern.captures(text).map(|caps| (rule.build)(&caps)))
}

/// Signature of a whole action (one or more calls) for loop detection.
pub fn action_signature(calls: &[ToolCall]) -> String {
    match calls {
        [single] => single.signature(),
        many => {
            let mut hasher = Sha256::new();
            for call in many {
                hasher.update(call.signature().as_bytes());
                hasher.update([b'|']);
            }
            let mut sig = hex::encode(hasher.finalize());
            sig.truncate(16);
            sig
        }
    }
}
