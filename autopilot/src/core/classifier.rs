//! Pattern-based classification of tool errors.
//!
//! A static, ordered rule table maps an error (message, streams, exit code,
//! signal, tool name) to a category, a severity and a recovery hint. A rule's
//! effective confidence is its base confidence scaled by the fraction of its
//! matchers that hit; the best rule wins and ties keep table order.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{ToolCall, ToolError};

/// Confidence reported when no rule matches.
pub const UNKNOWN_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CommandNotFound,
    PermissionDenied,
    FileNotFound,
    Timeout,
    Network,
    Syntax,
    InvalidArguments,
    ResourceExhausted,
    Dependency,
    ToolNotPermitted,
    RateLimited,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::CommandNotFound => "command_not_found",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::FileNotFound => "file_not_found",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::InvalidArguments => "invalid_arguments",
            ErrorCategory::ResourceExhausted => "resource_exhausted",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::ToolNotPermitted => "tool_not_permitted",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).ok()
    }

    /// Generic next step for this category.
    pub fn recovery_hint(self) -> &'static str {
        match self {
            ErrorCategory::CommandNotFound => {
                "check that the program is installed and on PATH, or use an equivalent command"
            }
            ErrorCategory::PermissionDenied => {
                "inspect file permissions and work on a path the agent can write to"
            }
            ErrorCategory::FileNotFound => "list the parent directory and correct the path",
            ErrorCategory::Timeout => "retry with a smaller unit of work or a narrower command",
            ErrorCategory::Network => "retry later or use locally available resources",
            ErrorCategory::Syntax => "re-read the input and fix the malformed command or content",
            ErrorCategory::InvalidArguments => "consult the command usage and correct the arguments",
            ErrorCategory::ResourceExhausted => "free resources or reduce the size of the operation",
            ErrorCategory::Dependency => "install or locate the missing dependency first",
            ErrorCategory::ToolNotPermitted => "choose a permitted tool for the same purpose",
            ErrorCategory::RateLimited => "wait before retrying and reduce request frequency",
            ErrorCategory::Unknown => "inspect the full output and try a different approach",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Likely to succeed on a plain retry.
    Transient,
    /// Needs a different action, but the goal is still reachable.
    Recoverable,
    /// Cannot be fixed from inside the session.
    Fatal,
}

impl Severity {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Severity::Fatal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Effective confidence in `[0, 1]`.
    pub confidence: f64,
    pub recovery_hint: String,
    /// Name of the winning rule; `None` when nothing matched.
    pub rule: Option<String>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            category: ErrorCategory::Unknown,
            severity: Severity::Recoverable,
            confidence: UNKNOWN_CONFIDENCE,
            recovery_hint: ErrorCategory::Unknown.recovery_hint().to_string(),
            rule: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Message,
    Stderr,
    Stdout,
    /// Message, stderr and stdout together.
    AnyText,
    Signal,
    Tool,
}

enum Matcher {
    Text(Field, Regex),
    ExitCode(i32),
}

impl Matcher {
    fn matches(&self, call: &ToolCall, error: &ToolError, any_text: &str) -> bool {
        match self {
            Matcher::ExitCode(code) => error.exit_code == Some(*code),
            Matcher::Text(field, re) => match field {
                Field::Message => re.is_match(&error.message),
                Field::Stderr => error.stderr.as_deref().is_some_and(|s| re.is_match(s)),
                Field::Stdout => error.stdout.as_deref().is_some_and(|s| re.is_match(s)),
                Field::AnyText => re.is_match(any_text),
                Field::Signal => error.signal.as_deref().is_some_and(|s| re.is_match(s)),
                Field::Tool => re.is_match(&call.tool),
            },
        }
    }
}

struct Rule {
    name: &'static str,
    category: ErrorCategory,
    severity: Severity,
    confidence: f64,
    matchers: Vec<Matcher>,
}

fn text(field: Field, pattern: &str) -> Matcher {
    let re = Regex::new(&format!("(?i){pattern}")).expect("classifier pattern should be valid");
    Matcher::Text(field, re)
}

fn rule(
    name: &'static str,
    category: ErrorCategory,
    severity: Severity,
    confidence: f64,
    matchers: Vec<Matcher>,
) -> Rule {
    Rule {
        name,
        category,
        severity,
        confidence,
        matchers,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use ErrorCategory as C;
    use Severity as S;
    vec![
        // Exit 127 is the shell's "command not found"; nothing else reaches 0.95.
        rule("exit_127", C::CommandNotFound, S::Recoverable, 0.95, vec![
            Matcher::ExitCode(127),
        ]),
        rule("command_not_found_text", C::CommandNotFound, S::Recoverable, 0.9, vec![
            text(Field::AnyText, r"command not found|not recognized as an internal or external command|executable file not found"),
        ]),
        rule("tool_not_permitted", C::ToolNotPermitted, S::Recoverable, 0.9, vec![
            text(Field::Message, r"tool\b.*\bnot (permitted|allowed)|unknown tool"),
        ]),
        rule("rate_limited", C::RateLimited, S::Transient, 0.9, vec![
            text(Field::AnyText, r"rate.?limit|too many requests|\b429\b"),
        ]),
        rule("permission_denied", C::PermissionDenied, S::Recoverable, 0.9, vec![
            text(Field::AnyText, r"permission denied|\beacces\b|operation not permitted|\beperm\b|access is denied"),
        ]),
        rule("exit_126", C::PermissionDenied, S::Recoverable, 0.8, vec![
            Matcher::ExitCode(126),
        ]),
        rule("missing_path_on_fs_tool", C::FileNotFound, S::Recoverable, 0.9, vec![
            text(Field::Tool, r"^(read_file|list_dir|write_file|search)$"),
            text(Field::AnyText, r"not found|no such file|does not exist"),
        ]),
        rule("file_not_found", C::FileNotFound, S::Recoverable, 0.85, vec![
            text(Field::AnyText, r"no such file or directory|\benoent\b|file not found|cannot find the (file|path)|does not exist"),
        ]),
        rule("timeout_text", C::Timeout, S::Transient, 0.85, vec![
            text(Field::AnyText, r"timed? ?out|deadline exceeded|\betimedout\b"),
        ]),
        rule("timeout_exit", C::Timeout, S::Transient, 0.8, vec![
            Matcher::ExitCode(124),
        ]),
        rule("killed_by_signal", C::Timeout, S::Transient, 0.7, vec![
            text(Field::Signal, r"^(SIG)?(KILL|TERM|ALRM)$|^(9|14|15)$"),
        ]),
        rule("network", C::Network, S::Transient, 0.85, vec![
            text(Field::AnyText, r"connection (refused|reset|timed out)|could not resolve|name resolution|network is unreachable|\beconn(refused|reset)\b|host unreachable|ssl|tls handshake"),
        ]),
        rule("resource_exhausted", C::ResourceExhausted, S::Fatal, 0.85, vec![
            text(Field::AnyText, r"no space left|out of memory|cannot allocate memory|disk quota exceeded|too many open files|\beno(spc|mem)\b"),
        ]),
        rule("oom_killed", C::ResourceExhausted, S::Fatal, 0.6, vec![
            Matcher::ExitCode(137),
        ]),
        rule("dependency", C::Dependency, S::Recoverable, 0.8, vec![
            text(Field::AnyText, r"no module named|cannot find module|module not found|could not find crate|unresolved import|missing dependenc|library not loaded|package .+ (is )?not (found|installed)"),
        ]),
        rule("syntax", C::Syntax, S::Recoverable, 0.8, vec![
            text(Field::AnyText, r"syntax error|unexpected token|parse error|invalid syntax|unexpected (eof|end of file)|unterminated"),
        ]),
        rule("invalid_arguments", C::InvalidArguments, S::Recoverable, 0.75, vec![
            text(Field::AnyText, r"invalid (option|argument)|unrecognized (option|argument)|unknown (option|flag)|missing (required )?(argument|operand)|^usage:|\nusage:"),
        ]),
        rule("usage_on_exit_2", C::InvalidArguments, S::Recoverable, 0.8, vec![
            Matcher::ExitCode(2),
            text(Field::Stderr, r"usage|invalid|unknown"),
        ]),
        rule("stdout_error_marker", C::Unknown, S::Recoverable, 0.35, vec![
            text(Field::Stdout, r"\berror\b"),
        ]),
    ]
});

/// Classify a tool error with the static rule table.
pub fn classify(call: &ToolCall, error: &ToolError) -> Classification {
    let any_text = [
        Some(error.message.as_str()),
        error.stderr.as_deref(),
        error.stdout.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n");

    let mut best: Option<(&Rule, f64)> = None;
    for rule in RULES.iter() {
        let matched = rule
            .matchers
            .iter()
            .filter(|m| m.matches(call, error, &any_text))
            .count();
        if matched == 0 {
            continue;
        }
        let effective = rule.confidence * matched as f64 / rule.matchers.len() as f64;
        if best.is_none_or(|(_, score)| effective > score) {
            best = Some((rule, effective));
        }
    }

    match best {
        Some((rule, confidence)) if confidence > UNKNOWN_CONFIDENCE => Classification {
            category: rule.category,
            severity: rule.severity,
            confidence,
            recovery_hint: rule.category.recovery_hint().to_string(),
            rule: Some(rule.name.to_string()),
        },
        _ => Classification::unknown(),
    }
}
