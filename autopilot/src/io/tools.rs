//! Tool execution for agent actions.
//!
//! The [`ToolExecutor`] trait is the only way the session loop touches the
//! outside world through tools. `Err` means the executor itself broke; a tool
//! that ran and failed is reported through `ToolResult::error`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::config::ToolsConfig;
use crate::core::types::{ToolCall, ToolError, ToolResult};
use crate::io::process::run_command_with_timeout;

const MAX_SEARCH_MATCHES: usize = 200;

/// Per-call execution parameters.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Every path argument is resolved against, and confined to, this root.
    pub workspace_root: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub permitted_tools: Vec<String>,
}

impl ExecutionContext {
    pub fn new(workspace_root: &Path, tools: &ToolsConfig) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
            timeout: Duration::from_secs(tools.shell_timeout_secs),
            output_limit_bytes: tools.output_limit_bytes,
            permitted_tools: tools.allowed.clone(),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }
}

/// Abstraction over tool backends.
pub trait ToolExecutor {
    fn execute(&self, call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult>;
}

/// Local tools: `shell`, `read_file`, `write_file`, `list_dir`, `search`.
#[derive(Debug, Clone, Default)]
pub struct LocalToolExecutor;

impl ToolExecutor for LocalToolExecutor {
    #[instrument(skip_all, fields(tool = %call.tool))]
    fn execute(&self, call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
        if !context.permitted_tools.iter().any(|t| t == &call.tool) {
            warn!("tool not permitted");
            return Ok(ToolResult::failed(ToolError::message(format!(
                "tool '{}' is not permitted",
                call.tool
            ))));
        }
        let result = match call.tool.as_str() {
            "shell" => run_shell(call, context),
            "read_file" => read_file(call, context),
            "write_file" => write_file(call, context),
            "list_dir" => list_dir(call, context),
            "search" => search(call, context),
            other => Ok(ToolResult::failed(ToolError::message(format!(
                "unknown tool '{other}'"
            )))),
        }?;
        debug!(ok = result.is_ok(), "tool finished");
        Ok(result)
    }
}

fn required_arg<'a>(call: &'a ToolCall, key: &str) -> std::result::Result<&'a str, ToolResult> {
    call.arg_str(key).filter(|v| !v.is_empty()).ok_or_else(|| {
        ToolResult::failed(ToolError::message(format!(
            "missing required argument: {key}"
        )))
    })
}

/// Resolve `raw` under `root`, rejecting anything that escapes it.
pub fn confine(root: &Path, raw: &str) -> std::result::Result<PathBuf, ToolResult> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.starts_with(root) {
        Ok(normalized)
    } else {
        Err(ToolResult::failed(ToolError::message(format!(
            "permission denied: path '{raw}' is outside the workspace"
        ))))
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn io_failure(action: &str, raw: &str, err: &std::io::Error) -> ToolResult {
    let message = match err.kind() {
        std::io::ErrorKind::NotFound => format!("file not found: {raw}"),
        std::io::ErrorKind::PermissionDenied => format!("permission denied: {action} {raw}"),
        _ => format!("{action} {raw}: {err}"),
    };
    ToolResult::failed(ToolError::message(message))
}

fn truncate_to(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = text.len() - cut;
    text.truncate(cut);
    text.push_str(&format!("\n[truncated {dropped} bytes]"));
    text
}

fn run_shell(call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
    let command = match required_arg(call, "command") {
        Ok(command) => command,
        Err(failed) => return Ok(failed),
    };
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(&context.workspace_root);
    let output = run_command_with_timeout(cmd, None, context.timeout, context.output_limit_bytes)
        .context("run shell tool")?;

    let stdout = output.stdout_text();
    let stderr = output.stderr_text();
    if output.timed_out {
        return Ok(ToolResult::failed(ToolError {
            message: format!("command timed out after {:?}", context.timeout),
            exit_code: output.status.code(),
            stdout: Some(stdout),
            stderr: Some(stderr),
            signal: output.signal().map(|s| s.to_string()),
        }));
    }
    if !output.status.success() {
        let message = match output.status.code() {
            Some(code) => format!("command exited with status {code}"),
            None => "command terminated by signal".to_string(),
        };
        return Ok(ToolResult::failed(ToolError {
            message,
            exit_code: output.status.code(),
            stdout: Some(stdout),
            stderr: Some(stderr),
            signal: output.signal().map(|s| s.to_string()),
        }));
    }
    Ok(ToolResult::ok(stdout))
}

fn read_file(call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
    let raw = match required_arg(call, "path") {
        Ok(raw) => raw,
        Err(failed) => return Ok(failed),
    };
    let path = match confine(&context.workspace_root, raw) {
        Ok(path) => path,
        Err(failed) => return Ok(failed),
    };
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(ToolResult::ok(truncate_to(
            contents,
            context.output_limit_bytes,
        ))),
        Err(err) => Ok(io_failure("read", raw, &err)),
    }
}

fn write_file(call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
    let raw = match required_arg(call, "path") {
        Ok(raw) => raw,
        Err(failed) => return Ok(failed),
    };
    let content = call.arg_str("content").unwrap_or_default();
    let path = match confine(&context.workspace_root, raw) {
        Ok(path) => path,
        Err(failed) => return Ok(failed),
    };
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        return Ok(io_failure("create directory for", raw, &err));
    }
    match fs::write(&path, content) {
        Ok(()) => Ok(ToolResult {
            content: format!("wrote {} bytes to {raw}", content.len()),
            error: None,
            artifacts: vec![relative(&context.workspace_root, &path)],
        }),
        Err(err) => Ok(io_failure("write", raw, &err)),
    }
}

fn list_dir(call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
    let raw = call.arg_str("path").unwrap_or(".");
    let path = match confine(&context.workspace_root, raw) {
        Ok(path) => path,
        Err(failed) => return Ok(failed),
    };
    let entries = match fs::read_dir(&path) {
        Ok(entries) => entries,
        Err(err) => return Ok(io_failure("list", raw, &err)),
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            name
        })
        .collect();
    names.sort();
    Ok(ToolResult::ok(truncate_to(
        names.join("\n"),
        context.output_limit_bytes,
    )))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name == "target")
}

fn search(call: &ToolCall, context: &ExecutionContext) -> Result<ToolResult> {
    let pattern = match required_arg(call, "pattern") {
        Ok(pattern) => pattern,
        Err(failed) => return Ok(failed),
    };
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => {
            return Ok(ToolResult::failed(ToolError::message(format!(
                "invalid argument: pattern does not compile: {err}"
            ))));
        }
    };
    let raw = call.arg_str("path").unwrap_or(".");
    let root = match confine(&context.workspace_root, raw) {
        Ok(path) => path,
        Err(failed) => return Ok(failed),
    };
    if !root.exists() {
        return Ok(ToolResult::failed(ToolError::message(format!(
            "file not found: {raw}"
        ))));
    }

    let mut matches = Vec::new();
    'files: for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (idx, line) in contents.lines().enumerate() {
            if re.is_match(line) {
                matches.push(format!(
                    "{}:{}: {}",
                    relative(&context.workspace_root, entry.path()),
                    idx + 1,
                    line.trim()
                ));
                if matches.len() >= MAX_SEARCH_MATCHES {
                    break 'files;
                }
            }
        }
    }

    let content = if matches.is_empty() {
        "no matches".to_string()
    } else {
        matches.join("\n")
    };
    Ok(ToolResult::ok(truncate_to(
        content,
        context.output_limit_bytes,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(root: &Path) -> ExecutionContext {
        ExecutionContext::new(root, &ToolsConfig::default())
    }

    #[test]
    fn write_then_read_round_trips_and_reports_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let write = ToolCall::new(
            "write_file",
            json!({"path": "notes/todo.txt", "content": "ship it"}),
        );
        let result = LocalToolExecutor.execute(&write, &ctx).expect("write");
        assert!(result.is_ok());
        assert_eq!(result.artifacts, vec!["notes/todo.txt".to_string()]);

        let read = ToolCall::new("read_file", json!({"path": "notes/todo.txt"}));
        let result = LocalToolExecutor.execute(&read, &ctx).expect("read");
        assert_eq!(result.content, "ship it");
    }

    #[test]
    fn missing_file_is_a_tool_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let call = ToolCall::new("read_file", json!({"path": "nope.txt"}));
        let result = LocalToolExecutor
            .execute(&call, &context(temp.path()))
            .expect("execute");
        let error = result.error.expect("error");
        assert_eq!(error.message, "file not found: nope.txt");
    }

    #[test]
    fn paths_outside_workspace_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let call = ToolCall::new("read_file", json!({"path": "../../etc/passwd"}));
        let result = LocalToolExecutor
            .execute(&call, &context(temp.path()))
            .expect("execute");
        assert!(
            result
                .error
                .expect("error")
                .message
                .contains("outside the workspace")
        );
    }

    #[test]
    fn unpermitted_tool_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.permitted_tools = vec!["read_file".to_string()];
        let call = ToolCall::new("shell", json!({"command": "echo hi"}));
        let result = LocalToolExecutor.execute(&call, &ctx).expect("execute");
        assert!(result.error.expect("error").message.contains("not permitted"));
    }

    #[test]
    fn list_dir_marks_directories_and_sorts() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("b.txt"), "").expect("write");
        fs::write(temp.path().join("a.txt"), "").expect("write");
        let result = LocalToolExecutor
            .execute(&ToolCall::without_args("list_dir"), &context(temp.path()))
            .expect("list");
        assert_eq!(result.content, "a.txt\nb.txt\nsrc/");
    }

    #[test]
    fn search_finds_matching_lines_and_skips_hidden_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join("src/main.rs"), "fn main() {}\n// todo\n").expect("write");
        fs::write(temp.path().join(".git/config"), "fn main").expect("write");
        let call = ToolCall::new("search", json!({"pattern": "fn main"}));
        let result = LocalToolExecutor
            .execute(&call, &context(temp.path()))
            .expect("search");
        assert_eq!(result.content, "src/main.rs:1: fn main() {}");
    }

    #[cfg(unix)]
    #[test]
    fn shell_failure_carries_exit_code_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let call = ToolCall::new("shell", json!({"command": "echo oops >&2; exit 127"}));
        let result = LocalToolExecutor
            .execute(&call, &context(temp.path()))
            .expect("shell");
        let error = result.error.expect("error");
        assert_eq!(error.exit_code, Some(127));
        assert_eq!(error.stderr.as_deref().map(str::trim), Some("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn shell_success_returns_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let call = ToolCall::new("shell", json!({"command": "printf hello"}));
        let result = LocalToolExecutor
            .execute(&call, &context(temp.path()))
            .expect("shell");
        assert_eq!(result.content, "hello");
    }
}
