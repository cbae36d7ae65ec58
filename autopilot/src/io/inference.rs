//! Inference backend abstraction for schema-constrained judgements.
//!
//! The [`InferenceBackend`] trait decouples the agents from the actual model
//! runtime. [`CommandBackend`] spawns a configured command (by default
//! `codex exec`); tests use scripted backends that return predetermined JSON
//! without spawning processes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::InferenceConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Which judgement is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JudgementKind {
    Reflection,
    Diagnosis,
    Alignment,
}

impl JudgementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JudgementKind::Reflection => "reflection",
            JudgementKind::Diagnosis => "diagnosis",
            JudgementKind::Alignment => "alignment",
        }
    }
}

impl fmt::Display for JudgementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one judgement call.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub kind: JudgementKind,
    /// Rendered prompt text.
    pub prompt: String,
    /// JSON Schema (Draft 2020-12) the answer must satisfy.
    pub schema: &'static str,
    /// Maximum time to wait for the answer.
    pub timeout: Duration,
}

/// Abstraction over judgement backends.
pub trait InferenceBackend {
    /// Return a JSON value that satisfies `request.schema`.
    fn judge(&self, request: &JudgeRequest) -> Result<Value>;
}

/// Backend that spawns a configured command per judgement.
///
/// `{schema}` and `{output}` in the argv are replaced with file paths; the
/// prompt is written to stdin and the answer is read from the output file.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    workdir: PathBuf,
    scratch_dir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandBackend {
    pub fn new(config: &InferenceConfig, workdir: &Path, scratch_dir: &Path) -> Self {
        Self {
            command: config.command.clone(),
            workdir: workdir.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(&self, schema_path: &Path, output_path: &Path) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("inference command is empty"))?;
        let substitute = |arg: &str| {
            arg.replace("{schema}", &schema_path.to_string_lossy())
                .replace("{output}", &output_path.to_string_lossy())
        };
        let mut cmd = Command::new(substitute(program));
        cmd.args(args.iter().map(|arg| substitute(arg)))
            .current_dir(&self.workdir);
        Ok(cmd)
    }
}

impl InferenceBackend for CommandBackend {
    #[instrument(skip_all, fields(kind = %request.kind, timeout_secs = request.timeout.as_secs()))]
    fn judge(&self, request: &JudgeRequest) -> Result<Value> {
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("create scratch dir {}", self.scratch_dir.display()))?;
        let schema_path = self
            .scratch_dir
            .join(format!("{}.schema.json", request.kind));
        let output_path = self.scratch_dir.join(format!("{}.output.json", request.kind));
        let log_path = self.scratch_dir.join(format!("{}.log", request.kind));

        fs::write(&schema_path, request.schema)
            .with_context(|| format!("write schema {}", schema_path.display()))?;
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }

        info!(program = %self.command[0], "requesting judgement");
        let cmd = self.build_command(&schema_path, &output_path)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run inference command for {}", request.kind))?;

        write_backend_log(&log_path, &output, self.output_limit_bytes)?;

        if output.timed_out {
            warn!("inference command timed out");
            bail!("inference command timed out after {:?}", request.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "inference command failed");
            bail!(
                "inference command failed with status {:?}",
                output.status.code()
            );
        }

        let value = read_output_json(&output_path)?;
        validate_against_schema(&value, request.schema)
            .with_context(|| format!("{} output", request.kind))?;
        debug!("judgement validated");
        Ok(value)
    }
}

fn read_output_json(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!("missing inference output {}", path.display()));
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read inference output {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_backend_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_text());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_text());
    if output.timed_out {
        buf.push_str("\n[inference command timed out]\n");
    }
    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write inference log {}", path.display()))
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_against_schema(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_raw).context("parse json schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
