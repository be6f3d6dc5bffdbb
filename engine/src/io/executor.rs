//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the agents from the actual backend
//! (`codex exec` or an arbitrary command). Tests use scripted executors that
//! return predetermined JSON without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Short agent name used in logs and error messages.
    pub label: &'static str,
    /// Working directory for the executor process (the run's sandbox).
    pub workdir: PathBuf,
    /// Natural-language prompt for LLM-backed executors.
    pub prompt: String,
    /// Structured request for command executors, written to stdin as JSON.
    pub payload: Value,
    /// JSON Schema the output must satisfy.
    pub output_schema: &'static str,
    /// Maximum time to wait for the executor to complete.
    pub timeout: Duration,
    /// Truncate executor output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over agent execution backends.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the agent and return its raw JSON output.
    async fn exec(&self, request: &ExecRequest) -> Result<String>;
}

/// Executor that spawns `codex exec` with a read-only sandbox.
#[derive(Debug, Clone)]
pub struct CodexExecutor {
    model: Option<String>,
    /// Holds per-call schema and last-message files.
    scratch_dir: PathBuf,
}

impl CodexExecutor {
    pub fn new(model: Option<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(agent = request.label, timeout_secs = request.timeout.as_secs()))]
    async fn exec(&self, request: &ExecRequest) -> Result<String> {
        info!(workdir = %request.workdir.display(), "starting codex exec");

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .with_context(|| format!("create scratch dir {}", self.scratch_dir.display()))?;
        let call_id = Uuid::new_v4();
        let schema_path = self
            .scratch_dir
            .join(format!("{}-{call_id}.schema.json", request.label));
        let output_path = self
            .scratch_dir
            .join(format!("{}-{call_id}.output.json", request.label));
        tokio::fs::write(&schema_path, request.output_schema)
            .await
            .with_context(|| format!("write schema {}", schema_path.display()))?;

        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check");
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let result = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .await
        .context("run codex exec");

        let output = match result {
            Ok(output) => check_exit(request, "codex exec", &output).map(|()| output),
            Err(err) => Err(err),
        };
        let contents = match output {
            Ok(_) => tokio::fs::read_to_string(&output_path)
                .await
                .with_context(|| format!("missing executor output {}", output_path.display())),
            Err(err) => Err(err),
        };

        for path in [&schema_path, &output_path] {
            if let Err(err) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), err = %err, "scratch file not removed");
            }
        }
        contents
    }
}

/// Executor that runs a configured command with the JSON payload on stdin.
///
/// The command receives `{"agent": <label>, "request": <payload>}` and must
/// print the output JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    argv: Vec<String>,
}

impl CommandExecutor {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must not be empty"));
        }
        Ok(Self { argv })
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(agent = request.label, program = %self.argv[0]))]
    async fn exec(&self, request: &ExecRequest) -> Result<String> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).current_dir(&request.workdir);

        let stdin = serde_json::to_vec(&serde_json::json!({
            "agent": request.label,
            "request": request.payload,
        }))
        .context("serialize agent request")?;

        let output = run_command_with_timeout(
            cmd,
            Some(&stdin),
            request.timeout,
            request.output_limit_bytes,
        )
        .await
        .context("run agent command")?;
        check_exit(request, "agent command", &output)?;
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "{} output exceeded {} bytes",
                request.label,
                request.output_limit_bytes
            ));
        }
        String::from_utf8(output.stdout).context("agent output is not utf-8")
    }
}

fn check_exit(request: &ExecRequest, what: &str, output: &CommandOutput) -> Result<()> {
    if output.timed_out {
        warn!(timeout_secs = request.timeout.as_secs(), "{what} timed out");
        return Err(anyhow!("{what} timed out after {:?}", request.timeout));
    }
    if !output.success() {
        warn!(exit_code = ?output.exit_code(), "{what} failed");
        return Err(anyhow!(
            "{what} failed with status {:?}: {}",
            output.exit_code(),
            output.stderr_tail(400)
        ));
    }
    debug!("{what} completed successfully");
    Ok(())
}

/// Execute the agent, validate its output against the request schema and parse it as `T`.
#[instrument(skip_all, fields(agent = request.label))]
pub async fn execute_and_load_json<T: DeserializeOwned>(
    executor: &dyn Executor,
    request: &ExecRequest,
) -> Result<T> {
    let raw = executor.exec(request).await?;
    parse_validated(request.label, request.output_schema, &raw)
}

/// Parse `raw` as JSON, check it against `schema`, then deserialize.
pub fn parse_validated<T: DeserializeOwned>(label: &str, schema: &str, raw: &str) -> Result<T> {
    let value: Value =
        serde_json::from_str(raw.trim()).with_context(|| format!("parse {label} output"))?;
    let schema_value: Value =
        serde_json::from_str(schema).with_context(|| format!("parse {label} schema"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {label} schema: {err}"))?;
    if !compiled.is_valid(&value) {
        let messages = compiled
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{label} output schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value).with_context(|| format!("deserialize {label} output"))
}
