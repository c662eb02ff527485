//! Worker backed by an external command.
//!
//! Protocol: the child reads one JSON request on stdin
//! (`role`, `stage`, `iteration`, `attempt`, `brief`, `schema`, `context`),
//! writes the stage payload as JSON to the path in `REPORTFLOW_OUTPUT`, and
//! exits 0. Anything else is a worker failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::stage::{Role, Stage};
use crate::core::submission::{Submission, SubmissionSchemas};
use crate::io::brief::BriefRenderer;
use crate::io::process::run_command_with_timeout;
use crate::workers::{WorkRequest, Worker};

pub const ENV_ROLE: &str = "REPORTFLOW_ROLE";
pub const ENV_STAGE: &str = "REPORTFLOW_STAGE";
pub const ENV_OUTPUT: &str = "REPORTFLOW_OUTPUT";
pub const ENV_ITERATION: &str = "REPORTFLOW_ITERATION";
pub const ENV_ATTEMPT: &str = "REPORTFLOW_ATTEMPT";

/// Request document written to the child's stdin.
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    role: Role,
    stage: Stage,
    iteration: u32,
    attempt: u32,
    brief: &'a str,
    schema: Value,
    context: &'a std::collections::BTreeMap<String, Value>,
}

pub struct CommandWorker {
    role: Role,
    command: Vec<String>,
    workdir: PathBuf,
    scratch_dir: PathBuf,
    output_limit_bytes: usize,
    briefs: Arc<BriefRenderer>,
}

impl CommandWorker {
    /// `scratch_dir` receives one subdirectory per invocation, named after the
    /// round, with the brief, the child's output file and its stdout/stderr log.
    pub fn new(
        role: Role,
        command: Vec<String>,
        workdir: &Path,
        scratch_dir: &Path,
        output_limit_bytes: usize,
        briefs: Arc<BriefRenderer>,
    ) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("command for role '{role}' must be a non-empty array"));
        }
        Ok(Self {
            role,
            command,
            workdir: workdir.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
            output_limit_bytes,
            briefs,
        })
    }

    fn invocation_dir(&self, request: &WorkRequest) -> PathBuf {
        self.scratch_dir.join(format!(
            "{:03}-{}-i{}-a{}",
            request.round, self.role, request.iteration, request.attempt
        ))
    }
}

impl Worker for CommandWorker {
    #[instrument(skip_all, fields(role = %self.role, iteration = request.iteration, attempt = request.attempt))]
    fn invoke(&self, request: &WorkRequest) -> Result<Submission> {
        let dir = self.invocation_dir(request);
        fs::create_dir_all(&dir).with_context(|| format!("create worker dir {}", dir.display()))?;
        let output_path = dir.join("output.json");
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }

        let brief = self.briefs.render(self.role, &request.snapshot)?;
        let schema = match SubmissionSchemas::raw(request.stage) {
            Some(raw) => serde_json::from_str(raw).context("parse stage schema")?,
            None => Value::Null,
        };
        let stdin = serde_json::to_vec(&CommandRequest {
            role: self.role,
            stage: request.stage,
            iteration: request.iteration,
            attempt: request.attempt,
            brief: &brief,
            schema,
            context: request.snapshot.fields(),
        })
        .context("serialize worker request")?;
        fs::write(dir.join("brief.md"), &brief)
            .with_context(|| format!("write brief in {}", dir.display()))?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&self.workdir)
            .env(ENV_ROLE, self.role.as_str())
            .env(ENV_STAGE, request.stage.as_str())
            .env(ENV_OUTPUT, &output_path)
            .env(ENV_ITERATION, request.iteration.to_string())
            .env(ENV_ATTEMPT, request.attempt.to_string());

        info!(program = %self.command[0], "starting worker command");
        let output = run_command_with_timeout(
            cmd,
            Some(&stdin),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {} command", self.role))?;

        let log_path = dir.join("worker.log");
        fs::write(
            &log_path,
            output.render_log(self.role.as_str(), self.output_limit_bytes),
        )
        .with_context(|| format!("write worker log {}", log_path.display()))?;

        if output.timed_out {
            warn!(timeout = ?request.timeout, "worker command timed out");
            return Err(anyhow!(
                "{} command timed out after {:?}",
                self.role,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "worker command failed");
            let detail = output
                .stderr_tail()
                .map(|line| format!(": {line}"))
                .unwrap_or_default();
            return Err(anyhow!(
                "{} command exited with status {:?}{detail}",
                self.role,
                output.status.code()
            ));
        }
        if !output_path.exists() {
            return Err(anyhow!(
                "{} command did not write {}",
                self.role,
                output_path.display()
            ));
        }

        let contents = fs::read_to_string(&output_path)
            .with_context(|| format!("read worker output {}", output_path.display()))?;
        let payload: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse worker output {}", output_path.display()))?;
        debug!("worker command produced output");
        Ok(Submission::new(request.stage, payload))
    }
}
