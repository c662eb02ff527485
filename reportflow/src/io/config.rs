//! Pipeline configuration stored in `reportflow.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::stage::Role;
use crate::orchestrator::{
    DEFAULT_WORKER_RETRIES, DEFAULT_WORKER_TIMEOUT, ROUNDS_PER_ITERATION, RunLimits,
};

pub const DEFAULT_CONFIG_FILE: &str = "reportflow.toml";

/// Pipeline configuration (TOML).
///
/// Edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Review/revise cycles allowed before the report is finalized.
    pub max_iterations: u32,

    /// Total worker invocations (retries included). Defaults to
    /// `30 * max_iterations` when unset.
    pub round_budget: Option<u32>,

    /// Extra attempts after a worker's first failure at a stage.
    pub worker_retries: u32,

    /// Wall-clock budget for one worker invocation.
    pub worker_timeout_secs: u64,

    /// Truncate worker stdout/stderr logs beyond this many bytes.
    pub worker_output_limit_bytes: usize,

    /// Where the final report is written, relative to the working directory.
    pub artifact_path: PathBuf,

    /// Root of the per-run audit logs.
    pub log_dir: PathBuf,

    /// External command bound to each role.
    pub workers: BTreeMap<Role, WorkerCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WorkerCommand {
    /// Program and arguments, e.g. `["python3", "agents/planner.py"]`.
    pub command: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            round_budget: None,
            worker_retries: DEFAULT_WORKER_RETRIES,
            worker_timeout_secs: DEFAULT_WORKER_TIMEOUT.as_secs(),
            worker_output_limit_bytes: 100_000,
            artifact_path: PathBuf::from("final_report").join("final_question_report.md"),
            log_dir: PathBuf::from(".reportflow").join("runs"),
            workers: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be >= 1"));
        }
        if self.round_budget == Some(0) {
            return Err(anyhow!("round_budget must be >= 1"));
        }
        if self.worker_timeout_secs == 0 {
            return Err(anyhow!("worker_timeout_secs must be > 0"));
        }
        if self.worker_output_limit_bytes == 0 {
            return Err(anyhow!("worker_output_limit_bytes must be > 0"));
        }
        if self.artifact_path.as_os_str().is_empty() {
            return Err(anyhow!("artifact_path must not be empty"));
        }
        for (role, worker) in &self.workers {
            if worker.command.is_empty() || worker.command[0].trim().is_empty() {
                return Err(anyhow!("workers.{role}.command must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn round_budget(&self) -> u32 {
        self.round_budget
            .unwrap_or_else(|| ROUNDS_PER_ITERATION.saturating_mul(self.max_iterations))
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            round_budget: self.round_budget(),
            worker_retries: self.worker_retries,
            worker_timeout: Duration::from_secs(self.worker_timeout_secs),
        }
    }

    /// Command bound to `role`, or an error naming the missing table.
    pub fn worker_command(&self, role: Role) -> Result<&[String]> {
        self.workers
            .get(&role)
            .map(|worker| worker.command.as_slice())
            .ok_or_else(|| anyhow!("no command configured for role '{role}' (add [workers.{role}])"))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::artifact::write_atomic(path, &buf)
}
