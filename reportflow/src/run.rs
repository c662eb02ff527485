//! Orchestration for `reportflow run`: load inputs, bind workers, drive the
//! pipeline, and persist the run log and the final report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::context::Seed;
use crate::core::router::RoutingTable;
use crate::core::stage::{Role, Stage};
use crate::io::artifact::write_report;
use crate::io::brief::BriefRenderer;
use crate::io::command_worker::CommandWorker;
use crate::io::config::{PipelineConfig, load_config};
use crate::io::dataset::load_dataset;
use crate::io::run_log::{RunLog, RunStatus, RunSummary, new_run_id, timestamp};
use crate::orchestrator::{Orchestrator, RunFailure};
use crate::workers::WorkerRegistry;

/// Inputs for one `reportflow run`.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Working directory; relative paths in the config resolve against it.
    pub root: PathBuf,
    pub question: String,
    pub data_path: PathBuf,
    pub config_path: PathBuf,
    /// Overrides `artifact_path` from the config.
    pub out_path: Option<PathBuf>,
}

/// Result of a run that got as far as invoking the orchestrator.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub log_dir: PathBuf,
    pub rounds: u32,
    /// Path of the written report, or why the pipeline stopped.
    pub result: Result<PathBuf, RunFailure>,
    /// Run log files that could not be written. They never change `result`.
    pub log_warnings: Vec<String>,
}

/// Accept either literal question text or `@path` to read it from a file.
pub fn resolve_question(root: &Path, arg: &str) -> Result<String> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            let path = root.join(path);
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
        }
        None => arg.to_string(),
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        anyhow::bail!("question text is empty");
    }
    Ok(text)
}

/// Run the pipeline with command workers from the config.
pub fn run_report(request: &RunRequest) -> Result<RunReport> {
    let cfg = load_config(&request.root.join(&request.config_path))?;
    let log = RunLog::create(&request.root.join(&cfg.log_dir), &new_run_id())?;
    let registry = command_registry(&cfg, &request.root, &log)?;
    execute(request, &cfg, registry, &log)
}

/// Bind every role to its configured command.
pub fn command_registry(cfg: &PipelineConfig, root: &Path, log: &RunLog) -> Result<WorkerRegistry> {
    let briefs = Arc::new(BriefRenderer::new()?);
    let mut registry = WorkerRegistry::new();
    for role in Role::ALL {
        let worker = CommandWorker::new(
            role,
            cfg.worker_command(role)?.to_vec(),
            root,
            &log.workers_dir(),
            cfg.worker_output_limit_bytes,
            Arc::clone(&briefs),
        )?;
        registry.register(role, worker);
    }
    Ok(registry)
}

/// Drive the pipeline with `registry` and persist everything the run produced.
#[instrument(skip_all, fields(run_id = log.run_id()))]
pub fn execute(
    request: &RunRequest,
    cfg: &PipelineConfig,
    registry: WorkerRegistry,
    log: &RunLog,
) -> Result<RunReport> {
    let dataset = load_dataset(&request.root.join(&request.data_path))?;
    let seed = Seed {
        question_text: request.question.clone(),
        dataset,
        max_iterations: cfg.max_iterations,
    };
    let orchestrator = Orchestrator::new(registry, RoutingTable::standard(), cfg.limits())
        .context("configure pipeline")?;

    let mut log_warnings = Vec::new();
    let result = orchestrator.run_observed(&seed, |record| {
        if let Err(err) = log.write_round(record) {
            warn!(round = record.round, err = %err, "failed to write round log");
            log_warnings.push(format!("round {}: {err:#}", record.round));
        }
    });

    let (rounds, result, summary) = match result {
        Ok(outcome) => {
            if let Err(err) = log.write_journal(&outcome.journal) {
                warn!(err = %err, "failed to write journal");
                log_warnings.push(format!("journal: {err:#}"));
            }
            let artifact = request
                .out_path
                .clone()
                .unwrap_or_else(|| cfg.artifact_path.clone());
            let artifact = request.root.join(artifact);
            write_report(&artifact, &outcome.final_report)?;
            info!(rounds = outcome.rounds, artifact = %artifact.display(), "report complete");
            let summary = RunSummary {
                run_id: log.run_id().to_string(),
                status: RunStatus::Completed,
                rounds: outcome.rounds,
                final_stage: Stage::Done,
                failure_kind: None,
                message: None,
                artifact_path: Some(artifact.clone()),
                finished_at: timestamp(),
            };
            (outcome.rounds, Ok(artifact), summary)
        }
        Err(failure) => {
            let summary = RunSummary {
                run_id: log.run_id().to_string(),
                status: RunStatus::Failed,
                rounds: failure.rounds,
                final_stage: failure.stage,
                failure_kind: Some(failure.kind()),
                message: Some(failure.to_string()),
                artifact_path: None,
                finished_at: timestamp(),
            };
            (failure.rounds, Err(failure), summary)
        }
    };

    if let Err(err) = log.write_summary(&summary) {
        warn!(err = %err, "failed to write run summary");
        log_warnings.push(format!("summary: {err:#}"));
    }

    Ok(RunReport {
        run_id: log.run_id().to_string(),
        log_dir: log.dir().to_path_buf(),
        rounds,
        result,
        log_warnings,
    })
}
