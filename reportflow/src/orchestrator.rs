//! The driver loop: resolve a worker, invoke it, validate, apply, route.
//!
//! The orchestrator is the only writer of the [`ContextStore`]. Workers see an
//! owned snapshot and hand back a submission; nothing they do reaches the
//! store until it has passed schema validation and the stage machine.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::context::{Seed, Snapshot, keys};
use crate::core::error::{FailureKind, PipelineError};
use crate::core::iteration::IterationController;
use crate::core::router::{Destination, RoutingTable};
use crate::core::stage::{Role, Stage};
use crate::core::store::{ContextStore, JournalEntry};
use crate::core::submission::{Submission, SubmissionSchemas};
use crate::workers::{WorkRequest, Worker, WorkerRegistry};

/// Rounds allowed per configured review/revise iteration when no explicit budget is set.
pub const ROUNDS_PER_ITERATION: u32 = 30;
pub const DEFAULT_WORKER_RETRIES: u32 = 2;
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(1800);

/// Bounds for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Total worker invocations allowed, retries included.
    pub round_budget: u32,
    /// Extra attempts after a worker's first failure at a stage.
    pub worker_retries: u32,
    pub worker_timeout: Duration,
}

impl RunLimits {
    pub fn for_iterations(max_iterations: u32) -> Self {
        Self {
            round_budget: ROUNDS_PER_ITERATION.saturating_mul(max_iterations.max(1)),
            worker_retries: DEFAULT_WORKER_RETRIES,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

/// What happened in one worker invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// The submission was applied; `next` is the routed destination.
    Applied { next: Destination },
    /// The worker errored or overran its budget.
    WorkerFailed { message: String, retrying: bool },
    /// The run stopped on this round.
    Rejected { kind: FailureKind, message: String },
}

/// Observation of one round, passed to the run observer.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// 1-based count of worker invocations so far.
    pub round: u32,
    pub stage: Stage,
    pub role: Role,
    pub iteration: u32,
    pub attempt: u32,
    pub elapsed: Duration,
    pub before: Snapshot,
    pub submission: Option<Submission>,
    pub after: Option<Snapshot>,
    pub outcome: RoundOutcome,
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_report: String,
    pub snapshot: Snapshot,
    pub rounds: u32,
    pub journal: Vec<JournalEntry>,
}

/// A run that stopped before `done`. Carries the last good snapshot.
#[derive(Debug, Clone, thiserror::Error)]
#[error("pipeline did not complete: {} at stage `{stage}` after {rounds} round(s): {error}", .error.kind())]
pub struct RunFailure {
    pub error: PipelineError,
    pub stage: Stage,
    pub rounds: u32,
    pub last_snapshot: Snapshot,
}

impl RunFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

pub struct Orchestrator {
    registry: WorkerRegistry,
    routes: RoutingTable,
    schemas: SubmissionSchemas,
    limits: RunLimits,
}

impl Orchestrator {
    /// Check the wiring before any worker runs.
    pub fn new(
        registry: WorkerRegistry,
        routes: RoutingTable,
        limits: RunLimits,
    ) -> Result<Self, PipelineError> {
        let missing = registry.missing_roles();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|role| role.as_str()).collect();
            return Err(PipelineError::Config(format!(
                "no worker bound for role(s): {}",
                names.join(", ")
            )));
        }
        routes.validate().map_err(PipelineError::Config)?;
        if limits.round_budget == 0 {
            return Err(PipelineError::Config(
                "round_budget must be >= 1".to_string(),
            ));
        }
        if limits.worker_timeout.is_zero() {
            return Err(PipelineError::Config(
                "worker_timeout must be > 0".to_string(),
            ));
        }
        let schemas = SubmissionSchemas::compile().map_err(PipelineError::Config)?;
        Ok(Self {
            registry,
            routes,
            schemas,
            limits,
        })
    }

    pub fn run(&self, seed: &Seed) -> Result<RunOutcome, RunFailure> {
        self.run_observed(seed, |_| {})
    }

    /// Drive the pipeline to `done`, reporting every round to `on_round`.
    #[instrument(skip_all, fields(max_iterations = seed.max_iterations, round_budget = self.limits.round_budget))]
    pub fn run_observed(
        &self,
        seed: &Seed,
        mut on_round: impl FnMut(&RoundRecord),
    ) -> Result<RunOutcome, RunFailure> {
        let mut store = ContextStore::new(seed.snapshot());
        let mut rounds = 0u32;
        let mut stage = Stage::Planning;

        let fail = |error: PipelineError, stage: Stage, rounds: u32, store: &ContextStore| {
            warn!(kind = %error.kind(), %stage, rounds, %error, "run failed");
            RunFailure {
                error,
                stage,
                rounds,
                last_snapshot: store.snapshot(),
            }
        };

        if let Err(err) = IterationController::from_snapshot(store.current()) {
            return Err(fail(
                PipelineError::Config(format!("invalid iteration settings: {err}")),
                stage,
                rounds,
                &store,
            ));
        }
        info!("run started");

        while !stage.is_terminal() {
            let Some(role) = stage.role() else { break };
            let Some(worker) = self.registry.resolve(role) else {
                let error = PipelineError::Config(format!("no worker bound for role '{role}'"));
                return Err(fail(error, stage, rounds, &store));
            };
            let iteration = match store.current().get_u32(keys::CURRENT_ITERATION) {
                Ok(iteration) => iteration,
                Err(err) => {
                    let error = PipelineError::from_context(stage, err);
                    return Err(fail(error, stage, rounds, &store));
                }
            };

            let mut attempt = 0u32;
            let (submission, before, elapsed) = loop {
                if rounds >= self.limits.round_budget {
                    let error = PipelineError::RoundBudgetExhausted {
                        budget: self.limits.round_budget,
                    };
                    return Err(fail(error, stage, rounds, &store));
                }
                attempt += 1;
                rounds += 1;

                let before = store.snapshot();
                let request = WorkRequest {
                    role,
                    stage,
                    snapshot: before.clone(),
                    round: rounds,
                    iteration,
                    attempt,
                    timeout: self.limits.worker_timeout,
                };
                debug!(%role, %stage, attempt, round = rounds, "invoking worker");
                let started = Instant::now();
                let result = invoke_bounded(Arc::clone(&worker), request);
                let elapsed = started.elapsed();

                match result {
                    Ok(submission) => break (submission, before, elapsed),
                    Err(err) => {
                        let message = format!("{err:#}");
                        let retrying = attempt <= self.limits.worker_retries;
                        on_round(&RoundRecord {
                            round: rounds,
                            stage,
                            role,
                            iteration,
                            attempt,
                            elapsed,
                            before,
                            submission: None,
                            after: None,
                            outcome: RoundOutcome::WorkerFailed {
                                message: message.clone(),
                                retrying,
                            },
                        });
                        if !retrying {
                            let error = PipelineError::Worker {
                                stage,
                                role,
                                attempts: attempt,
                                message,
                            };
                            return Err(fail(error, stage, rounds, &store));
                        }
                        warn!(%role, %stage, attempt, err = %message, "worker failed, retrying");
                    }
                }
            };

            let mut record = RoundRecord {
                round: rounds,
                stage,
                role,
                iteration,
                attempt,
                elapsed,
                before,
                submission: Some(submission.clone()),
                after: None,
                outcome: RoundOutcome::Applied {
                    next: Destination::Stop,
                },
            };

            let applied = match store.apply(&self.schemas, submission) {
                Ok(applied) => applied,
                Err(err) => {
                    let error = PipelineError::from_apply(stage, err);
                    record.outcome = rejected(&error);
                    on_round(&record);
                    return Err(fail(error, stage, rounds, &store));
                }
            };
            debug!(
                from = %applied.from,
                to = %applied.to,
                version = store.current().version(),
                "submission applied"
            );
            record.after = Some(store.snapshot());

            let decision = match self.routes.route(stage, store.current()) {
                Ok(decision) => decision,
                Err(err) => {
                    let error = PipelineError::from_route(err);
                    record.outcome = rejected(&error);
                    on_round(&record);
                    return Err(fail(error, applied.to, rounds, &store));
                }
            };
            record.outcome = RoundOutcome::Applied {
                next: decision.destination,
            };
            on_round(&record);

            let next = decision.destination.stage();
            if next != applied.to {
                info!(from = %applied.to, to = %next, rule = decision.rule_index, "routing overrides stage");
                if let Err(err) = store.handoff(next) {
                    let error = PipelineError::from_apply(applied.to, err);
                    return Err(fail(error, applied.to, rounds, &store));
                }
            }
            info!(from = %stage, to = %next, iteration, round = rounds, "stage transition");
            stage = next;
        }

        let final_report = match store.current().get_str(keys::FINAL_REPORT) {
            Ok(report) if !report.trim().is_empty() => report.to_string(),
            Ok(_) => {
                let error = PipelineError::Config(
                    "routing stopped the run before a final report was produced".to_string(),
                );
                return Err(fail(error, stage, rounds, &store));
            }
            Err(err) => {
                let error = PipelineError::from_context(stage, err);
                return Err(fail(error, stage, rounds, &store));
            }
        };

        info!(rounds, version = store.current().version(), "run completed");
        Ok(RunOutcome {
            final_report,
            snapshot: store.snapshot(),
            rounds,
            journal: store.journal().to_vec(),
        })
    }
}

/// Run one invocation on its own thread and stop waiting at the request's timeout.
///
/// An overrunning worker is abandoned: its thread keeps running detached and
/// whatever it returns later is dropped.
fn invoke_bounded(worker: Arc<dyn Worker>, request: WorkRequest) -> anyhow::Result<Submission> {
    let timeout = request.timeout;
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("worker-{}", request.role))
        .spawn(move || {
            // Send fails only when the deadline already passed.
            let _ = tx.send(worker.invoke(&request));
        })
        .context("spawn worker thread")?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            Err(anyhow!("worker exceeded its time budget of {timeout:?}"))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("worker panicked")),
    }
}

fn rejected(error: &PipelineError) -> RoundOutcome {
    RoundOutcome::Rejected {
        kind: error.kind(),
        message: error.to_string(),
    }
}
