//! Test-only helpers: seeds, payload fixtures and scripted workers.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};

use crate::core::context::{Dataset, Seed, Snapshot};
use crate::core::stage::Role;
use crate::core::submission::{FeedbackCollection, FeedbackItem, RevisedReport, Severity, Submission};
use crate::workers::{WorkRequest, Worker, WorkerRegistry};

/// Small deterministic dataset with two rows.
pub fn dataset() -> Dataset {
    let headers = vec!["id".to_string(), "answer".to_string()];
    let rows = [("1", "More parking"), ("2", "Longer opening hours")]
        .into_iter()
        .map(|(id, answer)| {
            BTreeMap::from([
                ("id".to_string(), id.to_string()),
                ("answer".to_string(), answer.to_string()),
            ])
        })
        .collect();
    Dataset {
        headers,
        rows,
        raw_text: "id,answer\n1,More parking\n2,Longer opening hours\n".to_string(),
    }
}

pub fn seed(max_iterations: u32) -> Seed {
    Seed {
        question_text: "What should the library change?".to_string(),
        dataset: dataset(),
        max_iterations,
    }
}

/// Version-0 snapshot for [`seed`].
pub fn seed_snapshot(max_iterations: u32) -> Snapshot {
    seed(max_iterations).snapshot()
}

pub fn feedback(iteration_needed: bool) -> FeedbackCollection {
    FeedbackCollection {
        items: vec![FeedbackItem {
            section: "Findings".to_string(),
            feedback: "Counts lack totals".to_string(),
            severity: Severity::Moderate,
            recommendation: Some("Report n/total".to_string()),
        }],
        overall_assessment: "Readable, needs numbers".to_string(),
        priority_issues: vec!["totals".to_string()],
        iteration_needed,
    }
}

pub fn revision(content: &str) -> RevisedReport {
    RevisedReport {
        content: content.to_string(),
        changes_made: Some(vec!["added totals".to_string()]),
    }
}

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Submit(Submission),
    Fail(String),
}

/// What a scripted worker was asked to do.
#[derive(Debug, Clone)]
pub struct Call {
    pub role: Role,
    pub iteration: u32,
    pub attempt: u32,
    pub snapshot: Snapshot,
}

/// Shared record of every scripted invocation, across all workers of a registry.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn total(&self) -> usize {
        self.lock().len()
    }

    pub fn count(&self, role: Role) -> usize {
        self.lock().iter().filter(|call| call.role == role).count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.lock().iter().map(|call| call.role).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        lock(&self.calls)
    }

    fn record(&self, request: &WorkRequest) {
        self.lock().push(Call {
            role: request.role,
            iteration: request.iteration,
            attempt: request.attempt,
            snapshot: request.snapshot.clone(),
        });
    }
}

/// Worker that replays a queue of steps. The last step repeats once the queue drains.
#[derive(Debug)]
pub struct ScriptedWorker {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    log: CallLog,
}

impl ScriptedWorker {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            log: CallLog::default(),
        }
    }

    pub fn submitting(submissions: Vec<Submission>) -> Self {
        Self::new(submissions.into_iter().map(Step::Submit).collect())
    }

    pub fn plans() -> Self {
        Self::submitting(vec![Submission::plan("1. tally answers\n2. group themes")])
    }

    pub fn drafts() -> Self {
        Self::submitting(vec![Submission::draft("# Draft\nParking dominates.")])
    }

    /// Reviewer answering `iteration_needed` from `needed`, in order.
    pub fn reviews(needed: &[bool]) -> Self {
        Self::submitting(
            needed
                .iter()
                .map(|needed| Submission::feedback(&feedback(*needed)))
                .collect(),
        )
    }

    pub fn revises() -> Self {
        Self::submitting(
            (1..=8)
                .map(|n| Submission::revision(&revision(&format!("# Draft v{}", n + 1))))
                .collect(),
        )
    }

    pub fn finalizes() -> Self {
        Self::submitting(vec![Submission::final_report(
            "# Final report\n# End of Report",
        )])
    }

    /// Share `log` with other workers so one log sees the whole run.
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }
}

impl Worker for ScriptedWorker {
    fn invoke(&self, request: &WorkRequest) -> Result<Submission> {
        self.log.record(request);
        let next = lock(&self.steps).pop_front();
        let step = match next {
            Some(step) => {
                *lock(&self.last) = Some(step.clone());
                step
            }
            None => lock(&self.last)
                .clone()
                .ok_or_else(|| anyhow!("scripted worker has no steps"))?,
        };
        match step {
            Step::Submit(submission) => Ok(submission),
            Step::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// A panicking test worker must not hide the calls recorded before it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry with well-behaved scripted workers for every role.
///
/// The reviewer answers `review_needed` in order. All workers share one [`CallLog`].
pub fn standard_registry(review_needed: &[bool]) -> (WorkerRegistry, CallLog) {
    let log = CallLog::default();
    let registry = WorkerRegistry::new()
        .with(Role::Planner, ScriptedWorker::plans().with_log(&log))
        .with(Role::Drafter, ScriptedWorker::drafts().with_log(&log))
        .with(
            Role::Reviewer,
            ScriptedWorker::reviews(review_needed).with_log(&log),
        )
        .with(Role::Reviser, ScriptedWorker::revises().with_log(&log))
        .with(Role::Finalizer, ScriptedWorker::finalizes().with_log(&log));
    (registry, log)
}

/// Temporary working directory with a dataset and config on disk.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` under the workspace and return its path.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_dataset(&self) -> Result<PathBuf> {
        self.write("data/responses.csv", &dataset().raw_text)
    }
}
