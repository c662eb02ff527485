//! Per-run audit logs under `<log_dir>/<run_id>/`.
//!
//! Each worker invocation gets a numbered directory:
//!
//! ```text
//! <run_id>/
//!   1/meta.json
//!   1/context.before.json
//!   1/submission.json        (when the worker returned one)
//!   1/context.after.json     (when the submission was applied)
//!   journal.json             (written once the run ends)
//!   summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::core::error::FailureKind;
use crate::core::stage::{Role, Stage};
use crate::core::store::JournalEntry;
use crate::orchestrator::{RoundOutcome, RoundRecord};

/// Sortable run id from the current UTC time, e.g. `20260314T091502Z-3f2a`.
pub fn new_run_id() -> String {
    let now = Utc::now();
    format!(
        "{}-{:04x}",
        now.format("%Y%m%dT%H%M%SZ"),
        now.timestamp_subsec_micros() & 0xffff
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundMeta<'a> {
    pub run_id: &'a str,
    pub round: u32,
    pub stage: Stage,
    pub role: Role,
    pub iteration: u32,
    pub attempt: u32,
    pub duration_ms: u64,
    pub recorded_at: String,
    pub context_version_before: u64,
    pub context_version_after: Option<u64>,
    pub outcome: &'a RoundOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub rounds: u32,
    pub final_stage: Stage,
    pub failure_kind: Option<FailureKind>,
    pub message: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub finished_at: String,
}

#[derive(Debug, Clone)]
pub struct RoundPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub before_path: PathBuf,
    pub submission_path: PathBuf,
    pub after_path: PathBuf,
}

/// Writer for one run's log directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
}

impl RunLog {
    pub fn create(log_root: &Path, run_id: &str) -> Result<Self> {
        let dir = log_root.join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run log dir {}", dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scratch space for command workers.
    pub fn workers_dir(&self) -> PathBuf {
        self.dir.join("workers")
    }

    pub fn round_paths(&self, round: u32) -> RoundPaths {
        let dir = self.dir.join(round.to_string());
        RoundPaths {
            meta_path: dir.join("meta.json"),
            before_path: dir.join("context.before.json"),
            submission_path: dir.join("submission.json"),
            after_path: dir.join("context.after.json"),
            dir,
        }
    }

    pub fn write_round(&self, record: &RoundRecord) -> Result<RoundPaths> {
        let paths = self.round_paths(record.round);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create round dir {}", paths.dir.display()))?;

        let meta = RoundMeta {
            run_id: &self.run_id,
            round: record.round,
            stage: record.stage,
            role: record.role,
            iteration: record.iteration,
            attempt: record.attempt,
            duration_ms: u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX),
            recorded_at: timestamp(),
            context_version_before: record.before.version(),
            context_version_after: record.after.as_ref().map(|after| after.version()),
            outcome: &record.outcome,
        };

        // Deterministic write order keeps partially written rounds easy to read.
        write_json(&paths.meta_path, &meta)?;
        write_json(&paths.before_path, &record.before)?;
        if let Some(submission) = &record.submission {
            write_json(&paths.submission_path, submission)?;
        }
        if let Some(after) = &record.after {
            write_json(&paths.after_path, after)?;
        }
        Ok(paths)
    }

    pub fn write_journal(&self, journal: &[JournalEntry]) -> Result<PathBuf> {
        let path = self.dir.join("journal.json");
        write_json(&path, &journal)?;
        Ok(path)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.dir.join("summary.json");
        write_json(&path, summary)?;
        Ok(path)
    }
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
