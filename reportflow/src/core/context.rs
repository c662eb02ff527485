//! Immutable context snapshots threaded through every stage transition.
//!
//! A [`Snapshot`] is never mutated in place: [`Snapshot::apply`] returns the
//! next snapshot, which makes every transition a pure function of
//! `(snapshot, update)`. Fields live in a `BTreeMap` so serialized snapshots
//! are byte-stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::stage::Stage;

/// Well-known context keys.
pub mod keys {
    pub const LOOP_STARTED: &str = "loop_started";
    pub const CURRENT_STAGE: &str = "current_stage";
    pub const CURRENT_ITERATION: &str = "current_iteration";
    pub const MAX_ITERATIONS: &str = "max_iterations";
    pub const ITERATION_NEEDED: &str = "iteration_needed";
    pub const QUESTION_TEXT: &str = "question_text";
    pub const CSV_HEADERS: &str = "csv_headers";
    pub const CSV_ROWS: &str = "csv_rows";
    pub const CSV_ROWS_TOTAL: &str = "csv_rows_total";
    pub const CSV_TEXT: &str = "csv_text";
    pub const ANALYSIS_PLAN: &str = "analysis_plan";
    pub const REPORT_DRAFT: &str = "report_draft";
    pub const FEEDBACK_COLLECTION: &str = "feedback_collection";
    pub const FEEDBACK_HISTORY: &str = "feedback_history";
    pub const REVISED_REPORT: &str = "revised_report";
    pub const FINAL_REPORT: &str = "final_report";
}

/// Failure to read a field from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("missing context key `{key}`")]
    MissingKey { key: String },
    #[error("context key `{key}` is not a {expected}")]
    WrongType { key: String, expected: &'static str },
}

impl ContextError {
    pub fn key(&self) -> &str {
        match self {
            ContextError::MissingKey { key } | ContextError::WrongType { key, .. } => key,
        }
    }
}

/// Read-only view of the pipeline context at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u64,
    fields: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Create a version-0 snapshot from initial fields.
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { version: 0, fields }
    }

    /// Number of updates applied since the seed snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Result<&Value, ContextError> {
        self.fields.get(key).ok_or_else(|| ContextError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ContextError> {
        self.get(key)?.as_str().ok_or_else(|| wrong_type(key, "string"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ContextError> {
        self.get(key)?.as_bool().ok_or_else(|| wrong_type(key, "boolean"))
    }

    pub fn get_u32(&self, key: &str) -> Result<u32, ContextError> {
        self.get(key)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| wrong_type(key, "non-negative integer"))
    }

    /// The stage recorded under `current_stage`.
    pub fn stage(&self) -> Result<Stage, ContextError> {
        self.get_str(keys::CURRENT_STAGE)?
            .parse()
            .map_err(|_| wrong_type(keys::CURRENT_STAGE, "stage name"))
    }

    /// Produce the next snapshot with every field of `update` written.
    pub fn apply(&self, update: &ContextUpdate) -> Snapshot {
        let mut fields = self.fields.clone();
        for (key, value) in &update.fields {
            fields.insert(key.clone(), value.clone());
        }
        Snapshot {
            version: self.version + 1,
            fields,
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> ContextError {
    ContextError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// The set of fields one submission writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    fields: BTreeMap<String, Value>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Tabular input made available to every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub headers: Vec<String>,
    /// One record per row, keyed by header.
    pub rows: Vec<BTreeMap<String, String>>,
    /// Raw source text, empty when the dataset was not loaded from text.
    pub raw_text: String,
}

/// Initial payload for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub question_text: String,
    pub dataset: Dataset,
    pub max_iterations: u32,
}

impl Seed {
    /// Build the version-0 snapshot: task payload, dataset, and default control flags.
    pub fn snapshot(&self) -> Snapshot {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: Value| {
            fields.insert(key.to_string(), value);
        };

        put(keys::LOOP_STARTED, json!(true));
        put(keys::CURRENT_STAGE, json!(Stage::Planning.as_str()));
        put(keys::CURRENT_ITERATION, json!(1));
        put(keys::MAX_ITERATIONS, json!(self.max_iterations));
        put(keys::ITERATION_NEEDED, json!(true));

        put(keys::QUESTION_TEXT, json!(self.question_text));
        put(keys::CSV_HEADERS, json!(self.dataset.headers));
        put(keys::CSV_ROWS, json!(self.dataset.rows));
        put(keys::CSV_ROWS_TOTAL, json!(self.dataset.rows.len()));
        put(keys::CSV_TEXT, json!(self.dataset.raw_text));

        put(keys::ANALYSIS_PLAN, json!(""));
        put(keys::REPORT_DRAFT, json!(""));
        put(keys::FEEDBACK_COLLECTION, json!({}));
        put(keys::FEEDBACK_HISTORY, json!([]));
        put(keys::REVISED_REPORT, json!({}));
        put(keys::FINAL_REPORT, json!(""));

        Snapshot::new(fields)
    }
}
