//! Stage-specific submissions and their schema validation.
//!
//! Workers hand back a [`Submission`]: the stage it answers plus a JSON
//! payload. Payloads are checked against the stage's JSON Schema before the
//! store ever sees them, so a malformed result from an external worker is
//! rejected the same way as a malformed in-process one.

use std::collections::BTreeMap;

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::stage::Stage;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const DRAFT_SCHEMA: &str = include_str!("../../schemas/draft.schema.json");
const FEEDBACK_SCHEMA: &str = include_str!("../../schemas/feedback.schema.json");
const REVISION_SCHEMA: &str = include_str!("../../schemas/revision.schema.json");
const FINAL_SCHEMA: &str = include_str!("../../schemas/final.schema.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub analysis_plan: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub section: String,
    pub feedback: String,
    pub severity: Severity,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Reviewer output. `iteration_needed` drives the review/revise loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCollection {
    pub items: Vec<FeedbackItem>,
    pub overall_assessment: String,
    pub priority_issues: Vec<String>,
    pub iteration_needed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisedReport {
    pub content: String,
    #[serde(default)]
    pub changes_made: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub content: String,
}

/// A worker's result for one stage, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub stage: Stage,
    pub payload: Value,
}

impl Submission {
    /// Wrap a raw payload (e.g. parsed from an external worker's output).
    pub fn new(stage: Stage, payload: Value) -> Self {
        Self { stage, payload }
    }

    pub fn plan(analysis_plan: impl Into<String>) -> Self {
        Self::typed(
            Stage::Planning,
            &AnalysisPlan {
                analysis_plan: analysis_plan.into(),
            },
        )
    }

    pub fn draft(content: impl Into<String>) -> Self {
        Self::typed(
            Stage::Drafting,
            &ReportDraft {
                content: content.into(),
            },
        )
    }

    pub fn feedback(collection: &FeedbackCollection) -> Self {
        Self::typed(Stage::Reviewing, collection)
    }

    pub fn revision(report: &RevisedReport) -> Self {
        Self::typed(Stage::Revising, report)
    }

    pub fn final_report(content: impl Into<String>) -> Self {
        Self::typed(
            Stage::Finalizing,
            &FinalReport {
                content: content.into(),
            },
        )
    }

    fn typed<T: Serialize>(stage: Stage, payload: &T) -> Self {
        // Payload types hold only strings, bools and sequences; serialization cannot fail.
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self { stage, payload }
    }

    /// Decode the payload into its typed form.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// One rejected field of a submission. `field` is `$` for object-level problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

struct StageSchema {
    whole: Validator,
    properties: Vec<(String, Validator)>,
}

impl StageSchema {
    fn compile(raw: &str) -> Result<Self, String> {
        let schema: Value =
            serde_json::from_str(raw).map_err(|err| format!("parse schema: {err}"))?;
        let whole =
            jsonschema::validator_for(&schema).map_err(|err| format!("invalid schema: {err}"))?;

        let mut properties = Vec::new();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, sub) in props {
                let validator = jsonschema::validator_for(sub)
                    .map_err(|err| format!("invalid schema for '{name}': {err}"))?;
                properties.push((name.clone(), validator));
            }
        }
        Ok(Self { whole, properties })
    }

    fn check(&self, payload: &Value) -> Vec<FieldError> {
        if self.whole.is_valid(payload) {
            return Vec::new();
        }
        let mut errors = Vec::new();
        for (name, validator) in &self.properties {
            if let Some(value) = payload.get(name) {
                errors.extend(
                    validator
                        .iter_errors(value)
                        .map(|err| FieldError::new(name.as_str(), err.to_string())),
                );
            }
        }
        if errors.is_empty() {
            errors.extend(
                self.whole
                    .iter_errors(payload)
                    .map(|err| FieldError::new("$", err.to_string())),
            );
        }
        errors
    }
}

/// Compiled payload schemas for every working stage.
pub struct SubmissionSchemas {
    by_stage: BTreeMap<Stage, StageSchema>,
}

impl SubmissionSchemas {
    /// Compile the embedded schemas.
    pub fn compile() -> Result<Self, String> {
        let mut by_stage = BTreeMap::new();
        for (stage, raw) in [
            (Stage::Planning, PLAN_SCHEMA),
            (Stage::Drafting, DRAFT_SCHEMA),
            (Stage::Reviewing, FEEDBACK_SCHEMA),
            (Stage::Revising, REVISION_SCHEMA),
            (Stage::Finalizing, FINAL_SCHEMA),
        ] {
            let compiled = StageSchema::compile(raw).map_err(|err| format!("{stage}: {err}"))?;
            by_stage.insert(stage, compiled);
        }
        Ok(Self { by_stage })
    }

    /// Raw schema text for a stage (exposed to external workers).
    pub fn raw(stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::Planning => Some(PLAN_SCHEMA),
            Stage::Drafting => Some(DRAFT_SCHEMA),
            Stage::Reviewing => Some(FEEDBACK_SCHEMA),
            Stage::Revising => Some(REVISION_SCHEMA),
            Stage::Finalizing => Some(FINAL_SCHEMA),
            Stage::Done => None,
        }
    }

    /// Check that `submission` answers `expected` and matches that stage's schema.
    ///
    /// Returns every rejected field; an empty `Ok` means the payload may be applied.
    pub fn validate(&self, expected: Stage, submission: &Submission) -> Result<(), Vec<FieldError>> {
        if submission.stage != expected {
            return Err(vec![FieldError::new(
                "stage",
                format!(
                    "submission answers '{}' but pipeline is in '{}'",
                    submission.stage, expected
                ),
            )]);
        }
        let schema = self.by_stage.get(&expected).ok_or_else(|| {
            vec![FieldError::new(
                "stage",
                format!("stage '{expected}' accepts no submissions"),
            )]
        })?;
        let errors = schema.check(&submission.payload);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
