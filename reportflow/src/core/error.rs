//! Fatal pipeline error kinds.

use std::fmt;

use serde::Serialize;

use crate::core::context::ContextError;
use crate::core::iteration::IterationBoundViolation;
use crate::core::router::RouteError;
use crate::core::stage::{Role, Stage};
use crate::core::store::{ApplyError, join_fields};
use crate::core::submission::FieldError;
use crate::core::transition::TransitionError;

/// Coarse classification reported to callers and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    NoRoute,
    MissingKey,
    Worker,
    IterationBoundViolation,
    RoundBudgetExhausted,
    Config,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NoRoute => "no_route",
            FailureKind::MissingKey => "missing_key",
            FailureKind::Worker => "worker",
            FailureKind::IterationBoundViolation => "iteration_bound_violation",
            FailureKind::RoundBudgetExhausted => "round_budget_exhausted",
            FailureKind::Config => "config",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a run can stop short of `done`. All are fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("submission for stage `{stage}` failed validation: {}", join_fields(.fields))]
    Validation { stage: Stage, fields: Vec<FieldError> },

    #[error("no routing rule matched after stage `{stage}`")]
    NoRoute { stage: Stage },

    #[error(
        "stage `{stage}` read missing or mistyped context key `{key}`{}: {detail}",
        rule_suffix(.rule)
    )]
    MissingKey {
        stage: Stage,
        key: String,
        /// Index of the routing rule whose condition read the key.
        rule: Option<usize>,
        detail: String,
    },

    #[error("worker `{role}` failed at stage `{stage}` after {attempts} attempt(s): {message}")]
    Worker {
        stage: Stage,
        role: Role,
        attempts: u32,
        message: String,
    },

    #[error("iteration bound violated: {0}")]
    IterationBoundViolation(IterationBoundViolation),

    #[error("round budget of {budget} worker invocations exhausted")]
    RoundBudgetExhausted { budget: u32 },

    #[error("invalid pipeline configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Validation { .. } => FailureKind::Validation,
            PipelineError::NoRoute { .. } => FailureKind::NoRoute,
            PipelineError::MissingKey { .. } => FailureKind::MissingKey,
            PipelineError::Worker { .. } => FailureKind::Worker,
            PipelineError::IterationBoundViolation(_) => FailureKind::IterationBoundViolation,
            PipelineError::RoundBudgetExhausted { .. } => FailureKind::RoundBudgetExhausted,
            PipelineError::Config(_) => FailureKind::Config,
        }
    }

    pub(crate) fn from_context(stage: Stage, err: ContextError) -> Self {
        PipelineError::MissingKey {
            stage,
            key: err.key().to_string(),
            rule: None,
            detail: err.to_string(),
        }
    }

    pub(crate) fn from_apply(stage: Stage, err: ApplyError) -> Self {
        match err {
            ApplyError::Invalid { stage, fields } => PipelineError::Validation { stage, fields },
            ApplyError::Transition(TransitionError::Context(err)) => Self::from_context(stage, err),
            ApplyError::Transition(TransitionError::Bound(bound)) => {
                PipelineError::IterationBoundViolation(bound)
            }
            ApplyError::Transition(TransitionError::Payload { stage, message }) => {
                PipelineError::Validation {
                    stage,
                    fields: vec![FieldError::new("$", message)],
                }
            }
            ApplyError::Transition(TransitionError::Terminal(stage)) => {
                PipelineError::Config(format!("stage '{stage}' has no worker"))
            }
        }
    }

    pub(crate) fn from_route(err: RouteError) -> Self {
        match err {
            RouteError::NoRoute { stage } => PipelineError::NoRoute { stage },
            RouteError::Condition {
                stage,
                rule_index,
                source,
            } => PipelineError::MissingKey {
                stage,
                key: source.key().to_string(),
                rule: Some(rule_index),
                detail: source.to_string(),
            },
        }
    }
}

fn rule_suffix(rule: &Option<usize>) -> String {
    rule.map(|index| format!(" in routing rule {index}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_errors_map_to_kinds() {
        let invalid = PipelineError::from_apply(
            Stage::Drafting,
            ApplyError::Invalid {
                stage: Stage::Drafting,
                fields: vec![FieldError::new("content", "blank")],
            },
        );
        assert_eq!(invalid.kind(), FailureKind::Validation);
        assert!(invalid.to_string().contains("content: blank"));

        let bound = PipelineError::from_apply(
            Stage::Revising,
            ApplyError::Transition(TransitionError::Bound(IterationBoundViolation {
                current: 3,
                max: 2,
            })),
        );
        assert_eq!(bound.kind(), FailureKind::IterationBoundViolation);
    }

    #[test]
    fn route_errors_map_to_kinds() {
        let none = PipelineError::from_route(RouteError::NoRoute {
            stage: Stage::Reviewing,
        });
        assert_eq!(none.kind(), FailureKind::NoRoute);

        let missing = PipelineError::from_route(RouteError::Condition {
            stage: Stage::Planning,
            rule_index: 0,
            source: ContextError::MissingKey {
                key: "ghost".to_string(),
            },
        });
        assert_eq!(missing.kind(), FailureKind::MissingKey);
        assert!(missing.to_string().contains("`ghost` in routing rule 0"));
        assert!(matches!(
            missing,
            PipelineError::MissingKey {
                rule: Some(0),
                ..
            }
        ));

        let unrouted = PipelineError::from_context(
            Stage::Revising,
            ContextError::MissingKey {
                key: "current_iteration".to_string(),
            },
        );
        assert!(!unrouted.to_string().contains("routing rule"));
    }
}
