//! Stable exit codes for the `reportflow` CLI.

use crate::core::error::FailureKind;

/// The run completed and the report was written.
pub const OK: i32 = 0;
/// Invalid invocation, configuration or input files.
pub const INVALID: i32 = 1;
/// A worker failed past its retries or overran the round budget.
pub const INCOMPLETE: i32 = 2;
/// A submission, route or iteration bound broke the pipeline contract.
pub const CONTRACT: i32 = 3;

/// Exit code for a run that stopped before `done`.
pub fn for_failure(kind: FailureKind) -> i32 {
    match kind {
        FailureKind::Config => INVALID,
        FailureKind::Worker | FailureKind::RoundBudgetExhausted => INCOMPLETE,
        FailureKind::Validation
        | FailureKind::NoRoute
        | FailureKind::MissingKey
        | FailureKind::IterationBoundViolation => CONTRACT,
    }
}
