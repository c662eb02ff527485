//! The stage machine: maps `(snapshot, submission)` to the fields it writes.
//!
//! ```text
//! planning   -> drafting
//! drafting   -> reviewing
//! reviewing  -> revising
//! revising   -> reviewing   (iteration_needed && current < max; advances the iteration)
//! revising   -> finalizing  (otherwise)
//! finalizing -> done
//! ```
//!
//! The update always carries the new `current_stage`, so routing sees the
//! transition in the same atomic apply as the payload.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::core::context::{ContextError, ContextUpdate, Snapshot, keys};
use crate::core::iteration::{IterationBoundViolation, IterationController, IterationStateError};
use crate::core::stage::Stage;
use crate::core::submission::{
    AnalysisPlan, FeedbackCollection, FinalReport, ReportDraft, RevisedReport, Submission,
};

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub update: ContextUpdate,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Bound(#[from] IterationBoundViolation),
    #[error("payload for stage `{stage}` could not be decoded: {message}")]
    Payload { stage: Stage, message: String },
    #[error("stage `{0}` accepts no submissions")]
    Terminal(Stage),
}

impl From<IterationStateError> for TransitionError {
    fn from(err: IterationStateError) -> Self {
        match err {
            IterationStateError::Context(err) => TransitionError::Context(err),
            IterationStateError::Bound(err) => TransitionError::Bound(err),
        }
    }
}

/// Compute the update a validated submission makes to `snapshot`.
pub fn transition(snapshot: &Snapshot, submission: &Submission) -> Result<Transition, TransitionError> {
    let from = snapshot.stage()?;
    let (to, update) = match from {
        Stage::Planning => {
            let plan: AnalysisPlan = decode(from, submission)?;
            (
                Stage::Drafting,
                ContextUpdate::new().set(keys::ANALYSIS_PLAN, plan.analysis_plan),
            )
        }
        Stage::Drafting => {
            let draft: ReportDraft = decode(from, submission)?;
            (
                Stage::Reviewing,
                ContextUpdate::new().set(keys::REPORT_DRAFT, draft.content),
            )
        }
        Stage::Reviewing => review_update(snapshot, decode(from, submission)?)?,
        Stage::Revising => revise_update(snapshot, decode(from, submission)?)?,
        Stage::Finalizing => {
            let report: FinalReport = decode(from, submission)?;
            (
                Stage::Done,
                ContextUpdate::new()
                    .set(keys::FINAL_REPORT, report.content)
                    .set(keys::ITERATION_NEEDED, false),
            )
        }
        Stage::Done => return Err(TransitionError::Terminal(from)),
    };

    Ok(Transition {
        from,
        to,
        update: update.set(keys::CURRENT_STAGE, to.as_str()),
    })
}

/// Latest feedback replaces `feedback_collection`; every round is kept in
/// `feedback_history` so later reviews can check what was already raised.
fn review_update(
    snapshot: &Snapshot,
    feedback: FeedbackCollection,
) -> Result<(Stage, ContextUpdate), TransitionError> {
    let iteration = snapshot.get_u32(keys::CURRENT_ITERATION)?;
    let mut history = snapshot
        .get(keys::FEEDBACK_HISTORY)?
        .as_array()
        .cloned()
        .ok_or_else(|| ContextError::WrongType {
            key: keys::FEEDBACK_HISTORY.to_string(),
            expected: "sequence",
        })?;
    let recorded = to_value(Stage::Reviewing, &feedback)?;
    history.push(json!({ "iteration": iteration, "feedback": recorded }));

    Ok((
        Stage::Revising,
        ContextUpdate::new()
            .set(keys::FEEDBACK_COLLECTION, recorded)
            .set(keys::ITERATION_NEEDED, feedback.iteration_needed)
            .set(keys::FEEDBACK_HISTORY, history),
    ))
}

fn revise_update(
    snapshot: &Snapshot,
    revised: RevisedReport,
) -> Result<(Stage, ContextUpdate), TransitionError> {
    let iteration_needed = snapshot.get_bool(keys::ITERATION_NEEDED)?;
    let mut controller = IterationController::from_snapshot(snapshot)?;

    let mut update = ContextUpdate::new()
        .set(keys::REVISED_REPORT, to_value(Stage::Revising, &revised)?)
        .set(keys::REPORT_DRAFT, revised.content);

    let to = if controller.should_loop(iteration_needed) {
        let next = controller.advance()?;
        update = update.set(keys::CURRENT_ITERATION, next);
        Stage::Reviewing
    } else {
        Stage::Finalizing
    };
    Ok((to, update))
}

fn decode<T: DeserializeOwned>(stage: Stage, submission: &Submission) -> Result<T, TransitionError> {
    submission.parse().map_err(|err| TransitionError::Payload {
        stage,
        message: err.to_string(),
    })
}

fn to_value<T: Serialize>(stage: Stage, value: &T) -> Result<Value, TransitionError> {
    serde_json::to_value(value).map_err(|err| TransitionError::Payload {
        stage,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feedback, revision, seed_snapshot};

    fn at_stage(snapshot: &Snapshot, stage: Stage) -> Snapshot {
        snapshot.apply(&ContextUpdate::new().set(keys::CURRENT_STAGE, stage.as_str()))
    }

    #[test]
    fn plan_moves_to_drafting() {
        let snapshot = seed_snapshot(1);
        let t = transition(&snapshot, &Submission::plan("the plan")).expect("transition");
        assert_eq!((t.from, t.to), (Stage::Planning, Stage::Drafting));
        assert_eq!(t.update.get(keys::ANALYSIS_PLAN), Some(&json!("the plan")));
        assert_eq!(t.update.get(keys::CURRENT_STAGE), Some(&json!("drafting")));
    }

    #[test]
    fn review_records_feedback_and_history() {
        let snapshot = at_stage(&seed_snapshot(2), Stage::Reviewing);
        let t = transition(&snapshot, &Submission::feedback(&feedback(true))).expect("transition");
        assert_eq!(t.to, Stage::Revising);
        assert_eq!(t.update.get(keys::ITERATION_NEEDED), Some(&json!(true)));
        let history = t
            .update
            .get(keys::FEEDBACK_HISTORY)
            .and_then(Value::as_array)
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["iteration"], json!(1));
    }

    #[test]
    fn revise_loops_back_and_advances_below_bound() {
        let snapshot = at_stage(&seed_snapshot(2), Stage::Revising);
        let t = transition(&snapshot, &Submission::revision(&revision("v2"))).expect("transition");
        assert_eq!(t.to, Stage::Reviewing);
        assert_eq!(t.update.get(keys::CURRENT_ITERATION), Some(&json!(2)));
        assert_eq!(t.update.get(keys::REPORT_DRAFT), Some(&json!("v2")));
    }

    #[test]
    fn revise_at_bound_finalizes_even_when_iteration_needed() {
        let snapshot = at_stage(&seed_snapshot(1), Stage::Revising);
        assert_eq!(snapshot.get_bool(keys::ITERATION_NEEDED), Ok(true));
        let t = transition(&snapshot, &Submission::revision(&revision("v1"))).expect("transition");
        assert_eq!(t.to, Stage::Finalizing);
        assert_eq!(t.update.get(keys::CURRENT_ITERATION), None);
    }

    #[test]
    fn revise_without_request_finalizes() {
        let snapshot = at_stage(&seed_snapshot(3), Stage::Revising)
            .apply(&ContextUpdate::new().set(keys::ITERATION_NEEDED, false));
        let t = transition(&snapshot, &Submission::revision(&revision("v1"))).expect("transition");
        assert_eq!(t.to, Stage::Finalizing);
    }

    #[test]
    fn final_submission_terminates() {
        let snapshot = at_stage(&seed_snapshot(1), Stage::Finalizing);
        let t = transition(&snapshot, &Submission::final_report("done")).expect("transition");
        assert_eq!(t.to, Stage::Done);
        assert_eq!(t.update.get(keys::ITERATION_NEEDED), Some(&json!(false)));
    }

    #[test]
    fn done_accepts_nothing() {
        let snapshot = at_stage(&seed_snapshot(1), Stage::Done);
        let err = transition(&snapshot, &Submission::final_report("again")).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(Stage::Done));
    }

    #[test]
    fn corrupted_iteration_state_is_a_bound_violation() {
        let snapshot = at_stage(&seed_snapshot(2), Stage::Revising)
            .apply(&ContextUpdate::new().set(keys::CURRENT_ITERATION, 5));
        let err = transition(&snapshot, &Submission::revision(&revision("v"))).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Bound(IterationBoundViolation { current: 5, max: 2 })
        );
    }
}
