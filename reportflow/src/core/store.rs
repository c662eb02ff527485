//! The context store: owner of the current snapshot and its apply journal.

use serde::{Deserialize, Serialize};

use crate::core::context::{ContextUpdate, Snapshot, keys};
use crate::core::stage::Stage;
use crate::core::submission::{FieldError, Submission, SubmissionSchemas};
use crate::core::transition::{Transition, TransitionError, transition};

/// One accepted change, in apply order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JournalEntry {
    /// A validated worker submission for `stage`.
    Submission { stage: Stage, submission: Submission },
    /// The orchestrator moved `current_stage` to follow a routing decision.
    Handoff { from: Stage, to: Stage },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    #[error("submission for stage `{stage}` failed validation: {}", join_fields(.fields))]
    Invalid { stage: Stage, fields: Vec<FieldError> },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub(crate) fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Single-writer store. Every change is all-or-nothing.
#[derive(Debug, Clone)]
pub struct ContextStore {
    current: Snapshot,
    journal: Vec<JournalEntry>,
}

impl ContextStore {
    pub fn new(seed: Snapshot) -> Self {
        Self {
            current: seed,
            journal: Vec::new(),
        }
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.current.clone()
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Validate `submission` against the current stage and apply its transition.
    ///
    /// On any error the current snapshot is left exactly as it was.
    pub fn apply(
        &mut self,
        schemas: &SubmissionSchemas,
        submission: Submission,
    ) -> Result<Transition, ApplyError> {
        let stage = self.current.stage().map_err(TransitionError::from)?;
        schemas
            .validate(stage, &submission)
            .map_err(|fields| ApplyError::Invalid { stage, fields })?;
        let applied = transition(&self.current, &submission)?;

        self.current = self.current.apply(&applied.update);
        self.journal.push(JournalEntry::Submission { stage, submission });
        Ok(applied)
    }

    /// Record a routing-driven stage change.
    pub fn handoff(&mut self, to: Stage) -> Result<(), ApplyError> {
        let from = self.current.stage().map_err(TransitionError::from)?;
        let update = ContextUpdate::new().set(keys::CURRENT_STAGE, to.as_str());
        self.current = self.current.apply(&update);
        self.journal.push(JournalEntry::Handoff { from, to });
        Ok(())
    }
}

/// Rebuild the final snapshot from a seed and a journal.
pub fn replay(
    seed: Snapshot,
    journal: &[JournalEntry],
    schemas: &SubmissionSchemas,
) -> Result<Snapshot, ApplyError> {
    let mut store = ContextStore::new(seed);
    for entry in journal {
        match entry {
            JournalEntry::Submission { submission, .. } => {
                store.apply(schemas, submission.clone())?;
            }
            JournalEntry::Handoff { to, .. } => store.handoff(*to)?,
        }
    }
    Ok(store.current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feedback, revision, seed_snapshot};

    fn schemas() -> SubmissionSchemas {
        SubmissionSchemas::compile().expect("schemas")
    }

    #[test]
    fn rejected_submission_leaves_snapshot_byte_identical() {
        let schemas = schemas();
        let mut store = ContextStore::new(seed_snapshot(1));
        store
            .apply(&schemas, Submission::plan("plan"))
            .expect("plan applies");
        let before = serde_json::to_vec(store.current()).expect("serialize");

        let err = store
            .apply(&schemas, Submission::draft(""))
            .expect_err("blank draft rejected");

        assert!(matches!(err, ApplyError::Invalid { stage: Stage::Drafting, .. }));
        let after = serde_json::to_vec(store.current()).expect("serialize");
        assert_eq!(before, after);
        assert_eq!(store.journal().len(), 1);
    }

    #[test]
    fn submission_for_wrong_stage_is_rejected() {
        let schemas = schemas();
        let mut store = ContextStore::new(seed_snapshot(1));
        let err = store
            .apply(&schemas, Submission::draft("too early"))
            .expect_err("planning expects a plan");
        assert!(matches!(err, ApplyError::Invalid { stage: Stage::Planning, .. }));
        assert_eq!(store.current().version(), 0);
    }

    #[test]
    fn replay_reconstructs_final_state() {
        let schemas = schemas();
        let seed = seed_snapshot(2);
        let mut store = ContextStore::new(seed.clone());
        let submissions = vec![
            Submission::plan("plan"),
            Submission::draft("draft"),
            Submission::feedback(&feedback(true)),
            Submission::revision(&revision("draft v2")),
            Submission::feedback(&feedback(false)),
            Submission::revision(&revision("draft v3")),
            Submission::final_report("final"),
        ];
        for submission in submissions {
            store.apply(&schemas, submission).expect("apply");
        }
        assert_eq!(store.current().stage(), Ok(Stage::Done));

        let replayed = replay(seed, store.journal(), &schemas).expect("replay");
        assert_eq!(&replayed, store.current());
    }

    #[test]
    fn handoff_is_journaled_and_replayed() {
        let schemas = schemas();
        let seed = seed_snapshot(1);
        let mut store = ContextStore::new(seed.clone());
        store.apply(&schemas, Submission::plan("plan")).expect("plan");
        store.handoff(Stage::Reviewing).expect("handoff");
        assert_eq!(store.current().stage(), Ok(Stage::Reviewing));
        assert_eq!(
            store.journal().last(),
            Some(&JournalEntry::Handoff {
                from: Stage::Drafting,
                to: Stage::Reviewing
            })
        );

        let replayed = replay(seed, store.journal(), &schemas).expect("replay");
        assert_eq!(&replayed, store.current());
    }
}
