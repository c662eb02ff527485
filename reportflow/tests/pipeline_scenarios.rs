//! End-to-end pipeline scenarios driven through the orchestrator with scripted workers.
//!
//! Each test builds a registry of scripted workers, runs the pipeline from a
//! seed, and checks termination, iteration bounds and failure reporting.

use std::time::{Duration, Instant};

use reportflow::core::condition::Condition;
use reportflow::core::context::keys;
use reportflow::core::error::FailureKind;
use reportflow::core::router::{Destination, RoutingTable};
use reportflow::core::stage::{Role, Stage};
use reportflow::core::store::replay;
use reportflow::core::submission::{Submission, SubmissionSchemas};
use reportflow::orchestrator::{Orchestrator, RoundOutcome, RunLimits};
use reportflow::test_support::{ScriptedWorker, Step, seed, standard_registry};
use serde_json::json;

fn orchestrator(registry: reportflow::workers::WorkerRegistry, max_iterations: u32) -> Orchestrator {
    Orchestrator::new(
        registry,
        RoutingTable::standard(),
        RunLimits::for_iterations(max_iterations),
    )
    .expect("orchestrator")
}

/// m=1, reviewer satisfied: plan, draft, review, revise, finalize.
#[test]
fn single_iteration_clean_run_takes_five_invocations() {
    let (registry, calls) = standard_registry(&[false]);
    let outcome = orchestrator(registry, 1).run(&seed(1)).expect("run");

    assert_eq!(outcome.rounds, 5);
    assert_eq!(calls.total(), 5);
    assert_eq!(
        calls.roles(),
        vec![
            Role::Planner,
            Role::Drafter,
            Role::Reviewer,
            Role::Reviser,
            Role::Finalizer
        ]
    );
    assert_eq!(outcome.snapshot.stage(), Ok(Stage::Done));
    assert_eq!(outcome.final_report, "# Final report\n# End of Report");
    assert_eq!(
        outcome.snapshot.get(keys::FINAL_REPORT),
        Ok(&json!(outcome.final_report))
    );
}

/// m=2, reviewer asks for another pass once: seven invocations, iteration 2.
#[test]
fn second_iteration_runs_when_requested() {
    let (registry, calls) = standard_registry(&[true, false]);
    let outcome = orchestrator(registry, 2).run(&seed(2)).expect("run");

    assert_eq!(outcome.rounds, 7);
    assert_eq!(calls.count(Role::Reviewer), 2);
    assert_eq!(calls.count(Role::Reviser), 2);
    assert_eq!(outcome.snapshot.get_u32(keys::CURRENT_ITERATION), Ok(2));
    assert_eq!(outcome.snapshot.get_bool(keys::ITERATION_NEEDED), Ok(false));

    let history = outcome
        .snapshot
        .get(keys::FEEDBACK_HISTORY)
        .expect("history")
        .as_array()
        .expect("array")
        .clone();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["iteration"], json!(1));
    assert_eq!(history[1]["iteration"], json!(2));
}

/// The second review sees the first revision, not the original draft.
#[test]
fn later_review_sees_latest_revision() {
    let (registry, calls) = standard_registry(&[true, false]);
    orchestrator(registry, 2).run(&seed(2)).expect("run");

    let reviews: Vec<_> = calls
        .calls()
        .into_iter()
        .filter(|call| call.role == Role::Reviewer)
        .collect();
    assert_eq!(
        reviews[0].snapshot.get_str(keys::REPORT_DRAFT),
        Ok("# Draft\nParking dominates.")
    );
    assert_eq!(reviews[1].snapshot.get_str(keys::REPORT_DRAFT), Ok("# Draft v2"));
    assert_eq!(reviews[1].iteration, 2);
}

/// Reviewer never satisfied: the bound forces finalization after the second revise.
#[test]
fn iteration_bound_forces_finalization() {
    let (registry, calls) = standard_registry(&[true]);
    let outcome = orchestrator(registry, 2).run(&seed(2)).expect("run");

    assert_eq!(outcome.rounds, 7);
    assert_eq!(calls.count(Role::Reviewer), 2);
    assert_eq!(calls.count(Role::Finalizer), 1);
    assert_eq!(outcome.snapshot.get_u32(keys::CURRENT_ITERATION), Ok(2));
}

/// Invocations never exceed 3 + 2m for any bound when the reviewer always asks for more.
#[test]
fn invocations_are_bounded_by_iterations() {
    for m in 1..=4 {
        let (registry, _) = standard_registry(&[true]);
        let outcome = orchestrator(registry, m).run(&seed(m)).expect("run");
        assert_eq!(outcome.rounds, 3 + 2 * m, "m = {m}");
        assert_eq!(outcome.snapshot.get_u32(keys::CURRENT_ITERATION), Ok(m));
    }
}

/// A blank draft stops the run and leaves `report_draft` untouched.
#[test]
fn invalid_draft_is_a_validation_failure() {
    let (mut registry, calls) = standard_registry(&[false]);
    registry.register(
        Role::Drafter,
        ScriptedWorker::submitting(vec![Submission::draft("   ")]).with_log(&calls),
    );
    let failure = orchestrator(registry, 1).run(&seed(1)).unwrap_err();

    assert_eq!(failure.kind(), FailureKind::Validation);
    assert_eq!(failure.stage, Stage::Drafting);
    assert_eq!(failure.rounds, 2);
    assert_eq!(calls.total(), 2);
    assert_eq!(failure.last_snapshot.get_str(keys::REPORT_DRAFT), Ok(""));
    assert_eq!(failure.last_snapshot.stage(), Ok(Stage::Drafting));
    assert!(failure.to_string().starts_with("pipeline did not complete"));
    assert!(failure.to_string().contains("content"));
}

/// A worker answering for the wrong stage is rejected, not applied.
#[test]
fn submission_for_another_stage_is_rejected() {
    let (mut registry, _) = standard_registry(&[false]);
    registry.register(
        Role::Planner,
        ScriptedWorker::submitting(vec![Submission::draft("skipping ahead")]),
    );
    let failure = orchestrator(registry, 1).run(&seed(1)).unwrap_err();
    assert_eq!(failure.kind(), FailureKind::Validation);
    assert_eq!(failure.last_snapshot.version(), 0);
}

/// One transient failure is retried with the same snapshot.
#[test]
fn transient_worker_failure_is_retried() {
    let (mut registry, calls) = standard_registry(&[false]);
    registry.register(
        Role::Reviewer,
        ScriptedWorker::new(vec![
            Step::Fail("rate limited".to_string()),
            Step::Submit(Submission::feedback(&reportflow::test_support::feedback(false))),
        ])
        .with_log(&calls),
    );
    let mut outcomes = Vec::new();
    let outcome = orchestrator(registry, 1)
        .run_observed(&seed(1), |record| outcomes.push(record.outcome.clone()))
        .expect("run");

    assert_eq!(outcome.rounds, 6);
    let reviews: Vec<_> = calls
        .calls()
        .into_iter()
        .filter(|call| call.role == Role::Reviewer)
        .collect();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].attempt, 1);
    assert_eq!(reviews[1].attempt, 2);
    assert_eq!(reviews[0].snapshot, reviews[1].snapshot);
    assert_eq!(
        outcomes[2],
        RoundOutcome::WorkerFailed {
            message: "rate limited".to_string(),
            retrying: true
        }
    );
}

/// Failing more than `worker_retries` times is fatal.
#[test]
fn exhausted_retries_fail_the_run() {
    let (mut registry, _) = standard_registry(&[false]);
    registry.register(
        Role::Finalizer,
        ScriptedWorker::new(vec![Step::Fail("disk full".to_string())]),
    );
    let limits = RunLimits {
        worker_retries: 1,
        ..RunLimits::for_iterations(1)
    };
    let failure = Orchestrator::new(registry, RoutingTable::standard(), limits)
        .expect("orchestrator")
        .run(&seed(1))
        .unwrap_err();

    assert_eq!(failure.kind(), FailureKind::Worker);
    assert_eq!(failure.stage, Stage::Finalizing);
    assert_eq!(failure.rounds, 6);
    assert!(failure.to_string().contains("after 2 attempt(s): disk full"));
    assert_eq!(failure.last_snapshot.stage(), Ok(Stage::Finalizing));
}

/// A table that routes the reviser back to the drafter forever is stopped by the round budget.
#[test]
fn cyclic_routing_hits_round_budget() {
    let at = |stage: Stage| Condition::eq(keys::CURRENT_STAGE, stage.as_str());
    let routes = RoutingTable::builder()
        .rule(Stage::Planning, at(Stage::Drafting), Destination::Worker(Role::Drafter))
        .rule(Stage::Drafting, at(Stage::Reviewing), Destination::Worker(Role::Reviewer))
        .rule(Stage::Reviewing, at(Stage::Revising), Destination::Worker(Role::Reviser))
        .rule(Stage::Revising, Condition::Always, Destination::Worker(Role::Drafter))
        .rule(Stage::Finalizing, Condition::Always, Destination::Stop)
        .build()
        .expect("table");
    let (registry, calls) = standard_registry(&[false]);
    let limits = RunLimits {
        round_budget: 12,
        ..RunLimits::for_iterations(1)
    };
    let failure = Orchestrator::new(registry, routes, limits)
        .expect("orchestrator")
        .run(&seed(1))
        .unwrap_err();

    assert_eq!(failure.kind(), FailureKind::RoundBudgetExhausted);
    assert_eq!(failure.rounds, 12);
    assert_eq!(calls.total(), 12);
    assert_eq!(calls.count(Role::Finalizer), 0);
}

/// A table with no rule matching the post-submission state reports NoRoute.
#[test]
fn unmatched_routing_is_no_route() {
    let routes = RoutingTable::builder()
        .rule(Stage::Planning, Condition::eq(keys::CURRENT_STAGE, "reviewing"), Destination::Stop)
        .rule(Stage::Drafting, Condition::Always, Destination::Stop)
        .rule(Stage::Reviewing, Condition::Always, Destination::Stop)
        .rule(Stage::Revising, Condition::Always, Destination::Stop)
        .rule(Stage::Finalizing, Condition::Always, Destination::Stop)
        .build()
        .expect("table");
    let (registry, _) = standard_registry(&[false]);
    let failure = Orchestrator::new(registry, routes, RunLimits::for_iterations(1))
        .expect("orchestrator")
        .run(&seed(1))
        .unwrap_err();
    assert_eq!(failure.kind(), FailureKind::NoRoute);
    assert_eq!(failure.rounds, 1);
    assert_eq!(failure.last_snapshot.get_str(keys::ANALYSIS_PLAN).map(str::is_empty), Ok(false));
}

/// A routing condition reading an absent key is a MissingKey failure.
#[test]
fn condition_on_absent_key_is_missing_key() {
    let routes = RoutingTable::builder()
        .rule(Stage::Planning, Condition::eq("approval_granted", true), Destination::Stop)
        .rule(Stage::Drafting, Condition::Always, Destination::Stop)
        .rule(Stage::Reviewing, Condition::Always, Destination::Stop)
        .rule(Stage::Revising, Condition::Always, Destination::Stop)
        .rule(Stage::Finalizing, Condition::Always, Destination::Stop)
        .build()
        .expect("table");
    let (registry, _) = standard_registry(&[false]);
    let failure = Orchestrator::new(registry, routes, RunLimits::for_iterations(1))
        .expect("orchestrator")
        .run(&seed(1))
        .unwrap_err();
    assert_eq!(failure.kind(), FailureKind::MissingKey);
    assert!(
        failure
            .to_string()
            .contains("`approval_granted` in routing rule 0")
    );
}

/// Replaying the journal from the seed reproduces the final snapshot exactly.
#[test]
fn journal_replay_reproduces_final_snapshot() {
    let (registry, _) = standard_registry(&[true, true, false]);
    let run_seed = seed(3);
    let outcome = orchestrator(registry, 3).run(&run_seed).expect("run");

    let schemas = SubmissionSchemas::compile().expect("schemas");
    let replayed = replay(run_seed.snapshot(), &outcome.journal, &schemas).expect("replay");
    assert_eq!(replayed, outcome.snapshot);
    assert_eq!(
        serde_json::to_string(&replayed).expect("json"),
        serde_json::to_string(&outcome.snapshot).expect("json")
    );
}

/// Two runs from the same seed with the same scripts produce identical snapshots.
#[test]
fn runs_are_deterministic() {
    let first = {
        let (registry, _) = standard_registry(&[true, false]);
        orchestrator(registry, 2).run(&seed(2)).expect("run")
    };
    let second = {
        let (registry, _) = standard_registry(&[true, false]);
        orchestrator(registry, 2).run(&seed(2)).expect("run")
    };
    assert_eq!(first.snapshot, second.snapshot);
    assert_eq!(first.journal, second.journal);
}

/// A drafter that sleeps far past its budget is given up on at the budget.
#[test]
fn overrunning_worker_fails_without_waiting_for_it() {
    let (mut registry, _) = standard_registry(&[false]);
    registry.register(
        Role::Drafter,
        |_: &reportflow::workers::WorkRequest| -> anyhow::Result<Submission> {
            std::thread::sleep(Duration::from_secs(3));
            Ok(Submission::draft("too late"))
        },
    );
    let limits = RunLimits {
        round_budget: 30,
        worker_retries: 0,
        worker_timeout: Duration::from_millis(100),
    };
    let orchestrator =
        Orchestrator::new(registry, RoutingTable::standard(), limits).expect("orchestrator");

    let started = Instant::now();
    let failure = orchestrator.run(&seed(1)).unwrap_err();
    let waited = started.elapsed();

    assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    assert_eq!(failure.kind(), FailureKind::Worker);
    assert_eq!(failure.stage, Stage::Drafting);
    assert_eq!(failure.last_snapshot.get_str(keys::REPORT_DRAFT), Ok(""));
}
