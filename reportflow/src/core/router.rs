//! Handoff routing: pick the next worker from the context after each submission.
//!
//! Each source stage owns an ordered list of rules. The first rule whose
//! condition holds wins; when none holds the router fails instead of guessing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::condition::Condition;
use crate::core::context::{ContextError, Snapshot, keys};
use crate::core::stage::{Role, Stage};

/// Where the pipeline goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "role", rename_all = "lowercase")]
pub enum Destination {
    Worker(Role),
    Stop,
}

impl Destination {
    /// The stage the pipeline sits in once this destination is taken.
    pub fn stage(self) -> Stage {
        match self {
            Destination::Worker(role) => role.stage(),
            Destination::Stop => Stage::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition: Condition,
    pub target: Destination,
}

/// The rule that matched, with its position for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub destination: Destination,
    pub rule_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no routing rule matched after stage `{stage}`")]
    NoRoute { stage: Stage },
    #[error("routing rule {rule_index} for stage `{stage}` failed: {source}")]
    Condition {
        stage: Stage,
        rule_index: usize,
        #[source]
        source: ContextError,
    },
}

/// Ordered routing rules per source stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    rules: BTreeMap<Stage, Vec<RoutingRule>>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    /// The report pipeline's handoffs.
    pub fn standard() -> Self {
        let at = |stage: Stage| Condition::eq(keys::CURRENT_STAGE, stage.as_str());
        let mut rules = BTreeMap::new();
        rules.insert(
            Stage::Planning,
            vec![RoutingRule {
                condition: Condition::and(vec![
                    Condition::eq(keys::LOOP_STARTED, true),
                    at(Stage::Drafting),
                ]),
                target: Destination::Worker(Role::Drafter),
            }],
        );
        rules.insert(
            Stage::Drafting,
            vec![RoutingRule {
                condition: at(Stage::Reviewing),
                target: Destination::Worker(Role::Reviewer),
            }],
        );
        rules.insert(
            Stage::Reviewing,
            vec![RoutingRule {
                condition: at(Stage::Revising),
                target: Destination::Worker(Role::Reviser),
            }],
        );
        rules.insert(
            Stage::Revising,
            vec![
                RoutingRule {
                    condition: at(Stage::Finalizing),
                    target: Destination::Worker(Role::Finalizer),
                },
                RoutingRule {
                    condition: at(Stage::Reviewing),
                    target: Destination::Worker(Role::Reviewer),
                },
            ],
        );
        rules.insert(
            Stage::Finalizing,
            vec![RoutingRule {
                condition: at(Stage::Done),
                target: Destination::Stop,
            }],
        );
        Self { rules }
    }

    pub fn rules_for(&self, stage: Stage) -> &[RoutingRule] {
        self.rules.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check the table shape: every working stage has rules, `done` has none.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        for stage in Stage::ALL {
            let count = self.rules_for(stage).len();
            if stage.is_terminal() && count > 0 {
                errors.push(format!("terminal stage '{stage}' must not have routing rules"));
            }
            if !stage.is_terminal() && count == 0 {
                errors.push(format!("stage '{stage}' has no routing rules"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Select the destination after leaving `from`, given the freshly applied snapshot.
    pub fn route(&self, from: Stage, snapshot: &Snapshot) -> Result<RouteDecision, RouteError> {
        for (rule_index, rule) in self.rules_for(from).iter().enumerate() {
            let matched = rule
                .condition
                .evaluate(snapshot)
                .map_err(|source| RouteError::Condition {
                    stage: from,
                    rule_index,
                    source,
                })?;
            if matched {
                return Ok(RouteDecision {
                    destination: rule.target,
                    rule_index,
                });
            }
        }
        Err(RouteError::NoRoute { stage: from })
    }
}

/// Incremental construction of a [`RoutingTable`]; rules keep insertion order.
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    rules: BTreeMap<Stage, Vec<RoutingRule>>,
}

impl RoutingTableBuilder {
    pub fn rule(mut self, from: Stage, condition: Condition, target: Destination) -> Self {
        self.rules
            .entry(from)
            .or_default()
            .push(RoutingRule { condition, target });
        self
    }

    pub fn build(self) -> Result<RoutingTable, String> {
        let table = RoutingTable { rules: self.rules };
        table.validate()?;
        Ok(table)
    }
}
