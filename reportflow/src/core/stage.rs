//! Pipeline stages and the worker roles bound to them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named phase of the pipeline. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Drafting,
    Reviewing,
    Revising,
    Finalizing,
    Done,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Planning,
        Stage::Drafting,
        Stage::Reviewing,
        Stage::Revising,
        Stage::Finalizing,
        Stage::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Drafting => "drafting",
            Stage::Reviewing => "reviewing",
            Stage::Revising => "revising",
            Stage::Finalizing => "finalizing",
            Stage::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Done
    }

    /// The role whose worker runs while the pipeline sits in this stage.
    ///
    /// Returns `None` for the terminal stage.
    pub fn role(self) -> Option<Role> {
        match self {
            Stage::Planning => Some(Role::Planner),
            Stage::Drafting => Some(Role::Drafter),
            Stage::Reviewing => Some(Role::Reviewer),
            Stage::Revising => Some(Role::Reviser),
            Stage::Finalizing => Some(Role::Finalizer),
            Stage::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Identity of a pipeline worker. Each role is bound to exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Drafter,
    Reviewer,
    Reviser,
    Finalizer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Planner,
        Role::Drafter,
        Role::Reviewer,
        Role::Reviser,
        Role::Finalizer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Drafter => "drafter",
            Role::Reviewer => "reviewer",
            Role::Reviser => "reviser",
            Role::Finalizer => "finalizer",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            Role::Planner => Stage::Planning,
            Role::Drafter => Stage::Drafting,
            Role::Reviewer => Stage::Reviewing,
            Role::Reviser => Stage::Revising,
            Role::Finalizer => Stage::Finalizing,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
