//! Worker contract and the static role → worker binding.
//!
//! The [`Worker`] trait decouples the orchestrator from how a stage is
//! produced. Production runs bind roles to external commands; tests use
//! scripted workers that return predetermined submissions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::context::Snapshot;
use crate::core::stage::{Role, Stage};
use crate::core::submission::Submission;

/// Everything a worker may look at for one invocation.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub role: Role,
    pub stage: Stage,
    /// Owned copy of the context; writes to it are never seen by the store.
    pub snapshot: Snapshot,
    /// 1-based worker invocation count for the run, retries included.
    pub round: u32,
    pub iteration: u32,
    /// 1-based attempt number for this stage visit.
    pub attempt: u32,
    /// Time the worker may spend before its result is discarded.
    pub timeout: Duration,
}

/// A stage producer. Must not retry internally.
///
/// Invocations run on a separate thread so the orchestrator can abandon one
/// that overruns its time budget.
pub trait Worker: Send + Sync {
    fn invoke(&self, request: &WorkRequest) -> Result<Submission>;
}

impl<F> Worker for F
where
    F: Fn(&WorkRequest) -> Result<Submission> + Send + Sync,
{
    fn invoke(&self, request: &WorkRequest) -> Result<Submission> {
        self(request)
    }
}

/// Exactly one worker per role.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<Role, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `worker` to `role`, replacing any earlier binding.
    pub fn register(&mut self, role: Role, worker: impl Worker + 'static) -> &mut Self {
        self.workers.insert(role, Arc::new(worker));
        self
    }

    pub fn with(mut self, role: Role, worker: impl Worker + 'static) -> Self {
        self.register(role, worker);
        self
    }

    /// Shared handle to the worker bound to `role`.
    pub fn resolve(&self, role: Role) -> Option<Arc<dyn Worker>> {
        self.workers.get(&role).cloned()
    }

    /// Roles with no binding, in pipeline order.
    pub fn missing_roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| !self.workers.contains_key(role))
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("roles", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}
