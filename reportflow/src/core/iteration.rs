//! Bounds the review/revise loop.

use crate::core::context::{ContextError, Snapshot, keys};

/// `current_iteration` fell outside `1..=max_iterations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("iteration {current} is outside the allowed range 1..={max}")]
pub struct IterationBoundViolation {
    pub current: u32,
    pub max: u32,
}

/// Review/revise cycle counter.
///
/// `advance` is the only way `current` moves, and only on a loop-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationController {
    current: u32,
    max: u32,
}

impl IterationController {
    pub fn new(current: u32, max: u32) -> Result<Self, IterationBoundViolation> {
        let controller = Self { current, max };
        controller.check()?;
        Ok(controller)
    }

    /// Rebuild the controller from the iteration fields of a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, IterationStateError> {
        let current = snapshot.get_u32(keys::CURRENT_ITERATION)?;
        let max = snapshot.get_u32(keys::MAX_ITERATIONS)?;
        Ok(Self::new(current, max)?)
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// True when the reviewer asked for another pass and the bound allows it.
    pub fn should_loop(&self, iteration_needed: bool) -> bool {
        iteration_needed && self.current < self.max
    }

    /// Move to the next iteration. Callers must only do this on a loop-back.
    pub fn advance(&mut self) -> Result<u32, IterationBoundViolation> {
        if self.current >= self.max {
            return Err(IterationBoundViolation {
                current: self.current + 1,
                max: self.max,
            });
        }
        self.current += 1;
        Ok(self.current)
    }

    pub fn check(&self) -> Result<(), IterationBoundViolation> {
        if self.max == 0 || self.current == 0 || self.current > self.max {
            return Err(IterationBoundViolation {
                current: self.current,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Either the iteration fields are unreadable or they violate the bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterationStateError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Bound(#[from] IterationBoundViolation),
}
