//! Deterministic, pure logic for the report pipeline.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! snapshots and submissions and return deterministic outputs suitable for tests.

pub mod condition;
pub mod context;
pub mod error;
pub mod iteration;
pub mod router;
pub mod stage;
pub mod store;
pub mod submission;
pub mod transition;
