//! Bounded multi-stage report pipeline.
//!
//! A fixed sequence of workers (plan → draft → review → revise → finalize)
//! cooperates over one evolving context, with a single bounded review/revise
//! loop before termination. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (context snapshots, stage machine,
//!   submission schemas, routing, iteration bounds). No I/O.
//! - **[`io`]**: Side-effecting operations (config, CSV ingestion, worker
//!   processes, run logs, the final artifact).
//!
//! [`orchestrator`] drives the core through a [`workers::WorkerRegistry`];
//! [`run`] wires it to the filesystem for the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workers;
