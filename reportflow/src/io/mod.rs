//! I/O around the pipeline core: config, dataset, workers, logs, artifact.

pub mod artifact;
pub mod brief;
pub mod command_worker;
pub mod config;
pub mod dataset;
pub mod process;
pub mod run_log;
