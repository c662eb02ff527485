//! `reportflow` command-line entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use reportflow::core::router::RoutingTable;
use reportflow::exit_codes;
use reportflow::io::config::DEFAULT_CONFIG_FILE;
use reportflow::logging;
use reportflow::run::{RunRequest, resolve_question, run_report};

#[derive(Parser)]
#[command(
    name = "reportflow",
    version,
    about = "Bounded plan/draft/review/revise/finalize report pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once and write the final report.
    Run {
        /// Question text, or `@path` to read it from a file.
        #[arg(short, long)]
        question: String,
        /// CSV dataset with a header row.
        #[arg(short, long)]
        data: PathBuf,
        /// Pipeline configuration (TOML).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Write the report here instead of the configured `artifact_path`.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the standard routing table as JSON.
    Routes,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            question,
            data,
            config,
            out,
        } => cmd_run(question, data, config, out),
        Command::Routes => cmd_routes(),
    }
}

fn cmd_run(question: String, data: PathBuf, config: PathBuf, out: Option<PathBuf>) -> Result<i32> {
    let root = std::env::current_dir().context("resolve working directory")?;
    let question = resolve_question(&root, &question)?;
    let report = run_report(&RunRequest {
        root,
        question,
        data_path: data,
        config_path: config,
        out_path: out,
    })?;

    for warning in &report.log_warnings {
        eprintln!("warning: run log incomplete: {warning}");
    }
    match report.result {
        Ok(artifact) => {
            println!("report written to {}", artifact.display());
            println!("run {} finished in {} round(s)", report.run_id, report.rounds);
            Ok(exit_codes::OK)
        }
        Err(failure) => {
            eprintln!("{failure}");
            eprintln!("run log: {}", report.log_dir.display());
            Ok(exit_codes::for_failure(failure.kind()))
        }
    }
}

fn cmd_routes() -> Result<i32> {
    let table = RoutingTable::standard();
    let json = serde_json::to_string_pretty(&table).context("serialize routing table")?;
    println!("{json}");
    Ok(exit_codes::OK)
}
