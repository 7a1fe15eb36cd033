//! queuesim command-line runner
//!
//! Loads a model and an experiment, splits the replications across a
//! composite tree, runs them and prints the aggregated statistics.
//!
//! # Example
//!
//! ```bash
//! # Experiment and model side by side in one directory
//! queuesim --dir experiments/pcb
//!
//! # 15 replications of 8 hours over a depth-3 binary tree, in parallel
//! queuesim -m pcb.ron -d 480 -n 15 -b 2 --depth 3 --parallel -o pcb.json
//! ```

mod cli;
mod run;

use clap::Parser;
use queuesim_core::simulation::SimError;
use queuesim_data::DataLoadError;
use queuesim_distribute::{DispatchError, TreeError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Data(#[from] DataLoadError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("invalid replication settings: {0}")]
    Spec(#[from] SimError),
    #[error("missing {0}: give it on the command line or in an experiment file")]
    Missing(&'static str),
    #[error("failed to write {file}: {source}")]
    Write {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,queuesim=info")),
        )
        .init();

    let args = cli::Args::parse();
    match run::run(&args) {
        Ok(report) => {
            let status = run::exit_status(&report);
            if status != 0 {
                eprintln!(
                    "{} of {} scheduled replications produced no statistics",
                    report.gap(),
                    report.scheduled
                );
                let failed = report.failed_leaves();
                if !failed.is_empty() {
                    eprintln!("failed compute nodes: {}", failed.join(", "));
                }
            }
            ExitCode::from(status)
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
