//! Command-line arguments and how they combine with experiment files.

use clap::Parser;
use queuesim_core::definition::ModelDefinition;
use queuesim_core::replication::ReplicationSpec;
use queuesim_data::{ExperimentConfig, TreeConfig, load_experiment, load_experiment_dir, load_model};
use std::path::PathBuf;

use crate::RunnerError;

/// Queueing-network simulator
///
/// Runs replications of a model across a composite tree of compute nodes
/// and prints the aggregated statistics. Values given on the command line
/// override the experiment file.
#[derive(Parser, Debug)]
#[command(name = "queuesim")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Experiment file (.ron, .toml or .json)
    #[arg(short = 'e', long, conflicts_with = "dir")]
    pub experiment: Option<PathBuf>,

    /// Directory holding experiment.* and model.*
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Model file. Replaces the model named by the experiment.
    #[arg(short = 'm', long)]
    pub model: Option<PathBuf>,

    /// Total number of replications
    #[arg(short = 'n', long)]
    pub replications: Option<u64>,

    /// Children per management node
    #[arg(short = 'b', long)]
    pub branching: Option<u32>,

    /// Tree depth; 1 runs everything on a single compute node
    #[arg(long)]
    pub depth: Option<u32>,

    /// Run length per replication, in the experiment's time unit
    #[arg(short = 'd', long)]
    pub duration: Option<f64>,

    /// Leading period excluded from statistics
    #[arg(long)]
    pub warm_up: Option<f64>,

    /// Base seed; replication r is seeded from it and r
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run compute nodes in parallel on a thread pool
    #[arg(long)]
    pub parallel: bool,

    /// Thread pool size for --parallel (default: one per core)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Execution target; repeat to bind leaves to several targets in turn
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// Write the aggregated statistics as JSON
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Write the tree as a Graphviz DOT file
    #[arg(long)]
    pub dot: Option<PathBuf>,
}

impl Args {
    /// Load whatever files were named and fold the overrides in.
    pub fn resolve(&self) -> Result<(ExperimentConfig, ModelDefinition), RunnerError> {
        let (mut config, definition) = match (&self.dir, &self.experiment) {
            (Some(dir), _) => {
                let experiment = load_experiment_dir(dir)?;
                (experiment.config, Some(experiment.definition))
            }
            (None, Some(file)) => load_experiment(file)?,
            (None, None) => {
                let duration = self.duration.ok_or(RunnerError::Missing("--duration"))?;
                let config = ExperimentConfig::new(ReplicationSpec::new(duration), TreeConfig::default());
                (config, None)
            }
        };

        let definition = match &self.model {
            Some(path) => load_model(path)?,
            None => definition.ok_or(RunnerError::Missing("--model"))?,
        };

        self.apply(&mut config);
        config.replication.validate()?;
        config.tree_params().validate()?;
        Ok((config, definition))
    }

    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(n) = self.replications {
            config.tree.replications = n;
        }
        if let Some(b) = self.branching {
            config.tree.branching = b;
        }
        if let Some(d) = self.depth {
            config.tree.depth = d;
        }
        if let Some(duration) = self.duration {
            config.replication.duration = duration;
        }
        if let Some(warm_up) = self.warm_up {
            config.replication.warm_up = warm_up;
        }
        if let Some(seed) = self.seed {
            config.replication.base_seed = seed;
        }
        if self.parallel {
            config.parallel = true;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if !self.targets.is_empty() {
            config.targets = self.targets.clone();
        }
    }
}
