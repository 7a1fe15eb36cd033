//! One end-to-end run: build the tree, distribute, print and export.

use queuesim_core::definition::ModelDefinition;
use queuesim_data::ExperimentConfig;
use queuesim_distribute::{CompositeTree, DistributionReport, LeafReport, LocalDispatch, PooledDispatch};
use queuesim_stats::PivotExport;
use serde::Serialize;
use std::path::Path;

use crate::RunnerError;
use crate::cli::Args;

/// JSON document written by `--output`.
#[derive(Debug, Serialize)]
pub struct RunOutput<'a> {
    pub model: &'a str,
    pub requested: u64,
    pub scheduled: u64,
    pub skipped: u64,
    pub discrepancy: i128,
    pub succeeded: u64,
    pub failed_leaves: Vec<&'a str>,
    pub leaves: &'a [LeafReport],
    pub statistics: PivotExport,
}

impl<'a> RunOutput<'a> {
    pub fn new(model: &'a str, report: &'a DistributionReport) -> Self {
        Self {
            model,
            requested: report.requested,
            scheduled: report.scheduled,
            skipped: report.skipped,
            discrepancy: report.discrepancy(),
            succeeded: report.succeeded(),
            failed_leaves: report.failed_leaves(),
            leaves: &report.leaves,
            statistics: report.pivot().export(),
        }
    }
}

pub fn execute(
    config: &ExperimentConfig,
    definition: &ModelDefinition,
) -> Result<(CompositeTree, DistributionReport), RunnerError> {
    let mut tree = CompositeTree::new();
    tree.build(config.tree_params(), &config.targets)?;
    let report = if config.parallel {
        let dispatch = PooledDispatch::new(config.threads)?;
        tree.distribute(definition, &config.replication, &dispatch)?
    } else {
        tree.distribute(definition, &config.replication, &LocalDispatch::new())?
    };
    Ok((tree, report))
}

/// Process exit status for a finished distribution: 2 when any scheduled
/// replication produced no table, whether its leaf failed or a single run
/// inside a healthy leaf did.
pub fn exit_status(report: &DistributionReport) -> u8 {
    if report.gap() > 0 { 2 } else { 0 }
}

fn write(path: &Path, contents: &str) -> Result<(), RunnerError> {
    std::fs::write(path, contents).map_err(|source| RunnerError::Write {
        file: path.to_path_buf(),
        source,
    })
}

pub fn run(args: &Args) -> Result<DistributionReport, RunnerError> {
    let (config, definition) = args.resolve()?;
    tracing::info!(
        model = %definition.name,
        replications = config.tree.replications,
        branching = config.tree.branching,
        depth = config.tree.depth,
        parallel = config.parallel,
        "starting experiment"
    );

    let (tree, report) = execute(&config, &definition)?;

    if let Some(path) = &args.dot {
        write(path, &tree.to_dot())?;
    }
    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&RunOutput::new(&definition.name, &report))?;
        write(path, &json)?;
    }

    println!(
        "{}: {} of {} scheduled replications succeeded ({} requested)",
        definition.name,
        report.succeeded(),
        report.scheduled,
        report.requested,
    );
    println!("{}", report.pivot());
    Ok(report)
}
