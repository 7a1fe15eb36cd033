//! Running a model across the leaves of a built tree.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use queuesim_core::definition::ModelDefinition;
use queuesim_core::replication::ReplicationSpec;
use queuesim_stats::{PivotTable, ReplicationSummary};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchError, Job, JobDispatch};
use crate::tree::{CompositeTree, NodeId, NodeRole, TreeError, TreeState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafStatus {
    Succeeded {
        replications: u64,
        failed_runs: u64,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafReport {
    pub node: String,
    pub target: String,
    pub indices: Range<u64>,
    pub status: LeafStatus,
}

/// Result of one distribution over a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    /// Total the tree was built for.
    pub requested: u64,
    /// Replications handed to the dispatched leaves.
    pub scheduled: u64,
    /// Replications held by leaves that were still running and so were
    /// not dispatched.
    #[serde(default)]
    pub skipped: u64,
    pub leaves: Vec<LeafReport>,
    /// Everything merged up to the root.
    pub summary: ReplicationSummary,
}

impl DistributionReport {
    pub fn pivot(&self) -> &PivotTable {
        &self.summary.pivot
    }

    pub fn succeeded(&self) -> u64 {
        self.summary.succeeded()
    }

    pub fn failed_leaves(&self) -> Vec<&str> {
        self.leaves
            .iter()
            .filter(|leaf| matches!(leaf.status, LeafStatus::Failed { .. }))
            .map(|leaf| leaf.node.as_str())
            .collect()
    }

    /// Scheduled replications that produced no table.
    pub fn gap(&self) -> u64 {
        self.scheduled.saturating_sub(self.succeeded())
    }

    /// Rounding difference between the replications the tree holds and
    /// the requested total. Skipped leaves still count as held.
    pub fn discrepancy(&self) -> i128 {
        i128::from(self.scheduled) + i128::from(self.skipped) - i128::from(self.requested)
    }
}

impl CompositeTree {
    /// Dispatch every idle compute leaf and merge the results upward.
    ///
    /// The model and replication spec are checked before anything is
    /// dispatched. A failing leaf is reported and contributes nothing; its
    /// siblings are unaffected.
    pub fn distribute<D>(
        &mut self,
        definition: &ModelDefinition,
        spec: &ReplicationSpec,
        dispatch: &D,
    ) -> Result<DistributionReport, TreeError>
    where
        D: JobDispatch + ?Sized,
    {
        if !matches!(self.state, TreeState::Built | TreeState::Finished) {
            return Err(TreeError::WrongState {
                expected: "built",
                actual: self.state,
            });
        }
        let root = self.root().ok_or(TreeError::WrongState {
            expected: "built",
            actual: self.state,
        })?;
        definition.build()?;
        spec.validate()?;

        let (leaves, running): (Vec<NodeId>, Vec<NodeId>) = self
            .leaves()
            .into_iter()
            .partition(|&id| !self.nodes[id].is_running());
        let skipped: u64 = running
            .iter()
            .filter_map(|&id| match &self.nodes[id].role {
                NodeRole::Compute(slot) => Some(slot.replications),
                _ => None,
            })
            .sum();
        if leaves.is_empty() {
            return Err(TreeError::NoIdleComputeNodes);
        }

        self.state = TreeState::Distributing;
        let definition = Arc::new(definition.clone());
        let mut jobs = Vec::with_capacity(leaves.len());
        for &id in &leaves {
            let node = &mut self.nodes[id];
            if let NodeRole::Compute(slot) = &mut node.role {
                slot.running = true;
                jobs.push(Job {
                    node: node.name.clone(),
                    target: slot.target.clone(),
                    definition: Arc::clone(&definition),
                    spec: spec.clone(),
                    indices: slot.indices(),
                });
            }
        }
        let scheduled: u64 = jobs.iter().map(Job::replications).sum();
        tracing::info!(leaves = jobs.len(), scheduled, skipped, "distributing replications");

        let mut results = dispatch.dispatch(&jobs).into_iter();
        let mut outputs: HashMap<NodeId, ReplicationSummary> = HashMap::new();
        let mut reports = Vec::with_capacity(jobs.len());
        for (&id, job) in leaves.iter().zip(&jobs) {
            let result = results
                .next()
                .unwrap_or_else(|| Err(DispatchError::Missing {
                    node: job.node.clone(),
                }))
                .and_then(|output| output.summary());

            let status = match result {
                Ok(summary) => {
                    let status = LeafStatus::Succeeded {
                        replications: summary.succeeded(),
                        failed_runs: summary.failures.len() as u64,
                    };
                    outputs.insert(id, summary);
                    status
                }
                Err(err) => {
                    tracing::error!(node = %job.node, target = %job.target, error = %err, "leaf dispatch failed");
                    outputs.insert(
                        id,
                        ReplicationSummary {
                            requested: job.replications(),
                            ..ReplicationSummary::default()
                        },
                    );
                    LeafStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            self.complete(&job.node)?;
            reports.push(LeafReport {
                node: job.node.clone(),
                target: job.target.clone(),
                indices: job.indices.clone(),
                status,
            });
        }

        let summary = self.gather(root, &mut outputs);
        self.state = TreeState::Finished;

        let report = DistributionReport {
            requested: self.params().map_or(scheduled, |p| p.total_replications),
            scheduled,
            skipped,
            leaves: reports,
            summary,
        };
        if report.gap() > 0 {
            tracing::warn!(
                scheduled,
                succeeded = report.succeeded(),
                failed_leaves = report.failed_leaves().len(),
                "aggregation gap, averaging over the replications that succeeded"
            );
        }
        tracing::info!(
            requested = report.requested,
            scheduled,
            skipped,
            succeeded = report.succeeded(),
            "distribution finished"
        );
        Ok(report)
    }

    /// Merge leaf summaries into their ancestors, children in order.
    fn gather(
        &self,
        id: NodeId,
        outputs: &mut HashMap<NodeId, ReplicationSummary>,
    ) -> ReplicationSummary {
        let Some(node) = self.get(id) else {
            return ReplicationSummary::default();
        };
        if node.is_compute() {
            return outputs.remove(&id).unwrap_or_default();
        }
        let mut merged = ReplicationSummary::default();
        for &child in &node.children {
            merged.merge(&self.gather(child, outputs));
        }
        tracing::trace!(node = %node.name, replications = merged.succeeded(), "merged children");
        merged
    }
}
