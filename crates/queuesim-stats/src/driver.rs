//! Multi-replication driver.
//!
//! Runs a range of replication indices of one model definition and folds
//! their tables into a [`PivotTable`]. Each replication is seeded from its
//! index, so the result does not depend on whether the range runs
//! sequentially or on the rayon pool (`parallel` feature).

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use queuesim_core::definition::ModelDefinition;
use queuesim_core::model::{Model, ModelError};
use queuesim_core::replication::{ReplicationOutcome, ReplicationSpec, run_replication};
use queuesim_core::simulation::SimError;
use serde::{Deserialize, Serialize};

use crate::PivotTable;

/// A replication that produced no table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("replication {index} failed: {error}")]
pub struct ReplicationFailure {
    pub index: u64,
    pub error: String,
}

/// Outcome of a batch of replications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    pub pivot: PivotTable,
    pub requested: u64,
    pub failures: Vec<ReplicationFailure>,
    /// Replications skipped after cancellation.
    pub cancelled: u64,
}

impl ReplicationSummary {
    pub fn succeeded(&self) -> u64 {
        self.pivot.replications()
    }

    /// Requested replications that did not contribute to the pivot.
    pub fn gap(&self) -> u64 {
        self.requested.saturating_sub(self.succeeded())
    }

    pub fn is_complete(&self) -> bool {
        self.gap() == 0
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &ReplicationSummary) {
        self.pivot.merge(&other.pivot);
        self.requested += other.requested;
        self.failures.extend(other.failures.iter().cloned());
        self.cancelled += other.cancelled;
    }
}

/// Logs a progress line every 10 % of a batch.
struct Progress {
    total: u64,
    step: u64,
    done: AtomicU64,
}

impl Progress {
    fn new(total: u64) -> Self {
        Self {
            total,
            step: (total / 10).max(1),
            done: AtomicU64::new(0),
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.step == 0 || done == self.total {
            let percent = done * 100 / self.total.max(1);
            tracing::info!(done, total = self.total, "replications {percent}% complete");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationDriver {
    spec: ReplicationSpec,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl ReplicationDriver {
    pub fn new(spec: ReplicationSpec) -> Self {
        Self {
            spec,
            parallel: false,
            cancel: None,
        }
    }

    /// Run on the rayon pool when the `parallel` feature is enabled.
    /// Without the feature the flag is ignored.
    pub fn parallel(mut self, on: bool) -> Self {
        self.parallel = on;
        self
    }

    /// Stop starting new replications once `flag` is set. Replications
    /// already running finish.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn spec(&self) -> &ReplicationSpec {
        &self.spec
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run every index in `indices`.
    ///
    /// The model is built and validated once up front; a malformed model
    /// fails here before any replication starts. Individual replication
    /// failures are collected, not propagated.
    pub fn run(
        &self,
        definition: &ModelDefinition,
        indices: Range<u64>,
    ) -> Result<ReplicationSummary, ModelError> {
        let model = definition.build()?;
        let requested = indices.end.saturating_sub(indices.start);
        tracing::debug!(
            model = %definition.name,
            first = indices.start,
            requested,
            parallel = self.parallel,
            "replication batch started"
        );

        let progress = Progress::new(requested);
        let results = self.execute(model, indices, &progress);

        let mut summary = ReplicationSummary {
            requested,
            ..ReplicationSummary::default()
        };
        for (index, result) in results {
            match result {
                Some(Ok(outcome)) => summary.pivot.fold(&outcome.table),
                Some(Err(err)) => {
                    tracing::warn!(index, error = %err, "replication failed");
                    summary.failures.push(ReplicationFailure {
                        index,
                        error: err.to_string(),
                    });
                }
                None => summary.cancelled += 1,
            }
        }

        if !summary.is_complete() {
            tracing::warn!(
                requested,
                succeeded = summary.succeeded(),
                "fewer replications than requested, averaging over the ones that succeeded"
            );
        }
        Ok(summary)
    }

    fn run_one(
        &self,
        model: &mut Model,
        index: u64,
        progress: &Progress,
    ) -> Option<Result<ReplicationOutcome, SimError>> {
        if self.cancelled() {
            return None;
        }
        let result = run_replication(model, &self.spec, index);
        progress.tick();
        Some(result)
    }

    #[cfg(feature = "parallel")]
    fn execute(
        &self,
        model: Model,
        indices: Range<u64>,
        progress: &Progress,
    ) -> Vec<(u64, Option<Result<ReplicationOutcome, SimError>>)> {
        use rayon::prelude::*;

        if !self.parallel {
            return self.execute_sequential(model, indices, progress);
        }
        // Results are collected in index order, so the fold is identical to
        // the sequential one.
        indices
            .into_par_iter()
            .map_init(
                || model.clone(),
                |local, index| (index, self.run_one(local, index, progress)),
            )
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn execute(
        &self,
        model: Model,
        indices: Range<u64>,
        progress: &Progress,
    ) -> Vec<(u64, Option<Result<ReplicationOutcome, SimError>>)> {
        self.execute_sequential(model, indices, progress)
    }

    fn execute_sequential(
        &self,
        mut model: Model,
        indices: Range<u64>,
        progress: &Progress,
    ) -> Vec<(u64, Option<Result<ReplicationOutcome, SimError>>)> {
        indices
            .map(|index| (index, self.run_one(&mut model, index, progress)))
            .collect()
    }
}
