//! Job dispatch to execution targets.
//!
//! A [`Job`] asks a target to run a range of replications of one model. The
//! [`JobDispatch`] trait is the seam to whatever executes jobs; two
//! implementations live here:
//!
//! - [`LocalDispatch`] runs jobs inline on the calling thread (deterministic)
//! - [`PooledDispatch`] runs jobs in parallel on a dedicated rayon pool
//!
//! A job's result crosses the seam as a bitcode-encoded
//! [`ReplicationSummary`], so a remote implementation only has to move bytes.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use queuesim_core::definition::ModelDefinition;
use queuesim_core::replication::ReplicationSpec;
use queuesim_stats::{ReplicationDriver, ReplicationSummary};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{node}: target {target:?} is not reachable")]
    UnknownTarget { node: String, target: String },
    #[error("{node}: model rejected: {reason}")]
    Model { node: String, reason: String },
    #[error("{node}: failed to encode job output: {reason}")]
    Encode { node: String, reason: String },
    #[error("{node}: failed to decode job output: {reason}")]
    Decode { node: String, reason: String },
    #[error("{node}: no result returned")]
    Missing { node: String },
    #[error("failed to build rayon thread pool: {0}")]
    Pool(String),
}

/// Replications for one compute leaf.
#[derive(Debug, Clone)]
pub struct Job {
    pub node: String,
    pub target: String,
    pub definition: Arc<ModelDefinition>,
    pub spec: ReplicationSpec,
    pub indices: Range<u64>,
}

impl Job {
    pub fn replications(&self) -> u64 {
        self.indices.end.saturating_sub(self.indices.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub node: String,
    pub target: String,
    pub payload: Vec<u8>,
}

impl JobOutput {
    pub fn encode(job: &Job, summary: &ReplicationSummary) -> Result<Self, DispatchError> {
        let payload = bitcode::serialize(summary).map_err(|e| DispatchError::Encode {
            node: job.node.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            node: job.node.clone(),
            target: job.target.clone(),
            payload,
        })
    }

    pub fn summary(&self) -> Result<ReplicationSummary, DispatchError> {
        bitcode::deserialize(&self.payload).map_err(|e| DispatchError::Decode {
            node: self.node.clone(),
            reason: e.to_string(),
        })
    }
}

/// Runs jobs on execution targets.
///
/// Returns one result per job, in the order of `jobs`. A failing job must
/// not prevent the others from running.
pub trait JobDispatch: Send + Sync {
    fn dispatch(&self, jobs: &[Job]) -> Vec<Result<JobOutput, DispatchError>>;
}

/// Run a job's replications in this process.
pub fn run_job(job: &Job) -> Result<JobOutput, DispatchError> {
    tracing::debug!(
        node = %job.node,
        target = %job.target,
        first = job.indices.start,
        replications = job.replications(),
        "running job"
    );
    let summary = ReplicationDriver::new(job.spec.clone())
        .run(&job.definition, job.indices.clone())
        .map_err(|e| DispatchError::Model {
            node: job.node.clone(),
            reason: e.to_string(),
        })?;
    JobOutput::encode(job, &summary)
}

/// Targets a dispatcher accepts. `None` accepts any target.
#[derive(Debug, Clone, Default)]
struct Targets(Option<BTreeSet<String>>);

impl Targets {
    fn only<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Some(targets.into_iter().map(Into::into).collect()))
    }

    fn execute(&self, job: &Job) -> Result<JobOutput, DispatchError> {
        if let Some(known) = &self.0 {
            if !known.contains(&job.target) {
                return Err(DispatchError::UnknownTarget {
                    node: job.node.clone(),
                    target: job.target.clone(),
                });
            }
        }
        run_job(job)
    }
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// Runs each job inline, one after another.
#[derive(Debug, Clone, Default)]
pub struct LocalDispatch {
    targets: Targets,
}

impl LocalDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept jobs bound to one of `targets`.
    pub fn with_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: Targets::only(targets),
        }
    }
}

impl JobDispatch for LocalDispatch {
    fn dispatch(&self, jobs: &[Job]) -> Vec<Result<JobOutput, DispatchError>> {
        jobs.iter().map(|job| self.targets.execute(job)).collect()
    }
}

// ---------------------------------------------------------------------------
// Pooled
// ---------------------------------------------------------------------------

/// Runs jobs in parallel on its own rayon pool.
#[derive(Debug, Clone)]
pub struct PooledDispatch {
    pool: Arc<rayon::ThreadPool>,
    targets: Targets,
}

impl PooledDispatch {
    /// `threads == 0` lets rayon pick one thread per core.
    pub fn new(threads: usize) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("queuesim-job-{i}"))
            .build()
            .map_err(|e| DispatchError::Pool(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            targets: Targets::default(),
        })
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = Targets::only(targets);
        self
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl JobDispatch for PooledDispatch {
    fn dispatch(&self, jobs: &[Job]) -> Vec<Result<JobOutput, DispatchError>> {
        self.pool.install(|| {
            use rayon::prelude::*;
            jobs.par_iter().map(|job| self.targets.execute(job)).collect()
        })
    }
}
