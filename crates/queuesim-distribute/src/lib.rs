//! Hierarchical distribution of replications.
//!
//! A [`CompositeTree`] of management and compute nodes splits a requested
//! number of replications across its leaves. Each leaf is bound to an
//! execution target and handed a contiguous range of replication indices;
//! [`CompositeTree::distribute`] sends one [`Job`] per leaf through a
//! [`JobDispatch`] implementation and merges the returned summaries up to
//! the root.
//!
//! Every leaf gets the same count, `round(total / leaves)`, so the scheduled
//! total can differ from the request by up to `leaves - 1`. The difference is
//! reported in [`DistributionReport::discrepancy`], never corrected.

pub mod dispatch;
pub mod distribute;
pub mod tree;

pub use dispatch::{DispatchError, Job, JobDispatch, JobOutput, LocalDispatch, PooledDispatch};
pub use distribute::{DistributionReport, LeafReport, LeafStatus};
pub use tree::{CompositeTree, NodeId, TreeError, TreeParams, TreeState};
