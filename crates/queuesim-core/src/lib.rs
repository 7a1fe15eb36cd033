//! Queuesim Core -- a discrete-event queueing-network simulator.
//!
//! Entities are generated at sources, routed through a directed graph of
//! servers, consumed at sinks, and measured along the way. Every replication
//! runs inside its own [`simulation::Simulation`] context; nothing is
//! process-wide, so replications can run side by side.
//!
//! # Building a model
//!
//! ```rust,ignore
//! let mut model = Model::new();
//! let src = model.add_source("PCB", SourceConfig::interval(delay))?;
//! let srv = model.add_server("Placement", ServerConfig::new(processing))?;
//! let out = model.add_sink("GoodParts")?;
//! model.connect(src, srv, None, None)?;
//! model.connect(srv, out, None, None)?;
//! model.validate()?; // normalizes probabilities, builds routing caches
//! ```
//!
//! # Key Types
//!
//! - [`model::Model`] -- Station registry bound by role.
//! - [`definition::ModelDefinition`] -- Serializable model description.
//! - [`routing::RoutingTable`] -- Connections, probability normalization and
//!   the cumulative routing cache.
//! - [`simulation::Simulation`] -- Clock, event list and entities of one run.
//! - [`replication::run_replication`] -- Reset, run and report one replication.
//! - [`report::StatTable`] -- Flat `(kind, name, metric)` statistics of a run.
//! - [`time::SimTime`] -- Q32.32 fixed-point simulation time.

pub mod definition;
pub mod distribution;
pub mod entity;
pub mod event;
pub mod id;
pub mod model;
pub mod replication;
pub mod report;
pub mod reset;
pub mod rng;
pub mod routing;
pub mod simulation;
pub mod station;
pub mod tally;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod time;
