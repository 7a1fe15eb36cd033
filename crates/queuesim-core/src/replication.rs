//! One replication: reset, run, report.

use crate::model::Model;
use crate::report::StatTable;
use crate::rng::SimRng;
use crate::simulation::{SimConfig, SimError, Simulation, StopReason};
use crate::time::{SimTime, TimeBase, TimeUnit, f64_to_time};
use serde::{Deserialize, Serialize};

/// Run parameters shared by every replication of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSpec {
    /// Run length, in `unit`.
    pub duration: f64,
    /// Leading period excluded from statistics, in `unit`.
    #[serde(default)]
    pub warm_up: f64,
    #[serde(default)]
    pub unit: TimeUnit,
    #[serde(default)]
    pub time_base: TimeBase,
    #[serde(default)]
    pub max_events: Option<u64>,
    #[serde(default)]
    pub base_seed: u64,
}

impl ReplicationSpec {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            warm_up: 0.0,
            unit: TimeUnit::Step,
            time_base: TimeBase::default(),
            max_events: None,
            base_seed: 0,
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(SimError::InvalidSpec(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if !(self.warm_up.is_finite() && self.warm_up >= 0.0 && self.warm_up < self.duration) {
            return Err(SimError::InvalidSpec(format!(
                "warm-up {} must lie in [0, {})",
                self.warm_up, self.duration
            )));
        }
        Ok(())
    }

    pub fn end_time(&self) -> SimTime {
        f64_to_time(self.unit.to_steps(self.duration, self.time_base))
    }

    pub fn warm_up_time(&self) -> SimTime {
        f64_to_time(self.unit.to_steps(self.warm_up, self.time_base))
    }

    /// Seed of replication `index`; independent of which worker runs it.
    pub fn seed_for(&self, index: u64) -> u64 {
        SimRng::replication_seed(self.base_seed, index)
    }

    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            time_base: self.time_base,
            warm_up: self.warm_up_time(),
            max_events: self.max_events,
        }
    }
}

/// Result of one replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutcome {
    pub index: u64,
    pub seed: u64,
    pub stop: StopReason,
    pub events: u64,
    pub table: StatTable,
}

/// Reset `model`, run replication `index` to the configured end time and
/// read the statistics table.
pub fn run_replication(
    model: &mut Model,
    spec: &ReplicationSpec,
    index: u64,
) -> Result<ReplicationOutcome, SimError> {
    spec.validate()?;
    let seed = spec.seed_for(index);
    tracing::debug!(index, seed, "replication started");
    let mut sim = Simulation::new(model, seed, spec.sim_config())?;
    let stop = sim.run_until(spec.end_time())?;
    let table = sim.report();
    let events = sim.events_processed();
    tracing::debug!(index, events, ?stop, "replication finished");
    Ok(ReplicationOutcome {
        index,
        seed,
        stop,
        events,
        table,
    })
}
