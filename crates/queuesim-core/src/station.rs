//! Station kinds and their per-replication state.
//!
//! A [`Station`] pairs immutable configuration (what to sample, how many
//! parallel units, queue discipline) with mutable run state (queues,
//! counters, tallies). Only the run state is touched by [`Resettable`].
//!
//! Servers, combiners and separators are all *machines*: they share
//! [`ServerConfig`] and [`ServerState`] and differ only in what they do with
//! the entities they hold. A combiner waits for one parent and a fixed number
//! of members and processes them as one batch; a separator releases a batch
//! again.

use std::collections::VecDeque;

use crate::distribution::{Delay, DistributionError};
use crate::entity::EntityRole;
use crate::id::EntityId;
use crate::reset::Resettable;
use crate::routing::RoutingTable;
use crate::tally::TallyStatistic;
use crate::time::{SimTime, time_to_f64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationKind {
    Source,
    Server,
    Combiner,
    Separator,
    Sink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDiscipline {
    #[default]
    Fifo,
    Lifo,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a source spaces its arrivals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arrivals {
    /// First entity at time zero, then one every sampled interval.
    Interval(Delay),
    /// Absolute arrival times in steps. Unsorted input is sorted at build.
    Schedule(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub arrivals: Arrivals,
    /// Stop generating after this many entities.
    #[serde(default)]
    pub max_arrivals: Option<u64>,
    #[serde(default)]
    pub emits: EntityRole,
}

impl SourceConfig {
    pub fn interval(delay: Delay) -> Self {
        Self {
            arrivals: Arrivals::Interval(delay),
            max_arrivals: None,
            emits: EntityRole::Parent,
        }
    }

    pub fn schedule(times: Vec<f64>) -> Self {
        Self {
            arrivals: Arrivals::Schedule(times),
            max_arrivals: None,
            emits: EntityRole::Parent,
        }
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        match &self.arrivals {
            Arrivals::Interval(delay) => delay.validate(),
            Arrivals::Schedule(times) => match times.iter().find(|t| !t.is_finite() || **t < 0.0) {
                Some(&value) => Err(DistributionError::Negative {
                    name: "arrival time",
                    value,
                }),
                None => Ok(()),
            },
        }
    }
}

/// Machine failure model: the server fails after a sampled amount of
/// processing time and is repaired after a sampled downtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub time_between: Delay,
    pub duration: Delay,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub processing: Delay,
    #[serde(default = "one")]
    pub capacity: u32,
    #[serde(default)]
    pub discipline: QueueDiscipline,
    #[serde(default)]
    pub breakdown: Option<Breakdown>,
}

impl ServerConfig {
    pub fn new(processing: Delay) -> Self {
        Self {
            processing,
            capacity: 1,
            discipline: QueueDiscipline::Fifo,
            breakdown: None,
        }
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        self.processing.validate()?;
        if let Some(b) = &self.breakdown {
            b.time_between.validate()?;
            b.duration.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceState {
    /// Entities generated so far, including those before warm-up.
    pub generated: u64,
    /// Entities generated at or after warm-up.
    pub created: u64,
}

/// Run state shared by servers, combiners and separators.
///
/// For combiners `queue` holds parents and `members` holds members waiting
/// to be batched; `entered`/`exited` count parents and the `*_members`
/// counters count batch members. Other machines leave `members` empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerState {
    pub queue: VecDeque<EntityId>,
    pub members: VecDeque<EntityId>,
    pub in_process: u32,
    /// Remaining processing time before the next failure.
    pub until_breakdown: Option<f64>,
    pub entered: u64,
    pub exited: u64,
    pub entered_members: u64,
    pub exited_members: u64,
    pub processing_time: TallyStatistic,
    /// Unit-steps of allocated capacity after warm-up, repair holds
    /// included. Work still running is counted up to the last observation.
    pub busy_time: f64,
    pub downtimes: u64,
    pub total_downtime: f64,
    queue_area: f64,
    queue_max: usize,
    last_observed: f64,
}

impl ServerState {
    /// Integrate queue length and allocated units up to `now`, counting only
    /// time at or after `warm_up`. Call before every change to a queue or
    /// to `in_process`.
    ///
    /// The maximum only sees lengths held for a positive duration, so an
    /// entity that starts work on arrival never counts as queued.
    pub fn observe(&mut self, now: SimTime, warm_up: SimTime) {
        let now_f = time_to_f64(now);
        let from = self.last_observed.max(time_to_f64(warm_up));
        if now_f > from {
            let waiting = self.waiting();
            self.queue_area += waiting as f64 * (now_f - from);
            self.queue_max = self.queue_max.max(waiting);
            self.busy_time += f64::from(self.in_process) * (now_f - from);
        }
        self.last_observed = self.last_observed.max(now_f);
    }

    /// Entities queued, parents and members alike.
    pub fn waiting(&self) -> usize {
        self.queue.len() + self.members.len()
    }

    /// Time-weighted average queue length over `observed` steps.
    pub fn average_queue(&self, observed: f64) -> Option<f64> {
        (observed > 0.0).then(|| self.queue_area / observed)
    }

    pub fn max_queue(&self) -> usize {
        self.queue_max
    }

    pub fn pop(&mut self, discipline: QueueDiscipline) -> Option<EntityId> {
        pop_from(&mut self.queue, discipline)
    }

    /// Take one parent and `size` members if both are waiting.
    pub fn pop_batch(
        &mut self,
        discipline: QueueDiscipline,
        size: u32,
    ) -> Option<(EntityId, Vec<EntityId>)> {
        if self.queue.is_empty() || self.members.len() < size as usize {
            return None;
        }
        let parent = pop_from(&mut self.queue, discipline)?;
        let members = (0..size)
            .filter_map(|_| pop_from(&mut self.members, discipline))
            .collect();
        Some((parent, members))
    }
}

fn pop_from(queue: &mut VecDeque<EntityId>, discipline: QueueDiscipline) -> Option<EntityId> {
    match discipline {
        QueueDiscipline::Fifo => queue.pop_front(),
        QueueDiscipline::Lifo => queue.pop_back(),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkState {
    pub entered: u64,
    pub time_in_system: TallyStatistic,
    pub times_processed: TallyStatistic,
}

impl SinkState {
    pub fn total_time_in_system(&self) -> f64 {
        self.time_in_system.sum()
    }
}

/// Kind-specific configuration and run state.
#[derive(Debug, Clone)]
pub enum StationRole {
    Source {
        config: SourceConfig,
        state: SourceState,
    },
    Server {
        config: ServerConfig,
        state: ServerState,
    },
    Combiner {
        config: ServerConfig,
        /// Members attached to every parent.
        batch_size: u32,
        state: ServerState,
    },
    Separator {
        config: ServerConfig,
        state: ServerState,
    },
    Sink {
        state: SinkState,
    },
}

impl StationRole {
    /// Configuration and state of a server, combiner or separator.
    pub fn machine(&self) -> Option<(&ServerConfig, &ServerState)> {
        match self {
            StationRole::Server { config, state }
            | StationRole::Combiner { config, state, .. }
            | StationRole::Separator { config, state } => Some((config, state)),
            StationRole::Source { .. } | StationRole::Sink { .. } => None,
        }
    }

    pub fn machine_mut(&mut self) -> Option<(&ServerConfig, &mut ServerState)> {
        match self {
            StationRole::Server { config, state }
            | StationRole::Combiner { config, state, .. }
            | StationRole::Separator { config, state } => Some((config, state)),
            StationRole::Source { .. } | StationRole::Sink { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Station
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Station {
    pub name: String,
    pub role: StationRole,
    /// Empty for sinks.
    pub routing: RoutingTable,
}

impl Station {
    pub fn source(name: impl Into<String>, config: SourceConfig) -> Self {
        let mut config = config;
        if let Arrivals::Schedule(times) = &mut config.arrivals {
            times.sort_by(f64::total_cmp);
        }
        Self::with_role(
            name,
            StationRole::Source {
                config,
                state: SourceState::default(),
            },
        )
    }

    pub fn server(name: impl Into<String>, config: ServerConfig) -> Self {
        Self::with_role(
            name,
            StationRole::Server {
                config,
                state: ServerState::default(),
            },
        )
    }

    pub fn combiner(name: impl Into<String>, config: ServerConfig, batch_size: u32) -> Self {
        Self::with_role(
            name,
            StationRole::Combiner {
                config,
                batch_size,
                state: ServerState::default(),
            },
        )
    }

    pub fn separator(name: impl Into<String>, config: ServerConfig) -> Self {
        Self::with_role(
            name,
            StationRole::Separator {
                config,
                state: ServerState::default(),
            },
        )
    }

    pub fn sink(name: impl Into<String>) -> Self {
        Self::with_role(
            name,
            StationRole::Sink {
                state: SinkState::default(),
            },
        )
    }

    fn with_role(name: impl Into<String>, role: StationRole) -> Self {
        Self {
            name: name.into(),
            role,
            routing: RoutingTable::new(),
        }
    }

    pub fn kind(&self) -> StationKind {
        match self.role {
            StationRole::Source { .. } => StationKind::Source,
            StationRole::Server { .. } => StationKind::Server,
            StationRole::Combiner { .. } => StationKind::Combiner,
            StationRole::Separator { .. } => StationKind::Separator,
            StationRole::Sink { .. } => StationKind::Sink,
        }
    }

    /// Entities waiting in this station's queues. Zero for sources and sinks.
    pub fn queue_len(&self) -> usize {
        self.role.machine().map_or(0, |(_, state)| state.waiting())
    }

    /// Entities waiting or in process. Zero for sources and sinks.
    pub fn load(&self) -> usize {
        self.role
            .machine()
            .map_or(0, |(_, state)| state.waiting() + state.in_process as usize)
    }

    pub fn as_server(&self) -> Option<(&ServerConfig, &ServerState)> {
        match &self.role {
            StationRole::Server { config, state } => Some((config, state)),
            _ => None,
        }
    }

    pub fn as_sink(&self) -> Option<&SinkState> {
        match &self.role {
            StationRole::Sink { state } => Some(state),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<(&SourceConfig, &SourceState)> {
        match &self.role {
            StationRole::Source { config, state } => Some((config, state)),
            _ => None,
        }
    }
}

impl Resettable for Station {
    fn reset(&mut self) {
        match &mut self.role {
            StationRole::Source { state, .. } => *state = SourceState::default(),
            StationRole::Server { state, .. }
            | StationRole::Combiner { state, .. }
            | StationRole::Separator { state, .. } => *state = ServerState::default(),
            StationRole::Sink { state } => *state = SinkState::default(),
        }
        self.routing.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;
    use slotmap::SlotMap;

    fn t(v: f64) -> SimTime {
        SimTime::from_num(v)
    }

    fn entity_ids(n: usize) -> Vec<EntityId> {
        let mut map: SlotMap<EntityId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn kinds() {
        let d = Delay::steps(Distribution::Constant(1.0));
        assert_eq!(Station::source("a", SourceConfig::interval(d.clone())).kind(), StationKind::Source);
        assert_eq!(Station::server("b", ServerConfig::new(d.clone())).kind(), StationKind::Server);
        assert_eq!(Station::combiner("c", ServerConfig::new(d.clone()), 2).kind(), StationKind::Combiner);
        assert_eq!(Station::separator("d", ServerConfig::new(d)).kind(), StationKind::Separator);
        assert_eq!(Station::sink("e").kind(), StationKind::Sink);
        assert!(Station::sink("e").role.machine().is_none());
    }

    #[test]
    fn fifo_and_lifo_pop_order() {
        let ids = entity_ids(3);
        let mut state = ServerState::default();
        state.queue.extend(ids.iter().copied());
        assert_eq!(state.pop(QueueDiscipline::Fifo), Some(ids[0]));
        assert_eq!(state.pop(QueueDiscipline::Lifo), Some(ids[2]));
        assert_eq!(state.pop(QueueDiscipline::Fifo), Some(ids[1]));
        assert_eq!(state.pop(QueueDiscipline::Fifo), None);
    }

    #[test]
    fn queue_area_is_time_weighted() {
        let ids = entity_ids(2);
        let mut state = ServerState::default();
        let warm = t(0.0);
        state.observe(t(0.0), warm);
        state.queue.push_back(ids[0]);
        state.observe(t(2.0), warm); // 1 waiting for 2 steps
        state.queue.push_back(ids[1]);
        state.observe(t(3.0), warm); // 2 waiting for 1 step
        state.queue.clear();
        state.observe(t(4.0), warm);
        assert_eq!(state.average_queue(4.0), Some(1.0));
        assert_eq!(state.max_queue(), 2);
    }

    #[test]
    fn queue_area_ignores_warm_up() {
        let ids = entity_ids(1);
        let mut state = ServerState::default();
        state.queue.push_back(ids[0]);
        state.observe(t(10.0), t(5.0));
        assert_eq!(state.average_queue(5.0), Some(1.0));
    }

    #[test]
    fn busy_time_integrates_allocated_units() {
        let mut state = ServerState::default();
        let warm = t(2.0);
        state.in_process = 1;
        state.observe(t(4.0), warm); // 1 unit from warm-up to 4
        state.in_process = 2;
        state.observe(t(7.0), warm); // 2 units for 3 steps
        assert_eq!(state.busy_time, 8.0);
        // An earlier observation never integrates backwards.
        state.observe(t(6.0), warm);
        assert_eq!(state.busy_time, 8.0);
    }

    #[test]
    fn batch_needs_parent_and_enough_members() {
        let ids = entity_ids(4);
        let mut state = ServerState::default();
        state.members.extend([ids[1], ids[2]]);
        assert_eq!(state.pop_batch(QueueDiscipline::Fifo, 2), None);
        state.queue.push_back(ids[0]);
        assert_eq!(state.pop_batch(QueueDiscipline::Fifo, 3), None);
        state.members.push_back(ids[3]);
        assert_eq!(state.waiting(), 4);
        assert_eq!(
            state.pop_batch(QueueDiscipline::Lifo, 2),
            Some((ids[0], vec![ids[3], ids[2]]))
        );
        assert_eq!(state.waiting(), 1);
    }

    #[test]
    fn schedule_is_sorted_on_build() {
        let cfg = SourceConfig::schedule(vec![5.0, 1.0, 3.0]);
        let station = Station::source("s", cfg);
        let (config, _) = station.as_source().unwrap();
        assert_eq!(config.arrivals, Arrivals::Schedule(vec![1.0, 3.0, 5.0]));
    }

    #[test]
    fn negative_schedule_rejected() {
        let cfg = SourceConfig::schedule(vec![1.0, -2.0]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reset_clears_run_state_only() {
        let d = Delay::steps(Distribution::Constant(2.0));
        let mut cfg = ServerConfig::new(d);
        cfg.capacity = 3;
        let mut station = Station::server("press", cfg);
        if let StationRole::Server { state, .. } = &mut station.role {
            state.entered = 9;
            state.busy_time = 4.0;
        }
        station.reset();
        let (config, state) = station.as_server().unwrap();
        assert_eq!(config.capacity, 3);
        assert_eq!(state.entered, 0);
        assert_eq!(state.busy_time, 0.0);
    }

    #[test]
    fn reset_empties_combiner_queues() {
        let ids = entity_ids(2);
        let d = Delay::steps(Distribution::Constant(1.0));
        let mut station = Station::combiner("join", ServerConfig::new(d), 1);
        if let Some((_, state)) = station.role.machine_mut() {
            state.queue.push_back(ids[0]);
            state.members.push_back(ids[1]);
        }
        station.reset();
        assert_eq!(station.queue_len(), 0);
        assert!(matches!(station.role, StationRole::Combiner { batch_size: 1, .. }));
    }
}
