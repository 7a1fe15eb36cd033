//! Simulation context: one replication's clock, events and entities.
//!
//! A [`Simulation`] borrows a validated [`Model`] and owns everything else a
//! run touches: the entity tracker, the future event list, the random
//! stream and the clock. Nothing is shared between contexts, so separate
//! replications can run on separate threads.
//!
//! # Event handling
//!
//! - **Generate**: a source creates an entity, routes it, and schedules its
//!   next arrival.
//! - **Arrive**: a machine (server, combiner or separator) enqueues the
//!   entity and starts work if a unit is free; a sink finalizes it along
//!   with any batch it carries. Combiners queue members apart from parents.
//! - **Complete**: a machine releases a unit, routes the entity onward and
//!   pulls the next one from its queue. A combiner's entity leaves carrying
//!   its batch; a separator routes the batch members first, then the parent.
//!
//! Routing over a connection without a travel time delivers within the same
//! event; a travel time schedules an `Arrive`.

use crate::entity::{Entity, EntityTracker};
use crate::event::{Action, EventQueue};
use crate::id::{EntityId, StationId};
use crate::model::{Model, ModelError};
use crate::report::{ReportKind, StatTable, metric};
use crate::rng::SimRng;
use crate::routing::{CustomRule, RoutingError, RoutingRule};
use crate::station::{Arrivals, ServerConfig, ServerState, StationKind, StationRole};
use crate::tally::TallyStatistic;
use crate::time::{SimTime, TimeBase, f64_to_time, time_to_f64};

// ---------------------------------------------------------------------------
// Errors and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("invalid run parameters: {0}")]
    InvalidSpec(String),
    #[error("event refers to unknown station {0:?}")]
    UnknownStation(StationId),
    #[error("event refers to unknown entity {0:?}")]
    UnknownEntity(EntityId),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Run-wide settings of one simulation context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub time_base: TimeBase,
    /// Statistics only count activity at or after this time.
    pub warm_up: SimTime,
    /// Stop after this many events even if time remains.
    pub max_events: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            time_base: TimeBase::default(),
            warm_up: SimTime::ZERO,
            max_events: None,
        }
    }
}

/// Why [`Simulation::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StopReason {
    /// The next event lies at or beyond the end time.
    TimeReached,
    /// No events remain.
    QueueEmpty,
    /// The event budget ran out.
    EventBudget,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

pub struct Simulation<'m> {
    model: &'m mut Model,
    entities: EntityTracker,
    queue: EventQueue,
    rng: SimRng,
    now: SimTime,
    config: SimConfig,
    events_processed: u64,
    started: bool,
}

impl<'m> Simulation<'m> {
    /// Prepare a fresh run over `model`.
    ///
    /// Validates the model if needed and resets every station, so a model
    /// can be reused across replications.
    pub fn new(model: &'m mut Model, seed: u64, config: SimConfig) -> Result<Self, SimError> {
        if !model.is_validated() {
            model.validate()?;
        }
        model.reset_all();
        Ok(Self {
            model,
            entities: EntityTracker::new(),
            queue: EventQueue::new(),
            rng: SimRng::new(seed),
            now: SimTime::ZERO,
            config,
            events_processed: 0,
            started: false,
        })
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    pub fn entities(&self) -> &EntityTracker {
        &self.entities
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    fn counting(&self) -> bool {
        self.now >= self.config.warm_up
    }

    /// Schedule first arrivals and arm breakdown countdowns.
    fn start(&mut self) -> Result<(), SimError> {
        let sources = self.model.sources().to_vec();
        for source in sources {
            let station = self
                .model
                .get(source)
                .ok_or(SimError::UnknownStation(source))?;
            let StationRole::Source { config, .. } = &station.role else {
                continue;
            };
            if config.max_arrivals == Some(0) {
                continue;
            }
            let first = match &config.arrivals {
                Arrivals::Interval(_) => Some(SimTime::ZERO),
                Arrivals::Schedule(times) => times.first().map(|t| f64_to_time(*t)),
            };
            if let Some(at) = first {
                self.queue.schedule(at, Action::Generate { source });
            }
        }

        let machines: Vec<StationId> = self.model.machines().collect();
        for machine in machines {
            let station = self
                .model
                .get_mut(machine)
                .ok_or(SimError::UnknownStation(machine))?;
            if let Some((config, state)) = station.role.machine_mut() {
                if let Some(b) = &config.breakdown {
                    state.until_breakdown =
                        Some(b.time_between.sample_steps(&mut self.rng, self.config.time_base));
                }
            }
        }
        tracing::debug!(events = self.queue.len(), "simulation started");
        Ok(())
    }

    /// Process events strictly before `until`, then advance the clock to
    /// `until`. Entities still in flight stay uncounted by sinks.
    pub fn run_until(&mut self, until: SimTime) -> Result<StopReason, SimError> {
        if !self.started {
            self.start()?;
            self.started = true;
        }
        loop {
            match self.queue.peek_time() {
                None => {
                    self.advance_to(until);
                    return Ok(StopReason::QueueEmpty);
                }
                Some(t) if t >= until => {
                    self.advance_to(until);
                    return Ok(StopReason::TimeReached);
                }
                Some(_) => {}
            }
            if let Some(max) = self.config.max_events {
                if self.events_processed >= max {
                    self.close_observations();
                    return Ok(StopReason::EventBudget);
                }
            }
            self.step()?;
        }
    }

    /// Run the next event. Returns `false` if none is pending.
    pub fn step(&mut self) -> Result<bool, SimError> {
        if !self.started {
            self.start()?;
            self.started = true;
        }
        let Some((key, action)) = self.queue.pop() else {
            return Ok(false);
        };
        self.now = self.now.max(key.time);
        self.events_processed += 1;
        match action {
            Action::Generate { source } => self.generate(source)?,
            Action::Arrive { station, entity } => self.arrive(station, entity)?,
            Action::Complete {
                server,
                entity,
                work,
                downtime,
            } => self.complete(server, entity, work, downtime)?,
        }
        Ok(true)
    }

    fn advance_to(&mut self, until: SimTime) {
        if until > self.now {
            self.now = until;
        }
        self.close_observations();
    }

    /// Bring time-weighted machine statistics up to the current clock,
    /// including work still in progress.
    fn close_observations(&mut self) {
        let (now, warm_up) = (self.now, self.config.warm_up);
        let machines: Vec<StationId> = self.model.machines().collect();
        for machine in machines {
            if let Some((_, state)) = self
                .model
                .get_mut(machine)
                .and_then(|s| s.role.machine_mut())
            {
                state.observe(now, warm_up);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn generate(&mut self, source: StationId) -> Result<(), SimError> {
        let now = self.now;
        let counting = self.counting();
        let station = self
            .model
            .get_mut(source)
            .ok_or(SimError::UnknownStation(source))?;
        let StationRole::Source { config, state } = &mut station.role else {
            return Ok(());
        };
        state.generated += 1;
        if counting {
            state.created += 1;
        }
        let name = format!("{}_Entity_{}", station.name, state.generated - 1);
        let role = config.emits;

        let exhausted = config.max_arrivals.is_some_and(|max| state.generated >= max);
        let next = if exhausted {
            None
        } else {
            match &config.arrivals {
                Arrivals::Interval(delay) => {
                    let gap = delay.sample_time(&mut self.rng, self.config.time_base);
                    Some(now.saturating_add(gap))
                }
                Arrivals::Schedule(times) => times
                    .get(state.generated as usize)
                    .map(|t| f64_to_time(*t).max(now)),
            }
        };

        let entity = self.entities.create(Entity::new(name, now).with_role(role));
        tracing::trace!(source = %station.name, ?entity, time = %now, "entity created");

        self.route(source, entity)?;
        if let Some(at) = next {
            self.queue.schedule(at, Action::Generate { source });
        }
        Ok(())
    }

    fn arrive(&mut self, target: StationId, entity: EntityId) -> Result<(), SimError> {
        let now = self.now;
        let warm_up = self.config.warm_up;
        let counting = self.counting();
        let is_parent = self
            .entities
            .get(entity)
            .ok_or(SimError::UnknownEntity(entity))?
            .is_parent();
        let station = self
            .model
            .get_mut(target)
            .ok_or(SimError::UnknownStation(target))?;
        match &mut station.role {
            StationRole::Combiner { state, .. } if !is_parent => {
                state.observe(now, warm_up);
                if counting {
                    state.entered_members += 1;
                }
                state.members.push_back(entity);
                tracing::trace!(combiner = %station.name, ?entity, time = %now, "member queued");
                self.try_start(target)
            }
            StationRole::Server { state, .. }
            | StationRole::Combiner { state, .. }
            | StationRole::Separator { state, .. } => {
                state.observe(now, warm_up);
                if counting {
                    state.entered += 1;
                }
                state.queue.push_back(entity);
                tracing::trace!(station = %station.name, ?entity, time = %now, "entity queued");
                self.try_start(target)
            }
            StationRole::Sink { state } => {
                let batch = self
                    .entities
                    .get_mut(entity)
                    .map(|e| std::mem::take(&mut e.batch))
                    .unwrap_or_default();
                let retired = self
                    .entities
                    .retire(entity, now)
                    .ok_or(SimError::UnknownEntity(entity))?;
                if counting {
                    state.entered += 1;
                    state
                        .time_in_system
                        .record(retired.time_in_system().unwrap_or(0.0));
                    state.times_processed.record(retired.times_processed as f64);
                }
                for member in batch {
                    self.entities.retire_with_batch(member, now);
                }
                tracing::trace!(sink = %station.name, ?entity, time = %now, "entity destroyed");
                Ok(())
            }
            StationRole::Source { .. } => {
                tracing::warn!(source = %station.name, ?entity, "entity delivered to a source, ignored");
                Ok(())
            }
        }
    }

    /// Start work on queued entities while the machine has free units.
    /// A combiner starts only once a parent and a full batch of members
    /// are waiting.
    fn try_start(&mut self, machine: StationId) -> Result<(), SimError> {
        let now = self.now;
        let warm_up = self.config.warm_up;
        let base = self.config.time_base;
        loop {
            let station = self
                .model
                .get_mut(machine)
                .ok_or(SimError::UnknownStation(machine))?;
            let batch_size = match &station.role {
                StationRole::Combiner { batch_size, .. } => Some(*batch_size),
                _ => None,
            };
            let Some((config, state)) = station.role.machine_mut() else {
                return Ok(());
            };
            if state.in_process >= config.capacity {
                return Ok(());
            }
            state.observe(now, warm_up);
            let next = match batch_size {
                Some(size) => state.pop_batch(config.discipline, size),
                None => state.pop(config.discipline).map(|e| (e, Vec::new())),
            };
            let Some((entity, members)) = next else {
                return Ok(());
            };
            state.in_process += 1;

            let work = config.processing.sample_steps(&mut self.rng, base);
            let mut downtime = 0.0;
            if let (Some(breakdown), Some(remaining)) =
                (&config.breakdown, state.until_breakdown.as_mut())
            {
                if work > *remaining {
                    downtime = breakdown.duration.sample_steps(&mut self.rng, base);
                    *remaining = breakdown.time_between.sample_steps(&mut self.rng, base);
                    tracing::trace!(station = %station.name, downtime, "machine breakdown");
                } else {
                    *remaining -= work;
                }
            }

            let done = now.saturating_add(f64_to_time(work + downtime));
            tracing::trace!(station = %station.name, ?entity, members = members.len(), work, "processing started");
            if !members.is_empty() {
                self.entities
                    .get_mut(entity)
                    .ok_or(SimError::UnknownEntity(entity))?
                    .batch
                    .extend(members);
            }
            self.queue.schedule(
                done,
                Action::Complete {
                    server: machine,
                    entity,
                    work,
                    downtime,
                },
            );
        }
    }

    fn complete(
        &mut self,
        machine: StationId,
        entity: EntityId,
        work: f64,
        downtime: f64,
    ) -> Result<(), SimError> {
        let now = self.now;
        let warm_up = self.config.warm_up;
        let counting = self.counting();
        let kind = self
            .model
            .get(machine)
            .ok_or(SimError::UnknownStation(machine))?
            .kind();

        let record = self
            .entities
            .get_mut(entity)
            .ok_or(SimError::UnknownEntity(entity))?;
        record.record_processing(machine, kind);
        let members = record.batch.len() as u64;
        let released = if kind == StationKind::Separator {
            std::mem::take(&mut record.batch)
        } else {
            Vec::new()
        };

        let station = self
            .model
            .get_mut(machine)
            .ok_or(SimError::UnknownStation(machine))?;
        if let Some((_, state)) = station.role.machine_mut() {
            state.observe(now, warm_up);
            state.in_process = state.in_process.saturating_sub(1);
            if counting {
                state.exited += 1;
                if kind != StationKind::Server {
                    state.exited_members += members;
                }
                state.processing_time.record(work);
                if downtime > 0.0 {
                    state.downtimes += 1;
                    state.total_downtime += downtime;
                }
            }
        }
        tracing::trace!(station = %station.name, ?entity, time = %now, "processing done");

        for member in released {
            self.route(machine, member)?;
        }
        self.route(machine, entity)?;
        self.try_start(machine)
    }

    /// Hand `entity` from `from` to one of its connections.
    fn route(&mut self, from: StationId, entity: EntityId) -> Result<(), SimError> {
        let times_processed = self
            .entities
            .get(entity)
            .ok_or(SimError::UnknownEntity(entity))?
            .times_processed;
        let counting = self.counting();

        let station = self.model.get(from).ok_or(SimError::UnknownStation(from))?;
        let loads: Vec<(StationId, usize)> = match station.routing.rule() {
            RoutingRule::Custom(CustomRule::ShortestQueue) => station
                .routing
                .connections()
                .iter()
                .map(|c| (c.target, self.model.get(c.target).map_or(0, |s| s.load())))
                .collect(),
            _ => Vec::new(),
        };

        let station = self
            .model
            .get_mut(from)
            .ok_or(SimError::UnknownStation(from))?;
        let decision = station.routing.decide(
            &station.name,
            &mut self.rng,
            times_processed,
            |target| {
                loads
                    .iter()
                    .find(|(id, _)| *id == target)
                    .map_or(0, |(_, load)| *load)
            },
        )?;
        let Some(idx) = decision else {
            station.routing.record_drop();
            tracing::warn!(station = %station.name, ?entity, "no routing match, entity dropped");
            return Ok(());
        };
        let (target, travel) = match station.routing.connection(idx) {
            Some(conn) => (conn.target, conn.travel.clone()),
            None => return Ok(()),
        };
        if counting {
            station.routing.record_exit();
        }
        tracing::trace!(from = %station.name, ?entity, connection = idx.0, "entity routed");

        match travel {
            Some(delay) => {
                let at = self
                    .now
                    .saturating_add(delay.sample_time(&mut self.rng, self.config.time_base));
                self.queue.schedule(at, Action::Arrive { station: target, entity });
                Ok(())
            }
            None => self.arrive(target, entity),
        }
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Read every station into a flat statistics table.
    pub fn report(&self) -> StatTable {
        let mut table = StatTable::new();
        let warm_up = self.config.warm_up;
        let observed = (time_to_f64(self.now) - time_to_f64(warm_up)).max(0.0);

        // Entities finalized before warm-up are excluded; in-flight ones count.
        let mut times = TallyStatistic::new();
        let mut destroyed = 0u64;
        for e in self.entities.retired() {
            if e.destroyed_at.is_some_and(|d| d >= warm_up) {
                destroyed += 1;
                if let Some(t) = e.time_in_system() {
                    times.record(t);
                }
            }
        }
        let in_system = self.entities.live_count() as u64;
        let entity = ReportKind::Entity;
        table.insert_count(entity, "Entity", metric::NUMBER_CREATED, destroyed + in_system);
        table.insert_count(entity, "Entity", metric::NUMBER_DESTROYED, destroyed);
        table.insert_count(entity, "Entity", metric::NUMBER_IN_SYSTEM, in_system);
        table.insert(entity, "Entity", metric::AVG_TIME_IN_SYSTEM, times.average());
        table.insert(entity, "Entity", metric::MAX_TIME_IN_SYSTEM, times.max());
        table.insert(entity, "Entity", metric::MIN_TIME_IN_SYSTEM, times.min());

        for station in self.model.sources().iter().filter_map(|id| self.model.get(*id)) {
            if let StationRole::Source { state, .. } = &station.role {
                let kind = ReportKind::Source;
                table.insert_count(kind, &station.name, metric::NUMBER_CREATED, state.created);
                table.insert_count(kind, &station.name, metric::NUMBER_EXITED, station.routing.exited());
            }
        }

        for station in self.model.machines().filter_map(|id| self.model.get(id)) {
            let name = station.name.as_str();
            match &station.role {
                StationRole::Server { config, state } => {
                    let kind = ReportKind::Server;
                    report_machine(&mut table, kind, name, config, state, observed);
                    table.insert_count(kind, name, metric::NUMBER_ENTERED, state.entered);
                    table.insert_count(kind, name, metric::NUMBER_EXITED, state.exited);
                }
                StationRole::Combiner { config, state, .. } => {
                    let kind = ReportKind::Combiner;
                    report_machine(&mut table, kind, name, config, state, observed);
                    table.insert_count(kind, name, metric::NUMBER_ENTERED_PARENT, state.entered);
                    table.insert_count(kind, name, metric::NUMBER_ENTERED_MEMBER, state.entered_members);
                    table.insert_count(kind, name, metric::NUMBER_EXITED_PARENT, state.exited);
                    table.insert_count(kind, name, metric::NUMBER_EXITED_MEMBER, state.exited_members);
                }
                StationRole::Separator { config, state } => {
                    let kind = ReportKind::Separator;
                    report_machine(&mut table, kind, name, config, state, observed);
                    table.insert_count(kind, name, metric::NUMBER_ENTERED, state.entered);
                    table.insert_count(kind, name, metric::NUMBER_EXITED_PARENT, state.exited);
                    table.insert_count(kind, name, metric::NUMBER_EXITED_MEMBER, state.exited_members);
                }
                StationRole::Source { .. } | StationRole::Sink { .. } => {}
            }
        }

        for station in self.model.sinks().iter().filter_map(|id| self.model.get(*id)) {
            if let StationRole::Sink { state } = &station.role {
                let kind = ReportKind::Sink;
                let name = station.name.as_str();
                let tis = &state.time_in_system;
                let processed = &state.times_processed;
                table.insert(kind, name, metric::AVG_TIME_IN_SYSTEM, tis.average());
                table.insert(kind, name, metric::MAX_TIME_IN_SYSTEM, tis.max());
                table.insert(kind, name, metric::MIN_TIME_IN_SYSTEM, tis.min());
                table.insert_count(kind, name, metric::NUMBER_ENTERED, state.entered);
                table.insert(kind, name, metric::NUM_TIMES_PROCESSED_AVG, processed.average());
                table.insert(kind, name, metric::NUM_TIMES_PROCESSED_MAX, processed.max());
                table.insert(kind, name, metric::NUM_TIMES_PROCESSED_MIN, processed.min());
            }
        }
        table
    }
}

/// Rows every machine reports: utilization, processing, downtime and queue.
fn report_machine(
    table: &mut StatTable,
    kind: ReportKind,
    name: &str,
    config: &ServerConfig,
    state: &ServerState,
    observed: f64,
) {
    let capacity = config.capacity.max(1) as f64;
    let utilization = (observed > 0.0).then(|| state.busy_time / (capacity * observed) * 100.0);
    table.insert(kind, name, metric::SCHEDULED_UTILIZATION, utilization);
    table.insert(kind, name, metric::UNITS_UTILIZED, Some(state.busy_time));
    table.insert(kind, name, metric::AVG_TIME_PROCESSING, state.processing_time.average());
    table.insert(kind, name, metric::TOTAL_TIME_PROCESSING, Some(state.processing_time.sum()));
    table.insert_count(kind, name, metric::NUMBER_DOWNTIMES, state.downtimes);
    table.insert(kind, name, metric::TOTAL_DOWNTIME, Some(state.total_downtime));
    table.insert(kind, name, metric::AVG_QUEUE_LENGTH, state.average_queue(observed));
    table.insert_count(kind, name, metric::MAX_QUEUE_LENGTH, state.max_queue() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{Delay, Distribution};
    use crate::entity::EntityRole;
    use crate::station::{Breakdown, QueueDiscipline, SourceConfig};

    fn constant(v: f64) -> Delay {
        Delay::steps(Distribution::Constant(v))
    }

    fn t(v: f64) -> SimTime {
        SimTime::from_num(v)
    }

    /// Source every 10 steps, server taking 4 steps, one sink.
    fn line(processing: f64) -> Model {
        let mut m = Model::new();
        let src = m.add_source("Src", SourceConfig::interval(constant(10.0))).unwrap();
        let srv = m.add_server("Srv", ServerConfig::new(constant(processing))).unwrap();
        let sink = m.add_sink("Out").unwrap();
        m.connect(src, srv, None, None).unwrap();
        m.connect(srv, sink, None, None).unwrap();
        m
    }

    #[test]
    fn deterministic_line_counts() {
        let mut m = line(4.0);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        let stop = sim.run_until(t(100.0)).unwrap();
        assert_eq!(stop, StopReason::TimeReached);
        assert_eq!(sim.now(), t(100.0));

        let r = sim.report();
        // Arrivals at 0, 10, ..., 90.
        assert_eq!(r.value(ReportKind::Source, "Src", metric::NUMBER_CREATED), Some(10.0));
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::NUMBER_ENTERED), Some(10.0));
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::AVG_TIME_IN_SYSTEM), Some(4.0));
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::SCHEDULED_UTILIZATION), Some(40.0));
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::AVG_QUEUE_LENGTH), Some(0.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_IN_SYSTEM), Some(0.0));
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::NUM_TIMES_PROCESSED_AVG), Some(1.0));
    }

    #[test]
    fn in_flight_entities_not_counted_by_sink() {
        let mut m = line(4.0);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(92.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::NUMBER_ENTERED), Some(9.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_IN_SYSTEM), Some(1.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_CREATED), Some(10.0));
    }

    #[test]
    fn queue_builds_when_server_is_slow() {
        let mut m = line(15.0);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let r = sim.report();
        assert!(r.value(ReportKind::Server, "Srv", metric::MAX_QUEUE_LENGTH).unwrap() >= 1.0);
        assert!(r.value(ReportKind::Server, "Srv", metric::AVG_QUEUE_LENGTH).unwrap() > 0.0);
        let util = r.value(ReportKind::Server, "Srv", metric::SCHEDULED_UTILIZATION).unwrap();
        assert!(util <= 100.0 + 1e-9, "utilization {util}");
    }

    #[test]
    fn capacity_allows_parallel_work() {
        let mut m = line(15.0);
        let srv = m.find("Srv").unwrap();
        if let Some(StationRole::Server { config, .. }) = m.get_mut(srv).map(|s| &mut s.role) {
            config.capacity = 2;
        }
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::MAX_QUEUE_LENGTH), Some(0.0));
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::AVG_TIME_IN_SYSTEM), Some(15.0));
    }

    #[test]
    fn lifo_serves_latest_arrival_first() {
        let mut m = Model::new();
        let src = m
            .add_source(
                "Burst",
                SourceConfig::schedule(vec![0.0, 1.0, 2.0]),
            )
            .unwrap();
        let mut cfg = ServerConfig::new(constant(10.0));
        cfg.discipline = QueueDiscipline::Lifo;
        let srv = m.add_server("Stack", cfg).unwrap();
        let sink = m.add_sink("Out").unwrap();
        m.connect(src, srv, None, None).unwrap();
        m.connect(srv, sink, None, None).unwrap();

        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let order: Vec<&str> = sim.entities().retired().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["Burst_Entity_0", "Burst_Entity_2", "Burst_Entity_1"]);
    }

    #[test]
    fn work_in_progress_counts_toward_utilization() {
        // One entity occupies the server for the whole window.
        let mut m = line(200.0);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::NUMBER_EXITED), Some(0.0));
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::SCHEDULED_UTILIZATION), Some(100.0));
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::UNITS_UTILIZED), Some(100.0));
    }

    #[test]
    fn max_arrivals_caps_generation() {
        let mut m = line(1.0);
        let src = m.find("Src").unwrap();
        if let Some(StationRole::Source { config, .. }) = m.get_mut(src).map(|s| &mut s.role) {
            config.max_arrivals = Some(3);
        }
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        let stop = sim.run_until(t(1_000.0)).unwrap();
        assert_eq!(stop, StopReason::QueueEmpty);
        assert_eq!(sim.entities().created_count(), 3);
    }

    #[test]
    fn warm_up_excludes_early_activity() {
        let mut m = line(4.0);
        let config = SimConfig {
            warm_up: t(50.0),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&mut m, 1, config).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let r = sim.report();
        // Arrivals at 50..=90 count.
        assert_eq!(r.value(ReportKind::Source, "Src", metric::NUMBER_CREATED), Some(5.0));
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::NUMBER_ENTERED), Some(5.0));
        assert_eq!(r.value(ReportKind::Server, "Srv", metric::SCHEDULED_UTILIZATION), Some(40.0));
    }

    #[test]
    fn breakdowns_add_downtime() {
        let mut m = line(4.0);
        let srv = m.find("Srv").unwrap();
        if let Some(StationRole::Server { config, .. }) = m.get_mut(srv).map(|s| &mut s.role) {
            config.breakdown = Some(Breakdown {
                time_between: constant(6.0),
                duration: constant(3.0),
            });
        }
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(100.0)).unwrap();
        let r = sim.report();
        assert!(r.value(ReportKind::Server, "Srv", metric::NUMBER_DOWNTIMES).unwrap() >= 1.0);
        assert!(r.value(ReportKind::Server, "Srv", metric::TOTAL_DOWNTIME).unwrap() >= 3.0);
        assert!(r.value(ReportKind::Sink, "Out", metric::MAX_TIME_IN_SYSTEM).unwrap() >= 7.0);
    }

    #[test]
    fn travel_time_delays_arrival() {
        let mut m = Model::new();
        let src = m.add_source("Src", SourceConfig::interval(constant(10.0))).unwrap();
        let sink = m.add_sink("Out").unwrap();
        m.connect(src, sink, None, Some(constant(2.5))).unwrap();
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(50.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Sink, "Out", metric::MIN_TIME_IN_SYSTEM), Some(2.5));
    }

    #[test]
    fn event_budget_stops_early() {
        let mut m = line(4.0);
        let config = SimConfig {
            max_events: Some(5),
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(&mut m, 1, config).unwrap();
        assert_eq!(sim.run_until(t(1_000.0)).unwrap(), StopReason::EventBudget);
        assert_eq!(sim.events_processed(), 5);
    }

    #[test]
    fn empty_sink_reports_no_data() {
        let mut m = line(4.0);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(1.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.get(ReportKind::Sink, "Out", metric::MIN_TIME_IN_SYSTEM), Some(None));
    }

    #[test]
    fn same_seed_same_report() {
        let build = || {
            let mut m = Model::new();
            let src = m
                .add_source(
                    "Src",
                    SourceConfig::interval(Delay::steps(Distribution::Exponential { mean: 6.0 })),
                )
                .unwrap();
            let srv = m
                .add_server(
                    "Srv",
                    ServerConfig::new(Delay::steps(Distribution::Uniform { min: 2.0, max: 4.0 })),
                )
                .unwrap();
            let a = m.add_sink("A").unwrap();
            let b = m.add_sink("B").unwrap();
            m.connect(src, srv, None, None).unwrap();
            m.connect(srv, a, Some(70.0), None).unwrap();
            m.connect(srv, b, None, None).unwrap();
            m
        };
        let mut m1 = build();
        let mut m2 = build();
        let mut s1 = Simulation::new(&mut m1, 42, SimConfig::default()).unwrap();
        let mut s2 = Simulation::new(&mut m2, 42, SimConfig::default()).unwrap();
        s1.run_until(t(500.0)).unwrap();
        s2.run_until(t(500.0)).unwrap();
        assert_eq!(s1.report(), s2.report());
    }

    /// One box and three parts at time zero, packed then unpacked.
    fn packing(batch_size: u32, to_sink: bool) -> Model {
        let mut m = Model::new();
        let boxes = m.add_source("Boxes", SourceConfig::schedule(vec![0.0])).unwrap();
        let mut parts = SourceConfig::schedule(vec![0.0, 0.0, 0.0]);
        parts.emits = EntityRole::Member;
        let parts = m.add_source("Parts", parts).unwrap();
        let pack = m.add_combiner("Pack", ServerConfig::new(constant(1.0)), batch_size).unwrap();
        let out = m.add_sink("Shipped").unwrap();
        m.connect(boxes, pack, None, None).unwrap();
        m.connect(parts, pack, None, None).unwrap();
        if to_sink {
            m.connect(pack, out, None, None).unwrap();
        } else {
            let unpack = m.add_separator("Unpack", ServerConfig::new(constant(1.0))).unwrap();
            m.connect(pack, unpack, None, None).unwrap();
            m.connect(unpack, out, None, None).unwrap();
        }
        m
    }

    #[test]
    fn combiner_batches_and_separator_releases() {
        let mut m = packing(3, false);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(10.0)).unwrap();
        let r = sim.report();

        let pack = |metric| r.value(ReportKind::Combiner, "Pack", metric);
        assert_eq!(pack(metric::NUMBER_ENTERED_PARENT), Some(1.0));
        assert_eq!(pack(metric::NUMBER_ENTERED_MEMBER), Some(3.0));
        assert_eq!(pack(metric::NUMBER_EXITED_PARENT), Some(1.0));
        assert_eq!(pack(metric::NUMBER_EXITED_MEMBER), Some(3.0));
        let unpack = |metric| r.value(ReportKind::Separator, "Unpack", metric);
        assert_eq!(unpack(metric::NUMBER_ENTERED), Some(1.0));
        assert_eq!(unpack(metric::NUMBER_EXITED_PARENT), Some(1.0));
        assert_eq!(unpack(metric::NUMBER_EXITED_MEMBER), Some(3.0));

        // Members leave the separator ahead of their parent.
        let order: Vec<&str> = sim.entities().retired().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["Parts_Entity_0", "Parts_Entity_1", "Parts_Entity_2", "Boxes_Entity_0"]
        );
        let parent = &sim.entities().retired()[3];
        assert_eq!(parent.times_processed, 2);
        assert_eq!(parent.combiner_history.len(), 1);
        assert_eq!(parent.separator_history.len(), 1);
        assert!(parent.batch.is_empty());

        assert_eq!(r.value(ReportKind::Sink, "Shipped", metric::NUMBER_ENTERED), Some(4.0));
        assert_eq!(r.value(ReportKind::Sink, "Shipped", metric::AVG_TIME_IN_SYSTEM), Some(2.0));
        assert_eq!(r.value(ReportKind::Sink, "Shipped", metric::NUM_TIMES_PROCESSED_MAX), Some(2.0));
        assert_eq!(r.value(ReportKind::Sink, "Shipped", metric::NUM_TIMES_PROCESSED_MIN), Some(0.0));
    }

    #[test]
    fn combiner_waits_for_a_full_batch() {
        let mut m = packing(4, false);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(10.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Combiner, "Pack", metric::NUMBER_EXITED_PARENT), Some(0.0));
        assert_eq!(r.value(ReportKind::Combiner, "Pack", metric::MAX_QUEUE_LENGTH), Some(4.0));
        assert_eq!(r.value(ReportKind::Combiner, "Pack", metric::SCHEDULED_UTILIZATION), Some(0.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_IN_SYSTEM), Some(4.0));
    }

    #[test]
    fn sink_retires_a_batch_with_its_parent() {
        let mut m = packing(3, true);
        let mut sim = Simulation::new(&mut m, 1, SimConfig::default()).unwrap();
        sim.run_until(t(10.0)).unwrap();
        let r = sim.report();
        assert_eq!(r.value(ReportKind::Sink, "Shipped", metric::NUMBER_ENTERED), Some(1.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_DESTROYED), Some(4.0));
        assert_eq!(r.value(ReportKind::Entity, "Entity", metric::NUMBER_IN_SYSTEM), Some(0.0));
        assert_eq!(sim.entities().live_count(), 0);
    }

    #[test]
    fn model_reused_after_reset() {
        let mut m = line(4.0);
        let first = {
            let mut sim = Simulation::new(&mut m, 7, SimConfig::default()).unwrap();
            sim.run_until(t(100.0)).unwrap();
            sim.report()
        };
        let second = {
            let mut sim = Simulation::new(&mut m, 7, SimConfig::default()).unwrap();
            sim.run_until(t(100.0)).unwrap();
            sim.report()
        };
        assert_eq!(first, second);
    }
}
