//! Model registry: every station of one run, bound by role.
//!
//! A [`Model`] replaces process-wide station lists. It owns the stations,
//! resolves names, keeps one [`ResetManager`] per role so reports and resets
//! walk stations in registration order, and validates routing before any
//! replication starts.

use std::collections::HashMap;

use crate::distribution::{Delay, DistributionError};
use crate::id::{ConnectionIndex, StationId};
use crate::reset::ResetManager;
use crate::routing::{Connection, RoutingError, RoutingRule};
use crate::station::{ServerConfig, SourceConfig, Station, StationKind};
use slotmap::SlotMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("duplicate station name: {0}")]
    DuplicateStation(String),
    #[error("unknown station: {0}")]
    UnknownStation(String),
    #[error("server '{0}' needs a capacity of at least 1")]
    ZeroCapacity(String),
    #[error("combiner '{0}' needs a batch size of at least 1")]
    ZeroBatch(String),
    #[error("sink '{0}' cannot have outgoing connections")]
    SinkCannotRoute(String),
    #[error("station '{station}': {source}")]
    Distribution {
        station: String,
        source: DistributionError,
    },
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    stations: SlotMap<StationId, Station>,
    by_name: HashMap<String, StationId>,
    sources: ResetManager<StationId>,
    servers: ResetManager<StationId>,
    combiners: ResetManager<StationId>,
    separators: ResetManager<StationId>,
    sinks: ResetManager<StationId>,
    validated: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        config: SourceConfig,
    ) -> Result<StationId, ModelError> {
        let name = name.into();
        config.validate().map_err(|source| ModelError::Distribution {
            station: name.clone(),
            source,
        })?;
        let id = self.insert(Station::source(name, config))?;
        self.sources.register(id);
        Ok(id)
    }

    pub fn add_server(
        &mut self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<StationId, ModelError> {
        let name = check_machine(name.into(), &config)?;
        let id = self.insert(Station::server(name, config))?;
        self.servers.register(id);
        Ok(id)
    }

    /// Add a combiner that attaches `batch_size` members to every parent.
    pub fn add_combiner(
        &mut self,
        name: impl Into<String>,
        config: ServerConfig,
        batch_size: u32,
    ) -> Result<StationId, ModelError> {
        let name = check_machine(name.into(), &config)?;
        if batch_size == 0 {
            return Err(ModelError::ZeroBatch(name));
        }
        let id = self.insert(Station::combiner(name, config, batch_size))?;
        self.combiners.register(id);
        Ok(id)
    }

    pub fn add_separator(
        &mut self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<StationId, ModelError> {
        let name = check_machine(name.into(), &config)?;
        let id = self.insert(Station::separator(name, config))?;
        self.separators.register(id);
        Ok(id)
    }

    pub fn add_sink(&mut self, name: impl Into<String>) -> Result<StationId, ModelError> {
        let id = self.insert(Station::sink(name))?;
        self.sinks.register(id);
        Ok(id)
    }

    fn insert(&mut self, station: Station) -> Result<StationId, ModelError> {
        if self.by_name.contains_key(&station.name) {
            return Err(ModelError::DuplicateStation(station.name));
        }
        let name = station.name.clone();
        let id = self.stations.insert(station);
        self.by_name.insert(name, id);
        self.validated = false;
        Ok(id)
    }

    /// Connect `origin` to `target`. The connection is named after the
    /// target.
    pub fn connect(
        &mut self,
        origin: StationId,
        target: StationId,
        probability: Option<f64>,
        travel: Option<Delay>,
    ) -> Result<ConnectionIndex, ModelError> {
        let target_station = self
            .stations
            .get(target)
            .ok_or_else(|| ModelError::UnknownStation(format!("{target:?}")))?;
        let target_kind = target_station.kind();
        let target_name = target_station.name.clone();

        let origin_station = self
            .stations
            .get_mut(origin)
            .ok_or_else(|| ModelError::UnknownStation(format!("{origin:?}")))?;
        if origin_station.kind() == StationKind::Sink {
            return Err(ModelError::SinkCannotRoute(origin_station.name.clone()));
        }
        if let Some(delay) = &travel {
            delay.validate().map_err(|source| ModelError::Distribution {
                station: origin_station.name.clone(),
                source,
            })?;
        }

        let connection = Connection {
            origin,
            target,
            name: target_name,
            probability,
            share: None,
            travel,
        };
        let idx = origin_station
            .routing
            .connect(&origin_station.name, target_kind, connection)?;
        self.validated = false;
        Ok(idx)
    }

    /// [`Model::connect`] by station names.
    pub fn connect_named(
        &mut self,
        origin: &str,
        target: &str,
        probability: Option<f64>,
        travel: Option<Delay>,
    ) -> Result<ConnectionIndex, ModelError> {
        let origin = self.require(origin)?;
        let target = self.require(target)?;
        self.connect(origin, target, probability, travel)
    }

    pub fn set_routing_rule(&mut self, station: StationId, rule: RoutingRule) -> Result<(), ModelError> {
        let st = self
            .stations
            .get_mut(station)
            .ok_or_else(|| ModelError::UnknownStation(format!("{station:?}")))?;
        st.routing.set_rule(rule);
        self.validated = false;
        Ok(())
    }

    /// Normalize probabilities and build the routing cache of every station
    /// that forwards entities. Fails on the first malformed station.
    pub fn validate(&mut self) -> Result<(), ModelError> {
        let routing = self
            .sources
            .members()
            .iter()
            .chain(self.servers.members())
            .chain(self.combiners.members())
            .chain(self.separators.members());
        for id in routing {
            let Some(station) = self.stations.get_mut(*id) else {
                continue;
            };
            station.routing.normalize(&station.name)?;
            station.routing.build_cache(&station.name)?;
            station.routing.validate_rule(&station.name)?;
        }
        self.validated = true;
        tracing::debug!(
            sources = self.sources.len(),
            servers = self.servers.len(),
            combiners = self.combiners.len(),
            separators = self.separators.len(),
            sinks = self.sinks.len(),
            "model validated"
        );
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Restore every station to its post-construction run state.
    pub fn reset_all(&mut self) -> usize {
        self.sources.reset_all(&mut self.stations)
            + self.servers.reset_all(&mut self.stations)
            + self.combiners.reset_all(&mut self.stations)
            + self.separators.reset_all(&mut self.stations)
            + self.sinks.reset_all(&mut self.stations)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn get_mut(&mut self, id: StationId) -> Option<&mut Station> {
        self.stations.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<StationId> {
        self.by_name.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<StationId, ModelError> {
        self.find(name)
            .ok_or_else(|| ModelError::UnknownStation(name.to_string()))
    }

    /// Sources in registration order.
    pub fn sources(&self) -> &[StationId] {
        self.sources.members()
    }

    /// Servers in registration order.
    pub fn servers(&self) -> &[StationId] {
        self.servers.members()
    }

    /// Combiners in registration order.
    pub fn combiners(&self) -> &[StationId] {
        self.combiners.members()
    }

    /// Separators in registration order.
    pub fn separators(&self) -> &[StationId] {
        self.separators.members()
    }

    /// Servers, combiners and separators, each group in registration order.
    pub fn machines(&self) -> impl Iterator<Item = StationId> + '_ {
        self.servers()
            .iter()
            .chain(self.combiners())
            .chain(self.separators())
            .copied()
    }

    /// Sinks in registration order.
    pub fn sinks(&self) -> &[StationId] {
        self.sinks.members()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

fn check_machine(name: String, config: &ServerConfig) -> Result<String, ModelError> {
    if config.capacity == 0 {
        return Err(ModelError::ZeroCapacity(name));
    }
    config.validate().map_err(|source| ModelError::Distribution {
        station: name.clone(),
        source,
    })?;
    Ok(name)
}
