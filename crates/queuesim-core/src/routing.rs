//! Outgoing connections and routing decisions.
//!
//! Every station that forwards entities (sources and servers) owns a
//! [`RoutingTable`]. Connections are kept in insertion order; that order
//! determines the layout of the cumulative-probability cache and therefore
//! which target a given uniform draw selects.
//!
//! # Lifecycle
//!
//! 1. [`RoutingTable::connect`] adds connections, probabilities optional.
//! 2. [`RoutingTable::normalize`] checks explicit probabilities and splits
//!    the remainder evenly over the unspecified ones.
//! 3. [`RoutingTable::build_cache`] derives strictly increasing cumulative
//!    thresholds ending at exactly 100.
//! 4. [`RoutingTable::decide`] picks a connection for one entity.

use std::collections::HashMap;

use crate::distribution::Delay;
use crate::id::{ConnectionIndex, StationId};
use crate::rng::SimRng;
use crate::station::StationKind;
use serde::{Deserialize, Serialize};

/// Tolerance when comparing a probability sum against 100.
const PROBABILITY_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("station '{origin}' cannot route to source '{target}'")]
    TargetIsSource { origin: String, target: String },
    #[error("station '{station}': probability {value} for '{connection}' is outside [0, 100]")]
    ProbabilityOutOfRange {
        station: String,
        connection: String,
        value: f64,
    },
    #[error("station '{station}': explicit probabilities sum to {total}, more than 100")]
    ProbabilityExceeded { station: String, total: f64 },
    #[error("station '{station}': probabilities sum to {total}, which does not round to 100")]
    ProbabilityMismatch { station: String, total: f64 },
    #[error("station '{station}': connection probabilities are not normalized")]
    NotNormalized { station: String },
    #[error("station '{station}': routing cache has not been built")]
    CacheNotBuilt { station: String },
    #[error("station '{station}': routing rule names unknown target '{target}'")]
    UnknownRuleTarget { station: String, target: String },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A directed edge from a routing station to a server or sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub origin: StationId,
    pub target: StationId,
    /// Defaults to the target station's name.
    pub name: String,
    /// Requested percentage in `[0, 100]`. `None` takes part of the
    /// remainder.
    pub probability: Option<f64>,
    /// Percentage assigned by the last normalization.
    pub share: Option<f64>,
    /// Sampled travel time; `None` delivers immediately.
    pub travel: Option<Delay>,
}

// ---------------------------------------------------------------------------
// Routing rules
// ---------------------------------------------------------------------------

/// Closed set of non-probabilistic routing behaviours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CustomRule {
    /// Send entities processed at least `max_times_processed` times to the
    /// connection named `target`; route everything else probabilistically.
    ReworkLimit {
        max_times_processed: u32,
        target: String,
    },
    /// Cycle through connections in insertion order.
    RoundRobin,
    /// Pick the target with the fewest entities waiting or in process;
    /// ties go to the earliest connection.
    ShortestQueue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum RoutingRule {
    #[default]
    Probabilistic,
    Custom(CustomRule),
}

// ---------------------------------------------------------------------------
// Routing table
// ---------------------------------------------------------------------------

/// Outgoing connections of one station plus the derived lookup cache.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    connections: Vec<Connection>,
    by_name: HashMap<String, ConnectionIndex>,
    /// `(cumulative threshold, connection)`, thresholds strictly increasing.
    cache: Vec<(f64, ConnectionIndex)>,
    rule: RoutingRule,
    cursor: usize,
    exited: u64,
    dropped: u64,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `target`.
    ///
    /// Fails if the target is a source. Connecting twice to the same name
    /// replaces the earlier connection in place, keeping its position.
    /// Any existing cache is invalidated.
    pub fn connect(
        &mut self,
        origin_name: &str,
        target_kind: StationKind,
        connection: Connection,
    ) -> Result<ConnectionIndex, RoutingError> {
        if target_kind == StationKind::Source {
            return Err(RoutingError::TargetIsSource {
                origin: origin_name.to_string(),
                target: connection.name,
            });
        }
        self.cache.clear();
        for conn in &mut self.connections {
            conn.share = None;
        }
        if let Some(&idx) = self.by_name.get(&connection.name) {
            self.connections[idx.index()] = connection;
            return Ok(idx);
        }
        let idx = ConnectionIndex(self.connections.len() as u32);
        self.by_name.insert(connection.name.clone(), idx);
        self.connections.push(connection);
        Ok(idx)
    }

    /// Validate requested probabilities and derive every connection's
    /// share, splitting the remainder evenly over the unspecified ones.
    ///
    /// Shares are always recomputed from the requested values, so adding a
    /// connection and normalizing again redistributes the remainder.
    pub fn normalize(&mut self, station: &str) -> Result<(), RoutingError> {
        let mut explicit = 0.0;
        let mut unspecified = 0usize;
        for conn in &self.connections {
            match conn.probability {
                Some(p) if !(0.0..=100.0).contains(&p) => {
                    return Err(RoutingError::ProbabilityOutOfRange {
                        station: station.to_string(),
                        connection: conn.name.clone(),
                        value: p,
                    });
                }
                Some(p) => explicit += p,
                None => unspecified += 1,
            }
        }
        if explicit > 100.0 + PROBABILITY_EPSILON {
            return Err(RoutingError::ProbabilityExceeded {
                station: station.to_string(),
                total: explicit,
            });
        }

        let remainder = if unspecified > 0 {
            ((100.0 - explicit) / unspecified as f64).max(0.0)
        } else {
            0.0
        };
        for conn in &mut self.connections {
            conn.share = Some(conn.probability.unwrap_or(remainder));
        }

        let total = self.probability_sum();
        if total.round() != 100.0 {
            return Err(RoutingError::ProbabilityMismatch {
                station: station.to_string(),
                total,
            });
        }
        self.cache.clear();
        Ok(())
    }

    /// Build the cumulative-probability cache from normalized connections.
    ///
    /// Connections that do not raise the running total get no entry, so
    /// thresholds are strictly increasing. The final threshold is pinned to
    /// exactly 100 to absorb rounding.
    pub fn build_cache(&mut self, station: &str) -> Result<(), RoutingError> {
        let mut cache = Vec::with_capacity(self.connections.len());
        let mut cumulative = 0.0;
        for (i, conn) in self.connections.iter().enumerate() {
            let p = conn.share.ok_or_else(|| RoutingError::NotNormalized {
                station: station.to_string(),
            })?;
            let next = cumulative + p;
            if next <= cumulative {
                continue;
            }
            cumulative = next;
            cache.push((cumulative, ConnectionIndex(i as u32)));
        }
        let Some((_, last)) = cache.pop() else {
            return Err(RoutingError::ProbabilityMismatch {
                station: station.to_string(),
                total: cumulative,
            });
        };
        while cache.last().is_some_and(|(threshold, _)| *threshold >= 100.0) {
            cache.pop();
        }
        cache.push((100.0, last));
        self.cache = cache;
        Ok(())
    }

    /// Check that a custom rule only names existing connections.
    pub fn validate_rule(&self, station: &str) -> Result<(), RoutingError> {
        if let RoutingRule::Custom(CustomRule::ReworkLimit { target, .. }) = &self.rule {
            if !self.by_name.contains_key(target) {
                return Err(RoutingError::UnknownRuleTarget {
                    station: station.to_string(),
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Choose the outgoing connection for one entity.
    ///
    /// `times_processed` feeds [`CustomRule::ReworkLimit`]; `load` reports
    /// how many entities occupy a target and feeds
    /// [`CustomRule::ShortestQueue`]. `Ok(None)` means no connection matched
    /// and the entity is dropped.
    pub fn decide(
        &mut self,
        station: &str,
        rng: &mut SimRng,
        times_processed: u32,
        load: impl Fn(StationId) -> usize,
    ) -> Result<Option<ConnectionIndex>, RoutingError> {
        if self.connections.is_empty() {
            return Ok(None);
        }
        match &self.rule {
            RoutingRule::Probabilistic => self.draw(station, rng),
            RoutingRule::Custom(CustomRule::ReworkLimit {
                max_times_processed,
                target,
            }) => {
                if times_processed >= *max_times_processed {
                    let idx = self.by_name.get(target).copied().ok_or_else(|| {
                        RoutingError::UnknownRuleTarget {
                            station: station.to_string(),
                            target: target.clone(),
                        }
                    })?;
                    Ok(Some(idx))
                } else {
                    self.draw(station, rng)
                }
            }
            RoutingRule::Custom(CustomRule::RoundRobin) => {
                let idx = self.cursor % self.connections.len();
                self.cursor = (idx + 1) % self.connections.len();
                Ok(Some(ConnectionIndex(idx as u32)))
            }
            RoutingRule::Custom(CustomRule::ShortestQueue) => Ok(self
                .connections
                .iter()
                .enumerate()
                .min_by_key(|(i, c)| (load(c.target), *i))
                .map(|(i, _)| ConnectionIndex(i as u32))),
        }
    }

    /// Uniform draw in `[0, 100)`; the lowest threshold at or above the
    /// draw wins.
    fn draw(&self, station: &str, rng: &mut SimRng) -> Result<Option<ConnectionIndex>, RoutingError> {
        if self.cache.is_empty() {
            return Err(RoutingError::CacheNotBuilt {
                station: station.to_string(),
            });
        }
        let decision = rng.uniform(0.0, 100.0);
        Ok(self
            .cache
            .iter()
            .find(|(threshold, _)| *threshold >= decision)
            .map(|&(_, idx)| idx))
    }

    pub fn record_exit(&mut self) {
        self.exited += 1;
    }

    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, idx: ConnectionIndex) -> Option<&Connection> {
        self.connections.get(idx.index())
    }

    pub fn find(&self, name: &str) -> Option<ConnectionIndex> {
        self.by_name.get(name).copied()
    }

    pub fn cache(&self) -> &[(f64, ConnectionIndex)] {
        &self.cache
    }

    pub fn is_cached(&self) -> bool {
        !self.cache.is_empty()
    }

    pub fn rule(&self) -> &RoutingRule {
        &self.rule
    }

    pub fn set_rule(&mut self, rule: RoutingRule) {
        self.rule = rule;
    }

    /// Sum of normalized shares; zero before normalization.
    pub fn probability_sum(&self) -> f64 {
        self.connections.iter().filter_map(|c| c.share).sum()
    }

    pub fn exited(&self) -> u64 {
        self.exited
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

impl crate::reset::Resettable for RoutingTable {
    /// Clears run counters. Connections, probabilities and the cache are
    /// model structure and survive.
    fn reset(&mut self) {
        self.cursor = 0;
        self.exited = 0;
        self.dropped = 0;
    }
}
