//! Entities and the per-replication entity tracker.
//!
//! An entity is created by a source, owned by exactly one station at a time
//! while it moves through the network, and retired when a sink finalizes it.
//! The tracker belongs to a single simulation context; nothing about it is
//! process-wide.

use crate::id::{EntityId, StationId};
use crate::station::StationKind;
use crate::time::{SimTime, time_to_f64};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Which combiner queue an entity joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRole {
    /// Carries a batch through a combiner.
    #[default]
    Parent,
    /// Joins a parent's batch at a combiner.
    Member,
}

/// A token flowing through the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub created_at: SimTime,
    pub destroyed_at: Option<SimTime>,
    pub role: EntityRole,
    /// Members attached by a combiner, released by a separator.
    pub batch: Vec<EntityId>,
    /// Servers that finished processing this entity, in order.
    pub server_history: Vec<StationId>,
    pub combiner_history: Vec<StationId>,
    pub separator_history: Vec<StationId>,
    /// How many times any processing station has finished this entity.
    pub times_processed: u32,
}

impl Entity {
    pub fn new(name: impl Into<String>, created_at: SimTime) -> Self {
        Self {
            name: name.into(),
            created_at,
            destroyed_at: None,
            role: EntityRole::Parent,
            batch: Vec::new(),
            server_history: Vec::new(),
            combiner_history: Vec::new(),
            separator_history: Vec::new(),
            times_processed: 0,
        }
    }

    pub fn with_role(mut self, role: EntityRole) -> Self {
        self.role = role;
        self
    }

    pub fn is_parent(&self) -> bool {
        self.role == EntityRole::Parent
    }

    /// Whether the entity has not reached a sink yet.
    pub fn in_flight(&self) -> bool {
        self.destroyed_at.is_none()
    }

    /// Time spent in the system, if the entity has been destroyed.
    pub fn time_in_system(&self) -> Option<f64> {
        self.destroyed_at
            .map(|d| time_to_f64(d) - time_to_f64(self.created_at))
    }

    /// Record a completed processing step at `station`. Sources and sinks
    /// do not process and leave the history untouched.
    pub fn record_processing(&mut self, station: StationId, kind: StationKind) {
        let history = match kind {
            StationKind::Server => &mut self.server_history,
            StationKind::Combiner => &mut self.combiner_history,
            StationKind::Separator => &mut self.separator_history,
            StationKind::Source | StationKind::Sink => return,
        };
        history.push(station);
        self.times_processed += 1;
    }
}

/// Owns every entity of one replication.
///
/// Live entities sit in a slot map keyed by [`EntityId`]; finalized entities
/// move to an append-only retired list so their history stays queryable.
#[derive(Debug, Default)]
pub struct EntityTracker {
    live: SlotMap<EntityId, Entity>,
    retired: Vec<Entity>,
    created: u64,
}

impl EntityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new entity.
    pub fn create(&mut self, entity: Entity) -> EntityId {
        self.created += 1;
        self.live.insert(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.live.get(id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.live.get_mut(id)
    }

    /// Finalize an entity: stamp its destruction time and move it out of
    /// the live set. Returns the retired entity.
    ///
    /// A destruction time earlier than the creation time is clamped to the
    /// creation time, so `destroyed_at >= created_at` always holds.
    pub fn retire(&mut self, id: EntityId, now: SimTime) -> Option<&Entity> {
        let mut entity = self.live.remove(id)?;
        entity.destroyed_at = Some(now.max(entity.created_at));
        self.retired.push(entity);
        self.retired.last()
    }

    /// Finalize `id` and every member of its batch at `now`. Returns the
    /// number of entities retired.
    pub fn retire_with_batch(&mut self, id: EntityId, now: SimTime) -> usize {
        let batch = self
            .live
            .get_mut(id)
            .map(|e| std::mem::take(&mut e.batch))
            .unwrap_or_default();
        let mut retired = usize::from(self.retire(id, now).is_some());
        for member in batch {
            retired += self.retire_with_batch(member, now);
        }
        retired
    }

    /// Entities still travelling through the network.
    pub fn live(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.live.iter()
    }

    /// Entities finalized by a sink, in finalization order.
    pub fn retired(&self) -> &[Entity] {
        &self.retired
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Total entities ever created in this replication.
    pub fn created_count(&self) -> u64 {
        self.created
    }

    /// Drop every entity. Used between replications.
    pub fn clear(&mut self) {
        self.live.clear();
        self.retired.clear();
        self.created = 0;
    }
}

impl crate::reset::Resettable for EntityTracker {
    fn reset(&mut self) {
        self.clear();
    }
}
