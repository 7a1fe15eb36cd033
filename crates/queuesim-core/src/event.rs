//! Future event list with deterministic ordering.
//!
//! Events are ordered by time, then by the order in which they were
//! scheduled. Two events at the same instant therefore run first-scheduled
//! first, on every platform and every execution.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::id::{EntityId, StationId};
use crate::time::SimTime;

/// Key for ordering events in the queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct EventKey {
    pub time: SimTime,
    /// Monotonic scheduling counter; breaks ties at equal time.
    pub sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What happens when an event fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A source creates its next entity.
    Generate { source: StationId },
    /// An entity finishes travelling a connection and reaches `station`.
    Arrive { station: StationId, entity: EntityId },
    /// A server finishes processing `entity`.
    Complete {
        server: StationId,
        entity: EntityId,
        /// Sampled processing time, excluding downtime.
        work: f64,
        /// Repair time folded into this hold, zero without a breakdown.
        downtime: f64,
    },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<EventKey, Action>,
    sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, time: SimTime, action: Action) -> EventKey {
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.events.insert(key, action);
        key
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.events.first_key_value().map(|(k, _)| k.time)
    }

    pub fn pop(&mut self) -> Option<(EventKey, Action)> {
        self.events.pop_first()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn t(v: f64) -> SimTime {
        SimTime::from_num(v)
    }

    fn source() -> StationId {
        let mut map: SlotMap<StationId, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn earlier_time_first() {
        let a = EventKey { time: t(1.0), sequence: 9 };
        let b = EventKey { time: t(2.0), sequence: 0 };
        assert!(a < b);
    }

    #[test]
    fn ties_broken_by_scheduling_order() {
        let s = source();
        let mut q = EventQueue::new();
        q.schedule(t(5.0), Action::Generate { source: s });
        let second = q.schedule(t(5.0), Action::Generate { source: s });
        q.schedule(t(1.0), Action::Generate { source: s });

        assert_eq!(q.peek_time(), Some(t(1.0)));
        let (k1, _) = q.pop().unwrap();
        let (k2, _) = q.pop().unwrap();
        let (k3, _) = q.pop().unwrap();
        assert_eq!(k1.time, t(1.0));
        assert_eq!(k2.sequence, 0);
        assert_eq!(k3, second);
        assert!(q.is_empty());
    }

    #[test]
    fn clear_restarts_sequence() {
        let s = source();
        let mut q = EventQueue::new();
        q.schedule(t(1.0), Action::Generate { source: s });
        q.clear();
        let key = q.schedule(t(1.0), Action::Generate { source: s });
        assert_eq!(key.sequence, 0);
        assert_eq!(q.len(), 1);
    }
}
