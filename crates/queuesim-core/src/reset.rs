//! Reset-to-initial-state lifecycle.
//!
//! Every object that accumulates per-replication state implements
//! [`Resettable`]. A [`ResetManager`] remembers a set of slot-map keys in
//! registration order and resets the matching objects in that order, so a
//! model can be reused across replications without rebuilding it.

use slotmap::{Key, SlotMap};

/// Restore an object to the state it had right after construction.
pub trait Resettable {
    fn reset(&mut self);
}

/// Ordered collection of keys whose objects are reset together.
#[derive(Debug, Clone)]
pub struct ResetManager<K: Key> {
    members: Vec<K>,
}

impl<K: Key> Default for ResetManager<K> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<K: Key> ResetManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key. Registering the same key twice is a no-op.
    pub fn register(&mut self, key: K) {
        if !self.members.contains(&key) {
            self.members.push(key);
        }
    }

    pub fn unregister(&mut self, key: K) {
        self.members.retain(|k| *k != key);
    }

    pub fn members(&self) -> &[K] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Reset every registered object still present in `store`, in
    /// registration order. Returns how many objects were reset.
    pub fn reset_all<T: Resettable>(&self, store: &mut SlotMap<K, T>) -> usize {
        let mut count = 0;
        for key in &self.members {
            if let Some(obj) = store.get_mut(*key) {
                obj.reset();
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::StationId;

    #[derive(Debug, Default)]
    struct Counter {
        hits: u32,
        resets: u32,
    }

    impl Resettable for Counter {
        fn reset(&mut self) {
            self.hits = 0;
            self.resets += 1;
        }
    }

    #[test]
    fn resets_registered_objects_only() {
        let mut store: SlotMap<StationId, Counter> = SlotMap::with_key();
        let a = store.insert(Counter { hits: 3, resets: 0 });
        let b = store.insert(Counter { hits: 5, resets: 0 });

        let mut manager = ResetManager::new();
        manager.register(a);
        assert_eq!(manager.reset_all(&mut store), 1);

        assert_eq!(store[a].hits, 0);
        assert_eq!(store[b].hits, 5);
    }

    #[test]
    fn duplicate_registration_resets_once() {
        let mut store: SlotMap<StationId, Counter> = SlotMap::with_key();
        let a = store.insert(Counter::default());
        let mut manager = ResetManager::new();
        manager.register(a);
        manager.register(a);
        manager.reset_all(&mut store);
        assert_eq!(store[a].resets, 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn removed_objects_are_skipped() {
        let mut store: SlotMap<StationId, Counter> = SlotMap::with_key();
        let a = store.insert(Counter::default());
        let b = store.insert(Counter::default());
        let mut manager = ResetManager::new();
        manager.register(a);
        manager.register(b);
        store.remove(a);
        assert_eq!(manager.reset_all(&mut store), 1);

        manager.unregister(a);
        assert_eq!(manager.members(), &[b]);
    }
}
