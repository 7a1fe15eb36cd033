use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a station (source, server or sink) in a model.
    pub struct StationId;

    /// Identifies an entity tracked by a simulation context.
    pub struct EntityId;
}

/// Position of a connection in its origin's insertion-ordered routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionIndex(pub u32);

impl ConnectionIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn station_ids_are_distinct() {
        let mut map: SlotMap<StationId, &str> = SlotMap::with_key();
        let a = map.insert("press");
        let b = map.insert("drill");
        assert_ne!(a, b);
        assert_eq!(map[a], "press");
    }

    #[test]
    fn connection_index_orders_by_insertion() {
        assert!(ConnectionIndex(0) < ConnectionIndex(1));
        assert_eq!(ConnectionIndex(3).index(), 3);
    }
}
