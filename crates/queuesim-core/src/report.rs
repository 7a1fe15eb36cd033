//! Flat per-run statistics table.
//!
//! One replication produces a [`StatTable`]: a sorted map from
//! `(kind, name, metric)` to an optional value, where `None` means the
//! underlying tally had no data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metric names, grouped by the row kind that reports them.
pub mod metric {
    // Entity
    pub const NUMBER_CREATED: &str = "NumberCreated";
    pub const NUMBER_DESTROYED: &str = "NumberDestroyed";
    pub const NUMBER_IN_SYSTEM: &str = "NumberInSystem";
    pub const AVG_TIME_IN_SYSTEM: &str = "AvgTimeInSystem";
    pub const MAX_TIME_IN_SYSTEM: &str = "MaxTimeInSystem";
    pub const MIN_TIME_IN_SYSTEM: &str = "MinTimeInSystem";

    // Source
    pub const NUMBER_EXITED: &str = "NumberExited";

    // Server
    pub const SCHEDULED_UTILIZATION: &str = "ScheduledUtilization";
    pub const UNITS_UTILIZED: &str = "UnitsUtilized";
    pub const AVG_TIME_PROCESSING: &str = "AvgTimeProcessing";
    pub const TOTAL_TIME_PROCESSING: &str = "TotalTimeProcessing";
    pub const NUMBER_ENTERED: &str = "NumberEntered";
    pub const NUMBER_DOWNTIMES: &str = "NumberDowntimes";
    pub const TOTAL_DOWNTIME: &str = "TotalDowntime";
    pub const AVG_QUEUE_LENGTH: &str = "AvgQueueLength";
    pub const MAX_QUEUE_LENGTH: &str = "MaxQueueLength";

    // Combiner and separator
    pub const NUMBER_ENTERED_PARENT: &str = "NumberEnteredParent";
    pub const NUMBER_ENTERED_MEMBER: &str = "NumberEnteredMember";
    pub const NUMBER_EXITED_PARENT: &str = "NumberExitedParent";
    pub const NUMBER_EXITED_MEMBER: &str = "NumberExitedMember";

    // Sink
    pub const NUM_TIMES_PROCESSED_AVG: &str = "NumTimesProcessed_Avg";
    pub const NUM_TIMES_PROCESSED_MAX: &str = "NumTimesProcessed_Max";
    pub const NUM_TIMES_PROCESSED_MIN: &str = "NumTimesProcessed_Min";
}

/// Row group of a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReportKind {
    Entity,
    Source,
    Server,
    Combiner,
    Separator,
    Sink,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportKind::Entity => "Entity",
            ReportKind::Source => "Source",
            ReportKind::Server => "Server",
            ReportKind::Combiner => "Combiner",
            ReportKind::Separator => "Separator",
            ReportKind::Sink => "Sink",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatKey {
    pub kind: ReportKind,
    pub name: String,
    pub metric: String,
}

impl StatKey {
    pub fn new(kind: ReportKind, name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.name, self.metric)
    }
}

/// Statistics of one replication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatTable {
    rows: BTreeMap<StatKey, Option<f64>>,
}

impl StatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ReportKind, name: &str, metric: &str, value: Option<f64>) {
        self.rows.insert(StatKey::new(kind, name, metric), value);
    }

    /// Insert a counter; counters always have data.
    pub fn insert_count(&mut self, kind: ReportKind, name: &str, metric: &str, value: u64) {
        self.insert(kind, name, metric, Some(value as f64));
    }

    /// `None` if the key is missing; `Some(None)` if present without data.
    pub fn get(&self, kind: ReportKind, name: &str, metric: &str) -> Option<Option<f64>> {
        self.rows.get(&StatKey::new(kind, name, metric)).copied()
    }

    /// Convenience for tests and display: the value, if present and set.
    pub fn value(&self, kind: ReportKind, name: &str, metric: &str) -> Option<f64> {
        self.get(kind, name, metric).flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatKey, Option<f64>)> {
        self.rows.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_by_kind_then_name_then_metric() {
        let mut table = StatTable::new();
        table.insert_count(ReportKind::Sink, "GoodParts", metric::NUMBER_ENTERED, 3);
        table.insert_count(ReportKind::Entity, "Entity", metric::NUMBER_CREATED, 5);
        table.insert(ReportKind::Server, "Press", metric::AVG_TIME_PROCESSING, None);
        let kinds: Vec<_> = table.iter().map(|(k, _)| k.kind).collect();
        assert_eq!(kinds, vec![ReportKind::Entity, ReportKind::Server, ReportKind::Sink]);
    }

    #[test]
    fn missing_vs_no_data() {
        let mut table = StatTable::new();
        table.insert(ReportKind::Sink, "s", metric::MIN_TIME_IN_SYSTEM, None);
        assert_eq!(table.get(ReportKind::Sink, "s", metric::MIN_TIME_IN_SYSTEM), Some(None));
        assert_eq!(table.get(ReportKind::Sink, "s", metric::MAX_TIME_IN_SYSTEM), None);
        assert_eq!(table.value(ReportKind::Sink, "s", metric::MIN_TIME_IN_SYSTEM), None);
    }

    #[test]
    fn key_display() {
        let key = StatKey::new(ReportKind::Server, "Rework", metric::NUMBER_EXITED);
        assert_eq!(key.to_string(), "Server/Rework/NumberExited");
    }
}
