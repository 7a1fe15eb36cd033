//! Multi-replication statistics for the queuesim engine.
//!
//! Folds per-run [`StatTable`]s into a [`PivotTable`] keyed by
//! `(kind, name, metric)` with Average, Minimum, Maximum and HalfWidth
//! columns. Folding is commutative and associative, so pivots built on
//! different workers can be merged in any order.
//!
//! # Usage
//!
//! ```ignore
//! let driver = ReplicationDriver::new(spec);
//! let summary = driver.run(&definition, 0..30)?;
//! println!("{}", summary.pivot);
//! ```

pub mod driver;

use std::collections::BTreeMap;
use std::fmt;

use queuesim_core::report::{ReportKind, StatKey, StatTable};
use serde::{Deserialize, Serialize};

pub use driver::{ReplicationDriver, ReplicationFailure, ReplicationSummary};

/// z-value of the two-sided 95 % confidence interval.
pub const Z_95: f64 = 1.96;

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Running count, sum, sum of squares, min and max of one statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Population variance (divides by n).
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_sq / self.count as f64 - mean * mean).max(0.0))
    }

    /// Half-width of the 95 % confidence interval of the mean,
    /// `1.96 * sd / sqrt(n)`. Zero for a single sample.
    pub fn half_width(&self) -> Option<f64> {
        if self.count == 1 {
            return Some(0.0);
        }
        let var = self.variance()?;
        Some(Z_95 * var.sqrt() / (self.count as f64).sqrt())
    }
}

// ---------------------------------------------------------------------------
// Pivot table
// ---------------------------------------------------------------------------

/// One row of a pivot. All values are `None` when no replication reported
/// data for the key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub average: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub half_width: Option<f64>,
    /// Replications that reported a value.
    pub samples: u64,
}

impl From<&Accumulator> for PivotRow {
    fn from(acc: &Accumulator) -> Self {
        Self {
            average: acc.mean(),
            minimum: acc.min(),
            maximum: acc.max(),
            half_width: acc.half_width(),
            samples: acc.count(),
        }
    }
}

/// Aggregate of any number of replication tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotTable {
    rows: BTreeMap<StatKey, Accumulator>,
    replications: u64,
}

impl PivotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pivot of a single replication.
    pub fn from_table(table: &StatTable) -> Self {
        let mut pivot = Self::new();
        pivot.fold(table);
        pivot
    }

    /// Add one replication. Keys without data still get a row.
    pub fn fold(&mut self, table: &StatTable) {
        self.replications += 1;
        for (key, value) in table.iter() {
            let acc = self.rows.entry(key.clone()).or_default();
            if let Some(v) = value {
                acc.push(v);
            }
        }
    }

    /// Combine with a pivot built elsewhere.
    pub fn merge(&mut self, other: &PivotTable) {
        self.replications += other.replications;
        for (key, acc) in &other.rows {
            self.rows.entry(key.clone()).or_default().merge(acc);
        }
    }

    pub fn replications(&self) -> u64 {
        self.replications
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Heading of the first value column: "Value" for a single run,
    /// "Average" otherwise.
    pub fn value_label(&self) -> &'static str {
        if self.replications == 1 {
            "Value"
        } else {
            "Average"
        }
    }

    pub fn row(&self, kind: ReportKind, name: &str, metric: &str) -> Option<PivotRow> {
        self.rows
            .get(&StatKey::new(kind, name, metric))
            .map(PivotRow::from)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&StatKey, PivotRow)> {
        self.rows.iter().map(|(k, acc)| (k, PivotRow::from(acc)))
    }

    /// Flat, self-describing form for JSON export.
    pub fn export(&self) -> PivotExport {
        PivotExport {
            replications: self.replications,
            value_label: self.value_label().to_string(),
            rows: self
                .rows()
                .map(|(key, row)| PivotRecord {
                    kind: key.kind,
                    name: key.name.clone(),
                    metric: key.metric.clone(),
                    average: row.average,
                    minimum: row.minimum,
                    maximum: row.maximum,
                    half_width: row.half_width,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRecord {
    pub kind: ReportKind,
    pub name: String,
    pub metric: String,
    pub average: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub half_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotExport {
    pub replications: u64,
    pub value_label: String,
    pub rows: Vec<PivotRecord>,
}

fn cell(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl fmt::Display for PivotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:<20} {:<24} {:>14} {:>14} {:>14} {:>14}",
            "Type",
            "Name",
            "Stat",
            self.value_label(),
            "Minimum",
            "Maximum",
            "HalfWidth"
        )?;
        for (key, row) in self.rows() {
            writeln!(
                f,
                "{:<8} {:<20} {:<24} {:>14} {:>14} {:>14} {:>14}",
                key.kind.to_string(),
                key.name,
                key.metric,
                cell(row.average),
                cell(row.minimum),
                cell(row.maximum),
                cell(row.half_width)
            )?;
        }
        Ok(())
    }
}
