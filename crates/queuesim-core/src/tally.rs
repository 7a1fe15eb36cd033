//! Running-sample recorder.

use serde::{Deserialize, Serialize};

/// Append-only list of observations with min/max/average on demand.
///
/// Every query on an empty tally yields `None` ("no data").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyStatistic {
    samples: Vec<f64>,
}

impl TallyStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.samples.push(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn sum(&self) -> f64 {
        self.samples.iter().sum()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum() / self.samples.len() as f64)
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl crate::reset::Resettable for TallyStatistic {
    fn reset(&mut self) {
        self.clear();
    }
}
