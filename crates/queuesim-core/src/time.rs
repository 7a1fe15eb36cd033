//! Simulation clock types.
//!
//! Simulation time is kept in Q32.32 fixed point so event timestamps are
//! totally ordered and identical across platforms. Sampled durations come out
//! of distributions as `f64` and are converted exactly once, when an event is
//! scheduled.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Q32.32 fixed-point simulation time, measured in steps.
pub type SimTime = I32F32;

/// Convert an f64 duration or timestamp to [`SimTime`].
///
/// Negative and NaN values clamp to zero, values beyond the representable
/// range saturate.
#[inline]
pub fn f64_to_time(v: f64) -> SimTime {
    if v.is_nan() || v <= 0.0 {
        return SimTime::ZERO;
    }
    SimTime::saturating_from_num(v)
}

/// Convert [`SimTime`] to f64. Use for statistics and display only.
#[inline]
pub fn time_to_f64(t: SimTime) -> f64 {
    t.to_num::<f64>()
}

/// What one simulation step represents in wall-clock terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeBase {
    Second,
    #[default]
    Minute,
    Hour,
}

impl TimeBase {
    /// Number of simulation steps in one day.
    pub fn steps_per_day(self) -> f64 {
        match self {
            TimeBase::Second => 86_400.0,
            TimeBase::Minute => 1_440.0,
            TimeBase::Hour => 24.0,
        }
    }
}

/// Unit a sampled value is expressed in.
///
/// `Step` means the value is already in simulation steps and is used as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    Step,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Map `value` expressed in this unit to simulation steps.
    pub fn to_steps(self, value: f64, base: TimeBase) -> f64 {
        let per_day = base.steps_per_day();
        match self {
            TimeUnit::Step => value,
            TimeUnit::Day => value * per_day,
            TimeUnit::Hour => value * per_day / 24.0,
            TimeUnit::Minute => value * per_day / 1_440.0,
            TimeUnit::Second => value * per_day / 86_400.0,
        }
    }
}
