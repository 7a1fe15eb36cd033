//! Sampling specifications for inter-arrival, processing, travel and
//! breakdown durations.

use crate::rng::SimRng;
use crate::time::{SimTime, TimeBase, TimeUnit, f64_to_time};
use serde::{Deserialize, Serialize};

/// Invalid distribution parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistributionError {
    #[error("parameter {name} must be finite and non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("uniform bounds inverted: min {min} > max {max}")]
    InvertedBounds { min: f64, max: f64 },
    #[error("triangular mode {mode} outside [{low}, {high}]")]
    ModeOutOfRange { low: f64, high: f64, mode: f64 },
    #[error("exponential mean must be positive, got {0}")]
    NonPositiveMean(f64),
}

/// A continuous distribution over non-negative values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    Constant(f64),
    Uniform { min: f64, max: f64 },
    Exponential { mean: f64 },
    Triangular { low: f64, high: f64, mode: f64 },
    /// Normal distribution truncated at zero.
    Normal { mean: f64, std_dev: f64 },
}

fn non_negative(name: &'static str, value: f64) -> Result<(), DistributionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DistributionError::Negative { name, value })
    }
}

impl Distribution {
    /// Check parameters once at model-construction time.
    pub fn validate(&self) -> Result<(), DistributionError> {
        match *self {
            Distribution::Constant(v) => non_negative("value", v),
            Distribution::Uniform { min, max } => {
                non_negative("min", min)?;
                non_negative("max", max)?;
                if min > max {
                    return Err(DistributionError::InvertedBounds { min, max });
                }
                Ok(())
            }
            Distribution::Exponential { mean } => {
                if mean.is_finite() && mean > 0.0 {
                    Ok(())
                } else {
                    Err(DistributionError::NonPositiveMean(mean))
                }
            }
            Distribution::Triangular { low, high, mode } => {
                non_negative("low", low)?;
                non_negative("high", high)?;
                if low > high {
                    return Err(DistributionError::InvertedBounds { min: low, max: high });
                }
                if !(low..=high).contains(&mode) {
                    return Err(DistributionError::ModeOutOfRange { low, high, mode });
                }
                Ok(())
            }
            Distribution::Normal { mean, std_dev } => {
                non_negative("mean", mean)?;
                non_negative("std_dev", std_dev)
            }
        }
    }

    /// Draw one value. Never negative.
    pub fn sample(&self, rng: &mut SimRng) -> f64 {
        match *self {
            Distribution::Constant(v) => v,
            Distribution::Uniform { min, max } => rng.uniform(min, max),
            Distribution::Exponential { mean } => {
                // 1 - u lies in (0, 1], so ln never sees zero.
                let u = 1.0 - rng.next_f64();
                -mean * u.ln()
            }
            Distribution::Triangular { low, high, mode } => {
                if high <= low {
                    return low;
                }
                let u = rng.next_f64();
                let split = (mode - low) / (high - low);
                if u < split {
                    low + ((high - low) * (mode - low) * u).sqrt()
                } else {
                    high - ((high - low) * (high - mode) * (1.0 - u)).sqrt()
                }
            }
            Distribution::Normal { mean, std_dev } => {
                // Box-Muller; one of the pair is discarded.
                let u1 = 1.0 - rng.next_f64();
                let u2 = rng.next_f64();
                let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                (mean + std_dev * z).max(0.0)
            }
        }
    }

    /// Expected value of the (untruncated) distribution.
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Constant(v) => v,
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Exponential { mean } => mean,
            Distribution::Triangular { low, high, mode } => (low + high + mode) / 3.0,
            Distribution::Normal { mean, .. } => mean,
        }
    }
}

/// A distribution together with the time unit its samples are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub distribution: Distribution,
    #[serde(default)]
    pub unit: TimeUnit,
}

impl Delay {
    /// Delay in simulation steps.
    pub fn steps(distribution: Distribution) -> Self {
        Self {
            distribution,
            unit: TimeUnit::Step,
        }
    }

    pub fn in_unit(distribution: Distribution, unit: TimeUnit) -> Self {
        Self { distribution, unit }
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        self.distribution.validate()
    }

    /// Sample in the configured unit and map to simulation steps.
    pub fn sample_steps(&self, rng: &mut SimRng, base: TimeBase) -> f64 {
        self.unit.to_steps(self.distribution.sample(rng), base)
    }

    /// Sample and convert to [`SimTime`].
    pub fn sample_time(&self, rng: &mut SimRng, base: TimeBase) -> SimTime {
        f64_to_time(self.sample_steps(rng, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mean(dist: &Distribution, n: usize, seed: u64) -> f64 {
        let mut rng = SimRng::new(seed);
        (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64
    }

    #[test]
    fn constant_is_constant() {
        let mut rng = SimRng::new(1);
        let d = Distribution::Constant(4.5);
        for _ in 0..10 {
            assert_eq!(d.sample(&mut rng), 4.5);
        }
    }

    #[test]
    fn exponential_mean_converges() {
        let d = Distribution::Exponential { mean: 6.0 };
        let m = sample_mean(&d, 50_000, 3);
        assert!((m - 6.0).abs() < 0.2, "mean {m}");
    }

    #[test]
    fn triangular_stays_in_bounds_and_converges() {
        let d = Distribution::Triangular {
            low: 3.0,
            high: 5.0,
            mode: 4.0,
        };
        let mut rng = SimRng::new(11);
        for _ in 0..5_000 {
            let v = d.sample(&mut rng);
            assert!((3.0..=5.0).contains(&v), "out of range {v}");
        }
        let m = sample_mean(&d, 50_000, 12);
        assert!((m - 4.0).abs() < 0.05, "mean {m}");
    }

    #[test]
    fn normal_never_negative() {
        let d = Distribution::Normal {
            mean: 0.5,
            std_dev: 2.0,
        };
        let mut rng = SimRng::new(8);
        for _ in 0..5_000 {
            assert!(d.sample(&mut rng) >= 0.0);
        }
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(Distribution::Constant(-1.0).validate().is_err());
        assert_eq!(
            Distribution::Uniform { min: 4.0, max: 2.0 }.validate(),
            Err(DistributionError::InvertedBounds { min: 4.0, max: 2.0 })
        );
        assert!(Distribution::Exponential { mean: 0.0 }.validate().is_err());
        assert!(
            Distribution::Triangular {
                low: 1.0,
                high: 2.0,
                mode: 3.0
            }
            .validate()
            .is_err()
        );
        assert!(Distribution::Uniform { min: 2.0, max: 4.0 }.validate().is_ok());
    }

    #[test]
    fn delay_maps_units() {
        let mut rng = SimRng::new(1);
        let d = Delay::in_unit(Distribution::Constant(2.0), TimeUnit::Hour);
        assert_eq!(d.sample_steps(&mut rng, TimeBase::Minute), 120.0);
        assert_eq!(d.sample_time(&mut rng, TimeBase::Minute), SimTime::from_num(120));
    }
}
