//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-element-type physical models and shared noise helpers."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gridsim_common::{AlarmThresholds, NoiseConfig};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::alarm::AlarmCandidate;
use crate::environment::EnvironmentalState;
use crate::profile::SeasonalFactors;

pub mod bus;
pub mod generator;
pub mod line;
pub mod load;
pub mod transformer;

pub use bus::simulate_bus;
pub use generator::{simulate_generator, GeneratorStep};
pub use line::simulate_line;
pub use load::simulate_load;
pub use transformer::simulate_transformer;

pub const NOMINAL_FREQUENCY_HZ: f64 = 50.0;

/// Inputs shared by every simulator for a single element evaluation.
#[derive(Debug, Clone, Copy)]
pub struct SimContext<'a> {
    pub now: DateTime<Utc>,
    pub load_factor: f64,
    pub seasonal: SeasonalFactors,
    pub environment: EnvironmentalState,
    pub noise: &'a NoiseConfig,
    pub thresholds: &'a AlarmThresholds,
    pub thermal_dispatch_spread: f64,
}

/// Reading plus the threshold violations it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulated<R> {
    pub reading: R,
    pub alarms: Vec<AlarmCandidate>,
}

/// Zero-mean gaussian draw; a non-positive sigma yields exactly zero.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 || !sigma.is_finite() {
        return 0.0;
    }
    Normal::new(0.0, sigma)
        .map(|normal| normal.sample(rng))
        .unwrap_or(0.0)
}

/// Proportional noise: `value * (1 + N(0, factor))`.
pub fn add_noise<R: Rng + ?Sized>(rng: &mut R, value: f64, factor: f64) -> f64 {
    value * (1.0 + gaussian(rng, factor))
}

pub fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.gen_range(low..high)
}

/// Normalised turbine output for a hub-height wind speed in m/s.
pub fn wind_factor(speed: f64) -> f64 {
    if speed < 3.0 {
        0.0
    } else if speed < 12.0 {
        (speed - 3.0) / 9.0
    } else if speed < 25.0 {
        1.0
    } else {
        // cut-out
        0.0
    }
}

/// Relative efficiency at a given output ratio; peaks at 85 % loading.
pub fn efficiency_curve(ratio: f64) -> f64 {
    if ratio <= 0.85 {
        0.7 + 0.3 * ratio / 0.85
    } else {
        1.0 - 0.2 * (ratio - 0.85) / 0.15
    }
}
