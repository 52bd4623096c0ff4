//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fuel-aware generator dispatch with ramp-rate limiting."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::Rng;

use super::{
    add_noise, efficiency_curve, gaussian, uniform, wind_factor, SimContext, Simulated,
    NOMINAL_FREQUENCY_HZ,
};
use crate::alarm::check_generator;
use crate::model::{FuelType, GeneratorBase};
use crate::profile::{fractional_hour, solar_factor};
use crate::sample::GeneratorReading;

/// Maximum change in output per cycle, as a fraction of capacity.
pub const RAMP_RATE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorStep {
    pub simulated: Simulated<GeneratorReading>,
    /// Output to remember for the next cycle's ramp limit.
    pub output_mw: f64,
}

/// Desired output before ramp limiting.
pub fn dispatch_target<R: Rng + ?Sized>(
    base: &GeneratorBase,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> f64 {
    let capacity = base.capacity_mw;
    match base.fuel {
        FuelType::Solar => {
            let hour = fractional_hour(ctx.now);
            capacity * solar_factor(hour, ctx.environment.solar_irradiance) * ctx.seasonal.solar
        }
        FuelType::Wind => {
            capacity * wind_factor(ctx.environment.wind_speed_ms) * ctx.seasonal.wind
        }
        FuelType::Thermal => {
            let spread = ctx.thermal_dispatch_spread;
            let share = uniform(rng, 1.0 - spread, 1.0);
            (capacity * ctx.load_factor * share).min(capacity)
        }
    }
}

/// Moves `previous` toward `target` by at most one ramp step.
pub fn ramp_limited(previous: f64, target: f64, capacity: f64) -> f64 {
    let max_step = RAMP_RATE * capacity;
    if (target - previous).abs() > max_step {
        if target > previous {
            previous + max_step
        } else {
            previous - max_step
        }
    } else {
        target
    }
}

pub fn simulate_generator<R: Rng + ?Sized>(
    base: &GeneratorBase,
    previous_output: Option<f64>,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> GeneratorStep {
    let capacity = base.capacity_mw;
    let target = dispatch_target(base, ctx, rng);
    let output = ramp_limited(previous_output.unwrap_or(target), target, capacity);

    let ratio = if capacity > 0.0 { output / capacity } else { 0.0 };
    let output_pct = ratio * 100.0;
    let efficiency = base.base_efficiency * efficiency_curve(ratio);
    let frequency = NOMINAL_FREQUENCY_HZ + gaussian(rng, ctx.noise.generator_frequency_sigma);
    let voltage = add_noise(rng, base.voltage_level_kv, ctx.noise.generator_voltage);

    GeneratorStep {
        simulated: Simulated {
            reading: GeneratorReading {
                power: Some(output),
                frequency: Some(frequency),
                voltage: Some(voltage),
                efficiency: Some(efficiency),
                load_factor: Some(output_pct),
                capacity: Some(capacity),
                voltage_level: Some(base.voltage_level_kv),
            },
            alarms: check_generator(frequency, output_pct, ctx.thresholds),
        },
        output_mw: output,
    }
}
