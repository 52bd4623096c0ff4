//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus voltage sag and frequency model."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::Rng;

use super::{add_noise, SimContext, Simulated, NOMINAL_FREQUENCY_HZ};
use crate::alarm::check_bus;
use crate::model::BusBase;
use crate::sample::BusReading;

/// Voltage sags by up to 3 % as system load rises.
const LOAD_SAG: f64 = 0.03;

pub fn simulate_bus<R: Rng + ?Sized>(
    base: &BusBase,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> Simulated<BusReading> {
    let nominal = base.nominal_voltage_kv;
    let voltage = add_noise(
        rng,
        nominal * (1.0 - LOAD_SAG * ctx.load_factor),
        ctx.noise.voltage,
    );
    let voltage_change = if nominal > 0.0 {
        (voltage - nominal) / nominal * 100.0
    } else {
        0.0
    };
    let frequency = add_noise(rng, NOMINAL_FREQUENCY_HZ, ctx.noise.frequency);

    Simulated {
        reading: BusReading {
            voltage: Some(voltage),
            voltage_level: Some(nominal),
            voltage_change: Some(voltage_change),
            frequency: Some(frequency),
        },
        alarms: check_bus(voltage, nominal, ctx.thresholds),
    }
}
