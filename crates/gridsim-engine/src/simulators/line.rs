//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Line loading, I²R losses, and conductor temperature."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::Rng;

use super::{uniform, SimContext, Simulated};
use crate::alarm::check_line;
use crate::model::LineBase;
use crate::sample::LineReading;

/// Conductor temperature rise at full loading, °C.
const FULL_LOAD_RISE_C: f64 = 50.0;

pub fn simulate_line<R: Rng + ?Sized>(
    base: &LineBase,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> Simulated<LineReading> {
    let loading = (uniform(rng, 20.0, 85.0) * ctx.load_factor).min(100.0);
    let fraction = loading / 100.0;
    let current = fraction * base.capacity_mw * 10.0;
    let power_flow = fraction * base.capacity_mw;
    let power_loss = (current / 1000.0).powi(2) * base.resistance;
    let temperature = ctx.environment.ambient_temperature_c + fraction * FULL_LOAD_RISE_C;

    Simulated {
        reading: LineReading {
            current: Some(current),
            loading: Some(loading),
            power_flow: Some(power_flow),
            power_loss: Some(power_loss),
            temperature: Some(temperature),
            capacity: Some(base.capacity_mw),
        },
        alarms: check_line(loading, temperature, ctx.thresholds),
    }
}
