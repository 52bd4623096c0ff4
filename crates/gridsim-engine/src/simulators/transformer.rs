//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transformer loading, oil and winding temperatures, and tap drift."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::Rng;

use super::{gaussian, uniform, SimContext, Simulated};
use crate::alarm::check_transformer;
use crate::model::TransformerBase;
use crate::sample::TransformerReading;

const OIL_RISE_C: f64 = 35.0;
const WINDING_OFFSET_C: f64 = 15.0;
const WINDING_RISE_C: f64 = 10.0;
const TAP_MIN: f64 = 0.8;
const TAP_MAX: f64 = 1.2;

pub fn simulate_transformer<R: Rng + ?Sized>(
    base: &TransformerBase,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> Simulated<TransformerReading> {
    let loading = (uniform(rng, 30.0, 90.0) * ctx.load_factor).min(100.0);
    let fraction = loading / 100.0;
    let power_flow = fraction * base.rating_mva;
    let oil_temperature = base.oil_temp_base_c + fraction * OIL_RISE_C;
    let winding_temperature = oil_temperature + WINDING_OFFSET_C + fraction * WINDING_RISE_C;
    let tap_position = (base.tap_ratio + gaussian(rng, ctx.noise.tap_sigma)).clamp(TAP_MIN, TAP_MAX);

    Simulated {
        reading: TransformerReading {
            loading: Some(loading),
            power_flow: Some(power_flow),
            oil_temperature: Some(oil_temperature),
            winding_temperature: Some(winding_temperature),
            tap_position: Some(tap_position),
            rating: Some(base.rating_mva),
        },
        alarms: check_transformer(loading, oil_temperature, ctx.thresholds),
    }
}
