//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Consumer demand with priority-based shedding."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::Rng;

use super::{add_noise, uniform, SimContext, Simulated};
use crate::model::LoadBase;
use crate::sample::LoadReading;

/// System load factor above which low and medium priority loads shed.
pub const SHEDDING_THRESHOLD: f64 = 1.1;

const MIN_POWER_FACTOR: f64 = 0.7;
const MAX_POWER_FACTOR: f64 = 1.0;

pub fn simulate_load<R: Rng + ?Sized>(
    base: &LoadBase,
    ctx: &SimContext<'_>,
    rng: &mut R,
) -> Simulated<LoadReading> {
    let mut multiplier = ctx.load_factor;
    if ctx.load_factor > SHEDDING_THRESHOLD {
        multiplier *= base.priority.shedding_multiplier();
    }
    let demand = base.base_demand_mw * multiplier * uniform(rng, 0.85, 1.15);

    let power_factor = add_noise(rng, base.power_factor, ctx.noise.power_factor)
        .clamp(MIN_POWER_FACTOR, MAX_POWER_FACTOR);

    let voltage = base.voltage_level_kv;
    let current = if voltage > 0.0 {
        demand / (voltage * 3f64.sqrt() * power_factor)
    } else {
        0.0
    };
    let utilization = if base.base_demand_mw > 0.0 {
        demand / base.base_demand_mw * 100.0
    } else {
        0.0
    };

    Simulated {
        reading: LoadReading {
            power: Some(demand),
            demand: Some(base.base_demand_mw),
            current: Some(current),
            power_factor: Some(power_factor),
            utilization_rate: Some(utilization),
            voltage_level: Some(voltage),
        },
        alarms: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentalState;
    use crate::model::LoadPriority;
    use crate::profile::SeasonalFactors;
    use chrono::{TimeZone, Utc};
    use gridsim_common::{AlarmThresholds, NoiseConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn base(priority: LoadPriority) -> LoadBase {
        LoadBase {
            base_demand_mw: 50.0,
            power_factor: 0.95,
            priority,
            voltage_level_kv: 11.0,
        }
    }

    #[test]
    fn power_carries_the_draw_and_demand_the_nominal_value() {
        let noise = NoiseConfig::default();
        let thresholds = AlarmThresholds::default();
        let ctx = SimContext {
            now: Utc.with_ymd_and_hms(2024, 3, 12, 14, 0, 0).unwrap(),
            load_factor: 1.0,
            seasonal: SeasonalFactors::for_day(72),
            environment: EnvironmentalState::default(),
            noise: &noise,
            thresholds: &thresholds,
            thermal_dispatch_spread: 0.2,
        };
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let reading = simulate_load(&base(LoadPriority::Medium), &ctx, &mut rng).reading;
            let power = reading.power.expect("power");
            assert_eq!(reading.demand, Some(50.0));
            assert!((42.5..=57.5).contains(&power), "power {power}");
            assert_ne!(reading.power, reading.demand);
        }
    }

    #[test]
    fn low_priority_loads_shed_above_threshold() {
        let noise = NoiseConfig::default();
        let thresholds = AlarmThresholds::default();
        let ctx = SimContext {
            now: Utc.with_ymd_and_hms(2024, 3, 12, 18, 0, 0).unwrap(),
            load_factor: 1.4,
            seasonal: SeasonalFactors::for_day(72),
            environment: EnvironmentalState::default(),
            noise: &noise,
            thresholds: &thresholds,
            thermal_dispatch_spread: 0.2,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let reading = simulate_load(&base(LoadPriority::Low), &ctx, &mut rng).reading;
        let power = reading.power.expect("power");
        assert!(power <= 50.0 * 1.4 * LoadPriority::Low.shedding_multiplier() * 1.15);
        assert_eq!(reading.demand, Some(50.0));
    }
}
