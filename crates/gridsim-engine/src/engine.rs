//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry engine context owning profiles, element snapshots, and alarm state."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gridsim_common::{AlarmConfig, AppConfig, NoiseConfig, SharedClock, SimulationConfig};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alarm::{Alarm, AlarmCandidate, AlarmEvaluator};
use crate::environment::{EnvironmentalState, SharedEnvironmentSource};
use crate::model::{BaseSnapshot, BaseValues, Element, ElementType};
use crate::profile::{LoadProfile, SeasonalFactors};
use crate::sample::{Reading, TelemetrySample};
use crate::simulators::{
    simulate_bus, simulate_generator, simulate_line, simulate_load, simulate_transformer,
    SimContext,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown element `{0}`")]
    UnknownElement(String),
}

/// Configuration slice the engine reads.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub simulation: SimulationConfig,
    pub noise: NoiseConfig,
    pub alarms: AlarmConfig,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            simulation: config.simulation.clone(),
            noise: config.noise.clone(),
            alarms: config.alarms.clone(),
        }
    }
}

/// Result of simulating one element once.
#[derive(Debug, Clone)]
pub struct ElementOutcome {
    pub sample: TelemetrySample,
    /// Alarms that passed deduplication.
    pub alarms: Vec<Alarm>,
}

/// Owns every piece of mutable simulation state for one topology.
#[derive(Debug)]
pub struct TelemetryEngine {
    settings: EngineSettings,
    snapshots: IndexMap<String, BaseSnapshot>,
    profile: RwLock<LoadProfile>,
    ramp: Mutex<HashMap<String, f64>>,
    alarms: AlarmEvaluator,
    rng: Mutex<StdRng>,
    clock: SharedClock,
    environment: SharedEnvironmentSource,
}

impl TelemetryEngine {
    pub fn new(
        settings: EngineSettings,
        elements: &[Element],
        clock: SharedClock,
        environment: SharedEnvironmentSource,
    ) -> Self {
        let mut snapshots = IndexMap::with_capacity(elements.len());
        for element in elements {
            let snapshot = BaseSnapshot::from_element(element);
            if snapshots.insert(element.id.clone(), snapshot).is_some() {
                warn!(element_id = %element.id, "duplicate element id in topology, keeping the last entry");
            }
        }

        let rng = match settings.simulation.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let profile = LoadProfile::new(
            settings.simulation.daily_load_curve,
            settings.simulation.seasonal_variation,
            clock.now(),
        );
        let alarms = AlarmEvaluator::new(&settings.alarms);

        debug!(
            elements = snapshots.len(),
            seeded = settings.simulation.random_seed.is_some(),
            "telemetry engine initialised"
        );

        Self {
            settings,
            snapshots,
            profile: RwLock::new(profile),
            ramp: Mutex::new(HashMap::new()),
            alarms,
            rng: Mutex::new(rng),
            clock,
            environment,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &BaseSnapshot> {
        self.snapshots.values()
    }

    pub fn snapshot(&self, element_id: &str) -> Option<&BaseSnapshot> {
        self.snapshots.get(element_id)
    }

    pub fn active_snapshots(&self) -> impl Iterator<Item = &BaseSnapshot> {
        self.snapshots.values().filter(|snapshot| snapshot.is_active())
    }

    pub fn element_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn active_element_count(&self) -> usize {
        self.active_snapshots().count()
    }

    pub fn profile(&self) -> LoadProfile {
        self.profile.read().clone()
    }

    /// Recomputes the seasonal factors if the calendar day changed.
    pub fn roll_profile(&self) -> bool {
        let now = self.clock.now();
        let rolled = self.profile.write().roll_to(now);
        if rolled {
            let seasonal = self.profile.read().seasonal();
            info!(
                day = %now.date_naive(),
                load = seasonal.load,
                solar = seasonal.solar,
                wind = seasonal.wind,
                "seasonal factors updated"
            );
        }
        rolled
    }

    /// System load factor right now, with a fresh jitter draw.
    pub fn current_load_factor(&self) -> f64 {
        let now = self.clock.now();
        let profile = self.profile.read();
        let mut rng = self.rng.lock();
        profile.load_factor(now, self.settings.noise.load_factor_jitter, &mut *rng)
    }

    pub fn environment(&self) -> EnvironmentalState {
        if self.settings.simulation.weather_effects {
            self.environment.current()
        } else {
            EnvironmentalState::default()
        }
    }

    /// Last remembered output of a generator, if it has been simulated.
    pub fn generator_output(&self, element_id: &str) -> Option<f64> {
        self.ramp.lock().get(element_id).copied()
    }

    pub fn active_alarm_count(&self) -> usize {
        self.alarms.active_count(self.clock.now())
    }

    pub fn simulate(&self, element_id: &str) -> Result<ElementOutcome, EngineError> {
        let snapshot = self
            .snapshots
            .get(element_id)
            .ok_or_else(|| EngineError::UnknownElement(element_id.to_owned()))?;
        Ok(self.simulate_snapshot(snapshot))
    }

    pub fn simulate_snapshot(&self, snapshot: &BaseSnapshot) -> ElementOutcome {
        let now = self.clock.now();
        let element_type = snapshot.element_type();
        if !snapshot.is_active() {
            return ElementOutcome {
                sample: TelemetrySample {
                    timestamp: now,
                    element_id: snapshot.element_id.clone(),
                    status: snapshot.status,
                    reading: Reading::zeroed(element_type),
                },
                alarms: Vec::new(),
            };
        }

        let environment = self.environment();
        let (seasonal, load_factor, reading, candidates) = {
            let profile = self.profile.read();
            let seasonal: SeasonalFactors = profile.seasonal();
            let mut rng = self.rng.lock();
            let load_factor =
                profile.load_factor(now, self.settings.noise.load_factor_jitter, &mut *rng);
            drop(profile);

            let ctx = SimContext {
                now,
                load_factor,
                seasonal,
                environment,
                noise: &self.settings.noise,
                thresholds: &self.settings.alarms.thresholds,
                thermal_dispatch_spread: self.settings.simulation.thermal_dispatch_spread,
            };
            let (reading, candidates) = self.run_model(snapshot, &ctx, &mut rng);
            (seasonal, load_factor, reading, candidates)
        };

        let alarms = self.raise_all(snapshot, element_type, candidates, now);
        debug!(
            element_id = %snapshot.element_id,
            element_type = %element_type,
            load_factor,
            seasonal_load = seasonal.load,
            alarms = alarms.len(),
            "element simulated"
        );

        ElementOutcome {
            sample: TelemetrySample {
                timestamp: now,
                element_id: snapshot.element_id.clone(),
                status: snapshot.status,
                reading,
            },
            alarms,
        }
    }

    fn run_model(
        &self,
        snapshot: &BaseSnapshot,
        ctx: &SimContext<'_>,
        rng: &mut StdRng,
    ) -> (Reading, Vec<AlarmCandidate>) {
        match &snapshot.values {
            BaseValues::Bus(base) => {
                let simulated = simulate_bus(base, ctx, rng);
                (Reading::Bus(simulated.reading), simulated.alarms)
            }
            BaseValues::Generator(base) => {
                let mut ramp = self.ramp.lock();
                let previous = ramp.get(&snapshot.element_id).copied();
                let step = simulate_generator(base, previous, ctx, rng);
                ramp.insert(snapshot.element_id.clone(), step.output_mw);
                (
                    Reading::Generator(step.simulated.reading),
                    step.simulated.alarms,
                )
            }
            BaseValues::Load(base) => {
                let simulated = simulate_load(base, ctx, rng);
                (Reading::Load(simulated.reading), simulated.alarms)
            }
            BaseValues::Line(base) => {
                let simulated = simulate_line(base, ctx, rng);
                (Reading::Line(simulated.reading), simulated.alarms)
            }
            BaseValues::Transformer(base) => {
                let simulated = simulate_transformer(base, ctx, rng);
                (Reading::Transformer(simulated.reading), simulated.alarms)
            }
        }
    }

    fn raise_all(
        &self,
        snapshot: &BaseSnapshot,
        element_type: ElementType,
        candidates: Vec<AlarmCandidate>,
        now: DateTime<Utc>,
    ) -> Vec<Alarm> {
        candidates
            .into_iter()
            .filter_map(|candidate| {
                self.alarms
                    .raise(&snapshot.element_id, element_type, candidate, now)
            })
            .inspect(|alarm| {
                warn!(
                    element_id = %alarm.element_id,
                    alarm_type = %alarm.alarm_type,
                    severity = %alarm.severity,
                    message = %alarm.message,
                    "alarm raised"
                );
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticEnvironment;
    use crate::model::ElementStatus;
    use chrono::TimeZone;
    use gridsim_common::ManualClock;
    use std::sync::Arc;

    fn engine(elements: &[Element]) -> TelemetryEngine {
        let mut settings = EngineSettings::default();
        settings.simulation.random_seed = Some(11);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap(),
        ));
        TelemetryEngine::new(
            settings,
            elements,
            clock,
            Arc::new(StaticEnvironment::default()),
        )
    }

    #[test]
    fn unknown_element_is_an_error() {
        let engine = engine(&[]);
        assert!(matches!(
            engine.simulate("missing"),
            Err(EngineError::UnknownElement(id)) if id == "missing"
        ));
    }

    #[test]
    fn inactive_elements_are_zeroed() {
        let element = Element::new("t1", ElementType::Transformer).with_status(ElementStatus::Fault);
        let engine = engine(&[element]);
        let outcome = engine.simulate("t1").unwrap();
        assert!(outcome.alarms.is_empty());
        assert_eq!(outcome.sample.status, ElementStatus::Fault);
        assert!(outcome.sample.measurements().iter().all(|(_, v)| *v == 0.0));
        assert_eq!(engine.active_element_count(), 0);
    }

    #[test]
    fn generator_output_is_remembered() {
        let engine = engine(&[Element::new("g1", ElementType::Generator)]);
        assert!(engine.generator_output("g1").is_none());
        let outcome = engine.simulate("g1").unwrap();
        let power = match outcome.sample.reading {
            Reading::Generator(reading) => reading.power.unwrap(),
            other => panic!("unexpected reading {other:?}"),
        };
        assert_eq!(engine.generator_output("g1"), Some(power));
    }
}
