//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Weather inputs consumed by the element simulators."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt::Debug;
use std::sync::Arc;

use gridsim_common::EnvironmentConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalState {
    pub ambient_temperature_c: f64,
    pub wind_speed_ms: f64,
    /// 0..1
    pub solar_irradiance: f64,
}

impl Default for EnvironmentalState {
    fn default() -> Self {
        Self {
            ambient_temperature_c: 20.0,
            wind_speed_ms: 5.0,
            solar_irradiance: 0.8,
        }
    }
}

impl From<&EnvironmentConfig> for EnvironmentalState {
    fn from(config: &EnvironmentConfig) -> Self {
        Self {
            ambient_temperature_c: config.ambient_temperature_c,
            wind_speed_ms: config.wind_speed_ms,
            solar_irradiance: config.solar_irradiance,
        }
    }
}

pub trait EnvironmentSource: Send + Sync + Debug {
    fn current(&self) -> EnvironmentalState;
}

pub type SharedEnvironmentSource = Arc<dyn EnvironmentSource>;

/// Fixed weather taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEnvironment(pub EnvironmentalState);

impl EnvironmentSource for StaticEnvironment {
    fn current(&self) -> EnvironmentalState {
        self.0
    }
}

/// Weather that can be updated out of band while the simulator runs.
#[derive(Debug, Clone, Default)]
pub struct SharedEnvironment {
    state: Arc<RwLock<EnvironmentalState>>,
}

impl SharedEnvironment {
    pub fn new(initial: EnvironmentalState) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, state: EnvironmentalState) {
        *self.state.write() = state;
    }

    pub fn update(&self, apply: impl FnOnce(&mut EnvironmentalState)) {
        apply(&mut self.state.write());
    }
}

impl EnvironmentSource for SharedEnvironment {
    fn current(&self) -> EnvironmentalState {
        *self.state.read()
    }
}
