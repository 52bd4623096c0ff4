//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry generation engine for synthetic grid elements."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
pub mod alarm;
pub mod engine;
pub mod environment;
pub mod model;
pub mod profile;
pub mod sample;
pub mod simulators;

pub use alarm::{Alarm, AlarmCandidate, AlarmEvaluator, AlarmKind, Severity};
pub use engine::{ElementOutcome, EngineError, EngineSettings, TelemetryEngine};
pub use environment::{
    EnvironmentSource, EnvironmentalState, SharedEnvironment, SharedEnvironmentSource,
    StaticEnvironment,
};
pub use model::{
    BaseSnapshot, BaseValues, Element, ElementStatus, ElementType, FuelType, LoadPriority,
    Position,
};
pub use profile::{daily_load_curve, LoadProfile, SeasonalFactors};
pub use sample::{
    BusReading, GeneratorReading, LineReading, LoadReading, Reading, TelemetrySample,
    TransformerReading,
};
