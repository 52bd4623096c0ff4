//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the simulator runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the grid telemetry simulator workspace.
//! This crate exposes configuration loading, logging, clocks, and
//! version metadata consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;
pub mod version;

pub use config::{
    AlarmConfig, AlarmThresholds, ApiConfig, AppConfig, EnvironmentConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, NoiseConfig, OutboundConfig, PersistenceConfig, SimulationConfig,
    SinkConfig, SinkMode, TopologyConfig,
};
pub use logging::{init_tracing, FilterSource, LogFormat, LoggingHandle};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};
pub use version::VersionInfo;
