//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the simulator runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_thermal_dispatch_spread() -> f64 {
    0.2
}

fn default_voltage_noise() -> f64 {
    0.02
}

fn default_frequency_noise() -> f64 {
    0.002
}

fn default_generator_voltage_noise() -> f64 {
    0.01
}

fn default_generator_frequency_sigma() -> f64 {
    0.05
}

fn default_power_factor_noise() -> f64 {
    0.05
}

fn default_load_factor_jitter() -> f64 {
    0.02
}

fn default_tap_sigma() -> f64 {
    0.1
}

fn default_suppression_window() -> Duration {
    Duration::from_secs(300)
}

fn default_active_window() -> Duration {
    Duration::from_secs(1800)
}

fn default_ambient_temperature() -> f64 {
    20.0
}

fn default_wind_speed() -> f64 {
    5.0
}

fn default_solar_irradiance() -> f64 {
    0.8
}

fn default_topology_path() -> PathBuf {
    PathBuf::from("configs/topology.yaml")
}

fn default_event_log() -> PathBuf {
    PathBuf::from("target/gridsim/events.log")
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_publish_capacity() -> usize {
    1024
}

fn default_base_url() -> String {
    "http://localhost:3001".to_owned()
}

fn default_device_id() -> String {
    "gridsim-rtu-01".to_owned()
}

fn default_device_type() -> String {
    "RTU".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_batch_size() -> usize {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the simulator daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub alarms: AlarmConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GRIDSIM_CONFIG";

    /// Load configuration from disk, respecting the `GRIDSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.noise.validate()?;
        self.alarms.validate()?;
        self.outbound.validate(self.sink.mode)?;
        self.logging.validate()?;
        if self.persistence.publish_capacity == 0 {
            return Err(anyhow!("persistence.publish_capacity must be positive"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Tick cadence, seeding, and profile switches.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick_interval: Duration,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_true")]
    pub daily_load_curve: bool,
    #[serde(default = "default_true")]
    pub seasonal_variation: bool,
    #[serde(default = "default_true")]
    pub weather_effects: bool,
    /// Thermal dispatch draws from `Uniform(1 - spread, 1.0)`.
    #[serde(default = "default_thermal_dispatch_spread")]
    pub thermal_dispatch_spread: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            random_seed: None,
            daily_load_curve: true,
            seasonal_variation: true,
            weather_effects: true,
            thermal_dispatch_spread: default_thermal_dispatch_spread(),
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("simulation.tick_interval must be positive"));
        }
        if !(0.0..=1.0).contains(&self.thermal_dispatch_spread) {
            return Err(anyhow!(
                "simulation.thermal_dispatch_spread must lie within [0, 1], got {}",
                self.thermal_dispatch_spread
            ));
        }
        Ok(())
    }
}

/// Noise magnitudes applied by the element simulators. A zero disables the draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    #[serde(default = "default_voltage_noise")]
    pub voltage: f64,
    #[serde(default = "default_frequency_noise")]
    pub frequency: f64,
    #[serde(default = "default_generator_voltage_noise")]
    pub generator_voltage: f64,
    #[serde(default = "default_generator_frequency_sigma")]
    pub generator_frequency_sigma: f64,
    #[serde(default = "default_power_factor_noise")]
    pub power_factor: f64,
    #[serde(default = "default_load_factor_jitter")]
    pub load_factor_jitter: f64,
    #[serde(default = "default_tap_sigma")]
    pub tap_sigma: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            voltage: default_voltage_noise(),
            frequency: default_frequency_noise(),
            generator_voltage: default_generator_voltage_noise(),
            generator_frequency_sigma: default_generator_frequency_sigma(),
            power_factor: default_power_factor_noise(),
            load_factor_jitter: default_load_factor_jitter(),
            tap_sigma: default_tap_sigma(),
        }
    }
}

impl NoiseConfig {
    /// All noise disabled. Used for deterministic runs.
    pub fn silent() -> Self {
        Self {
            voltage: 0.0,
            frequency: 0.0,
            generator_voltage: 0.0,
            generator_frequency_sigma: 0.0,
            power_factor: 0.0,
            load_factor_jitter: 0.0,
            tap_sigma: 0.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let factors = [
            ("voltage", self.voltage),
            ("frequency", self.frequency),
            ("generator_voltage", self.generator_voltage),
            ("generator_frequency_sigma", self.generator_frequency_sigma),
            ("power_factor", self.power_factor),
            ("load_factor_jitter", self.load_factor_jitter),
            ("tap_sigma", self.tap_sigma),
        ];
        for (name, value) in factors {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("noise.{} must be a non-negative number", name));
            }
        }
        Ok(())
    }
}

/// Alarm suppression windows and threshold overrides.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_suppression_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub suppression_window: Duration,
    #[serde(default = "default_active_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub active_window: Duration,
    #[serde(default)]
    pub thresholds: AlarmThresholds,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            suppression_window: default_suppression_window(),
            active_window: default_active_window(),
            thresholds: AlarmThresholds::default(),
        }
    }
}

impl AlarmConfig {
    fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if t.voltage_low >= t.voltage_high {
            return Err(anyhow!(
                "alarms.thresholds.voltage_low ({}) must be below voltage_high ({})",
                t.voltage_low,
                t.voltage_high
            ));
        }
        if t.frequency_low >= t.frequency_high {
            return Err(anyhow!(
                "alarms.thresholds.frequency_low ({}) must be below frequency_high ({})",
                t.frequency_low,
                t.frequency_high
            ));
        }
        if t.line_critical_pct < t.line_overload_pct {
            return Err(anyhow!(
                "alarms.thresholds.line_critical_pct must not be below line_overload_pct"
            ));
        }
        Ok(())
    }
}

/// Threshold set evaluated by the alarm checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmThresholds {
    /// Per-unit ratio of measured to nominal bus voltage.
    pub voltage_high: f64,
    pub voltage_low: f64,
    pub frequency_high: f64,
    pub frequency_low: f64,
    pub generator_overload_pct: f64,
    pub line_overload_pct: f64,
    pub line_critical_pct: f64,
    pub line_temperature_c: f64,
    pub oil_temperature_c: f64,
    pub transformer_overload_pct: f64,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            voltage_high: 1.05,
            voltage_low: 0.95,
            frequency_high: 50.5,
            frequency_low: 49.5,
            generator_overload_pct: 95.0,
            line_overload_pct: 90.0,
            line_critical_pct: 95.0,
            line_temperature_c: 80.0,
            oil_temperature_c: 85.0,
            transformer_overload_pct: 90.0,
        }
    }
}

/// Static weather inputs used when no external feed is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_ambient_temperature")]
    pub ambient_temperature_c: f64,
    #[serde(default = "default_wind_speed")]
    pub wind_speed_ms: f64,
    #[serde(default = "default_solar_irradiance")]
    pub solar_irradiance: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            ambient_temperature_c: default_ambient_temperature(),
            wind_speed_ms: default_wind_speed(),
            solar_irradiance: default_solar_irradiance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_topology_path")]
    pub path: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            path: default_topology_path(),
        }
    }
}

/// Delivery path for telemetry and alarms. Both travel the same way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SinkMode {
    #[default]
    PersistPublish,
    OutboundApi,
}

impl std::str::FromStr for SinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "persist-publish" | "persist" => Ok(SinkMode::PersistPublish),
            "outbound-api" | "outbound" | "field-device" => Ok(SinkMode::OutboundApi),
            other => Err(format!("unknown sink mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub mode: SinkMode,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,
    #[serde(default = "default_cache_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cache_ttl: Duration,
    #[serde(default = "default_publish_capacity")]
    pub publish_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            event_log: default_event_log(),
            cache_ttl: default_cache_ttl(),
            publish_capacity: default_publish_capacity(),
        }
    }
}

/// Field-device client settings used when `sink.mode = "outbound-api"`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay", rename = "retry_base_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_base_delay: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            device_id: default_device_id(),
            device_type: default_device_type(),
            location: None,
            service_key: None,
            request_timeout: default_request_timeout(),
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay: default_retry_base_delay(),
        }
    }
}

impl OutboundConfig {
    /// Parse the configured base URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .with_context(|| format!("outbound.base_url '{}' is not a valid URL", self.base_url))
    }

    fn validate(&self, mode: SinkMode) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("outbound.batch_size must be positive"));
        }
        if self.retry_attempts == 0 {
            return Err(anyhow!("outbound.retry_attempts must be at least 1"));
        }
        if mode == SinkMode::OutboundApi {
            self.base_url()?;
            if self.device_id.trim().is_empty() {
                return Err(anyhow!("outbound.device_id must not be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter used when neither `GRIDSIM_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            stdout: true,
            file: true,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        crate::logging::parse_directive(&self.level).context("logging.level")?;
        if !self.stdout && !self.file {
            return Err(anyhow!("logging needs at least one of stdout or file enabled"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.simulation.tick_interval, Duration::from_secs(5));
        assert_eq!(config.alarms.suppression_window, Duration::from_secs(300));
        assert_eq!(config.sink.mode, SinkMode::PersistPublish);
        assert_eq!(config.outbound.batch_size, 100);
        assert!((config.noise.voltage - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_sections_and_overrides() {
        let config: AppConfig = r#"
            [simulation]
            tick_interval = 2
            random_seed = 7
            seasonal_variation = false

            [alarms]
            suppression_window = 60

            [alarms.thresholds]
            oil_temperature_c = 90.0

            [sink]
            mode = "outbound-api"

            [outbound]
            base_url = "http://backend.local:3001"
            batch_size = 10
            retry_base_delay_ms = 250
        "#
        .parse()
        .unwrap();

        assert_eq!(config.simulation.tick_interval, Duration::from_secs(2));
        assert_eq!(config.simulation.random_seed, Some(7));
        assert!(!config.simulation.seasonal_variation);
        assert!(config.simulation.daily_load_curve);
        assert_eq!(config.alarms.suppression_window, Duration::from_secs(60));
        assert!((config.alarms.thresholds.oil_temperature_c - 90.0).abs() < f64::EPSILON);
        assert!((config.alarms.thresholds.voltage_high - 1.05).abs() < f64::EPSILON);
        assert_eq!(config.sink.mode, SinkMode::OutboundApi);
        assert_eq!(config.outbound.batch_size, 10);
        assert_eq!(config.outbound.retry_base_delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_inverted_voltage_thresholds() {
        let err = r#"
            [alarms.thresholds]
            voltage_high = 0.9
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("voltage_low"));
    }

    #[test]
    fn rejects_invalid_outbound_url_only_in_outbound_mode() {
        let persist = r#"
            [outbound]
            base_url = "not a url"
        "#
        .parse::<AppConfig>();
        assert!(persist.is_ok());

        let outbound = r#"
            [sink]
            mode = "outbound-api"
            [outbound]
            base_url = "not a url"
        "#
        .parse::<AppConfig>();
        assert!(outbound.is_err());
    }

    #[test]
    fn rejects_zero_tick_interval() {
        assert!("[simulation]\ntick_interval = 0\n".parse::<AppConfig>().is_err());
    }

    #[test]
    fn logging_section_is_validated() {
        let config: AppConfig = "[logging]\nlevel = \"info,gridsim_engine=debug\"\nstdout = false\n"
            .parse()
            .unwrap();
        assert!(config.logging.file);
        assert!(!config.logging.stdout);

        assert!("[logging]\nlevel = \"gridsim_engine=loud\"\n".parse::<AppConfig>().is_err());
        assert!("[logging]\nstdout = false\nfile = false\n".parse::<AppConfig>().is_err());
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("gridsim.toml");
        let mut file = std::fs::File::create(&present).unwrap();
        writeln!(file, "[simulation]\ntick_interval = 3").unwrap();

        let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.simulation.tick_interval, Duration::from_secs(3));
    }
}
