//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the grid telemetry simulator daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gridsim_api::{spawn_api_server, ApiServer, ApiState};
use gridsim_common::{init_tracing, AppConfig, SharedClock, SinkMode, SystemClock, VersionInfo};
use gridsim_core::{
    FileTopology, PersistPublishSink, RestFieldDevice, SharedTelemetryCache,
    SimulatorOrchestrator, SimulatorSinks, TelemetryBroadcaster, TopologySource,
};
use gridsim_engine::{
    ElementStatus, ElementType, EnvironmentalState, SharedEnvironmentSource, StaticEnvironment,
};
use gridsim_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use gridsim_persistence::PersistenceMetrics;
use indexmap::IndexMap;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Synthetic power-grid telemetry simulator",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Override the topology file (JSON or YAML)")]
    topology: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the telemetry sink")]
    sink: Option<CliSink>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSink {
    PersistPublish,
    OutboundApi,
}

impl From<CliSink> for SinkMode {
    fn from(value: CliSink) -> Self {
        match value {
            CliSink::PersistPublish => SinkMode::PersistPublish,
            CliSink::OutboundApi => SinkMode::OutboundApi,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulator")]
    Run,
    #[command(about = "Load configuration and topology, then print element counts")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gridsim.toml"));
    candidates.push(PathBuf::from("configs/gridsim.dev.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let config_path = loaded_config.source;
    let load_duration = load_started.elapsed();

    if let Some(path) = cli.topology {
        config.topology.path = path;
    }
    if let Some(sink) = cli.sink {
        config.sink.mode = sink.into();
    }
    config
        .validate()
        .context("configuration invalid after command-line overrides")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let metrics_registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

            let logging = init_tracing("gridsimd", &config.logging)?;
            info!(
                service = %logging.service,
                config_path = %config_path.display(),
                version = %version.cli_string(),
                "configuration loaded"
            );
            run_daemon(config, Some(metrics_registry)).await?
        }
        Commands::Validate => validate(&config, &config_path).await?,
    }

    Ok(())
}

async fn validate(config: &AppConfig, config_path: &std::path::Path) -> Result<()> {
    let topology = FileTopology::new(config.topology.path.clone());
    let elements = topology
        .load_elements()
        .await
        .with_context(|| format!("failed to load topology {}", topology.path().display()))?;

    let mut by_type: IndexMap<ElementType, IndexMap<ElementStatus, usize>> = IndexMap::new();
    for element in &elements {
        *by_type
            .entry(element.element_type)
            .or_default()
            .entry(element.status)
            .or_default() += 1;
    }

    println!("Config: {}", config_path.display());
    println!("Topology: {}", topology.path().display());
    println!("Sink: {:?}", config.sink.mode);
    println!("Elements: {}", elements.len());
    for (element_type, statuses) in &by_type {
        let total: usize = statuses.values().sum();
        let detail = statuses
            .iter()
            .map(|(status, count)| format!("{status}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {element_type:<12} {total:>5}  ({detail})");
    }
    Ok(())
}

async fn run_daemon(config: AppConfig, mut metrics_registry: Option<SharedRegistry>) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let api_settings = config.api.clone();

    let metrics_server = if metrics_settings.enabled {
        match metrics_registry.clone() {
            Some(registry) => {
                info!(address = %metrics_settings.listen, "metrics exporter enabled");
                Some(spawn_http_server(registry, metrics_settings.listen)?)
            }
            None => {
                warn!("metrics exporter requested but no registry available");
                None
            }
        }
    } else {
        metrics_registry = None;
        info!("metrics exporter disabled by configuration");
        None
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let environment: SharedEnvironmentSource = Arc::new(StaticEnvironment(
        EnvironmentalState::from(&config.environment),
    ));
    let topology = FileTopology::new(config.topology.path.clone());

    let mut live: Option<(SharedTelemetryCache, TelemetryBroadcaster)> = None;
    let sinks = match config.sink.mode {
        SinkMode::PersistPublish => {
            let broadcaster = TelemetryBroadcaster::new(config.persistence.publish_capacity);
            let mut sink =
                PersistPublishSink::open(&config.persistence, broadcaster.clone(), clock.clone())
                    .with_context(|| {
                        format!(
                            "failed to open event log {}",
                            config.persistence.event_log.display()
                        )
                    })?;
            if let Some(registry) = &metrics_registry {
                sink = sink.with_metrics(PersistenceMetrics::new(registry.clone())?);
            }
            let sink = Arc::new(sink);
            live = Some((sink.cache(), broadcaster));
            SimulatorSinks::persist_publish(sink)
        }
        SinkMode::OutboundApi => {
            let device = RestFieldDevice::from_config(&config.outbound)?;
            info!(
                base_url = %config.outbound.base_url,
                device_id = %device.device_id(),
                batch_size = config.outbound.batch_size,
                "outbound field-device sink enabled"
            );
            SimulatorSinks::outbound(Arc::new(device), &config.outbound)
        }
    };

    let orchestrator = SimulatorOrchestrator::initialize(
        config,
        &topology,
        sinks,
        clock,
        environment,
        metrics_registry.clone(),
    )
    .await?;
    let handle = orchestrator.start();

    let mut api_server: Option<ApiServer> = None;
    if api_settings.enabled {
        let mut state = ApiState::new(handle.status()).with_stop_signal(handle.stop_signal());
        if let Some((cache, broadcaster)) = live {
            state = state.with_cache(cache).with_broadcaster(broadcaster);
        }
        match spawn_api_server(Arc::new(state), api_settings.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("ctrl-c received; shutting down");
        }
        _ = terminate() => info!("SIGTERM received; shutting down"),
        _ = handle.stopped() => info!("stop requested over api; shutting down"),
    }
    handle.shutdown().await?;

    if let Some(server) = api_server {
        server.shutdown().await?;
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "unable to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
