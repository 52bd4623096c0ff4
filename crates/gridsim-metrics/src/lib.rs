//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "gridsimd_starts_total",
            "Total number of times the simulator daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gridsimd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "gridsimd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

/// Per-cycle simulator instrumentation.
#[derive(Clone, Debug)]
pub struct SimulatorMetrics {
    cycles_total: IntCounter,
    cycle_errors_total: IntCounter,
    cycle_duration_seconds: Histogram,
    samples_total: IntCounterVec,
    alarms_total: IntCounterVec,
    active_elements: IntGauge,
    active_alarms: IntGauge,
    outbound_dropped_total: IntCounterVec,
}

impl SimulatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "gridsim_cycles_total",
            "Simulation cycles completed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_errors_total = IntCounter::with_opts(Opts::new(
            "gridsim_cycle_errors_total",
            "Simulation cycles that failed",
        ))?;
        registry.register(Box::new(cycle_errors_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gridsim_cycle_duration_seconds",
                "Wall time spent generating and delivering one cycle",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let samples_total = IntCounterVec::new(
            Opts::new(
                "gridsim_samples_total",
                "Telemetry samples generated by element type",
            ),
            &["element_type"],
        )?;
        registry.register(Box::new(samples_total.clone()))?;

        let alarms_total = IntCounterVec::new(
            Opts::new(
                "gridsim_alarms_total",
                "Alarms raised after deduplication",
            ),
            &["alarm_type", "severity"],
        )?;
        registry.register(Box::new(alarms_total.clone()))?;

        let active_elements = IntGauge::with_opts(Opts::new(
            "gridsim_active_elements",
            "Elements simulated in the last cycle",
        ))?;
        registry.register(Box::new(active_elements.clone()))?;

        let active_alarms = IntGauge::with_opts(Opts::new(
            "gridsim_active_alarms",
            "Distinct element alarms raised within the active window",
        ))?;
        registry.register(Box::new(active_alarms.clone()))?;

        let outbound_dropped_total = IntCounterVec::new(
            Opts::new(
                "gridsim_outbound_dropped_total",
                "Outbound submissions dropped after exhausting retries",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(outbound_dropped_total.clone()))?;

        Ok(Self {
            cycles_total,
            cycle_errors_total,
            cycle_duration_seconds,
            samples_total,
            alarms_total,
            active_elements,
            active_alarms,
            outbound_dropped_total,
        })
    }

    pub fn record_cycle(&self, seconds: f64) {
        self.cycles_total.inc();
        self.cycle_duration_seconds.observe(seconds);
    }

    pub fn record_cycle_error(&self) {
        self.cycle_errors_total.inc();
    }

    pub fn record_samples(&self, element_type: &str, count: usize) {
        self.samples_total
            .with_label_values(&[element_type])
            .inc_by(count as u64);
    }

    pub fn record_alarm(&self, alarm_type: &str, severity: &str) {
        self.alarms_total
            .with_label_values(&[alarm_type, severity])
            .inc();
    }

    pub fn set_active_elements(&self, count: usize) {
        self.active_elements.set(count as i64);
    }

    pub fn set_active_alarms(&self, count: usize) {
        self.active_alarms.set(count as i64);
    }

    /// `kind` is `telemetry` or `alarm`.
    pub fn record_outbound_dropped(&self, kind: &str, count: usize) {
        self.outbound_dropped_total
            .with_label_values(&[kind])
            .inc_by(count as u64);
    }
}

pub use prometheus;
