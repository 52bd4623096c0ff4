//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Cycle orchestrator driving the engine and telemetry sinks."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gridsim_common::{AppConfig, OutboundConfig, SharedClock, SinkMode, VersionInfo};
use gridsim_engine::{
    Alarm, ElementType, EngineSettings, SharedEnvironmentSource, TelemetryEngine, TelemetrySample,
};
use gridsim_metrics::{SharedRegistry, SimulatorMetrics};
use indexmap::IndexMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::outbound::OutboundDispatcher;
use crate::persist::PersistPublishSink;
use crate::schedule::RateLimiter;
use crate::sink::{AlarmSink, FieldDeviceAlarmSink, FieldDeviceApi, TelemetrySink};
use crate::state::{RunState, RunStateCell};
use crate::topology::TopologySource;

/// How a cycle's telemetry leaves the process.
#[derive(Clone)]
pub enum TelemetryDelivery {
    /// One `persist_and_publish` call per cycle.
    PersistPublish(Arc<dyn TelemetrySink>),
    /// Buffered submissions flushed every `batch_size` samples.
    Outbound(OutboundDispatcher),
}

/// Telemetry and alarm targets, selected together by the sink mode.
#[derive(Clone)]
pub struct SimulatorSinks {
    telemetry: TelemetryDelivery,
    alarms: Arc<dyn AlarmSink>,
}

impl SimulatorSinks {
    pub fn persist_publish(sink: Arc<PersistPublishSink>) -> Self {
        Self {
            telemetry: TelemetryDelivery::PersistPublish(sink.clone()),
            alarms: sink,
        }
    }

    pub fn outbound(device: Arc<dyn FieldDeviceApi>, config: &OutboundConfig) -> Self {
        Self {
            telemetry: TelemetryDelivery::Outbound(OutboundDispatcher::new(device.clone(), config)),
            alarms: Arc::new(FieldDeviceAlarmSink::new(device)),
        }
    }

    pub fn custom(telemetry: Arc<dyn TelemetrySink>, alarms: Arc<dyn AlarmSink>) -> Self {
        Self {
            telemetry: TelemetryDelivery::PersistPublish(telemetry),
            alarms,
        }
    }

    pub fn mode(&self) -> SinkMode {
        match self.telemetry {
            TelemetryDelivery::PersistPublish(_) => SinkMode::PersistPublish,
            TelemetryDelivery::Outbound(_) => SinkMode::OutboundApi,
        }
    }

    fn attach_metrics(&mut self, metrics: &SimulatorMetrics) {
        if let TelemetryDelivery::Outbound(dispatcher) = &mut self.telemetry {
            *dispatcher = dispatcher.clone().with_metrics(metrics.clone());
        }
    }
}

impl std::fmt::Debug for SimulatorSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorSinks")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub samples: usize,
    pub alarms: usize,
    /// Outbound samples dropped after the retry ceiling.
    pub dropped: usize,
    pub duration: Duration,
}

/// Read-only view used by the health and status surfaces.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    state: RunStateCell,
    engine: Arc<TelemetryEngine>,
    config: Arc<AppConfig>,
    sink_mode: SinkMode,
    version: VersionInfo,
}

impl StatusHandle {
    pub fn get_run_state(&self) -> RunState {
        self.state.snapshot()
    }

    pub fn get_active_alarm_count(&self) -> usize {
        self.engine.active_alarm_count()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sink_mode(&self) -> SinkMode {
        self.sink_mode
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn engine(&self) -> &TelemetryEngine {
        &self.engine
    }
}

/// Requests a running orchestrator to stop after its in-flight cycle.
#[derive(Debug, Clone)]
pub struct StopSignal {
    sender: broadcast::Sender<()>,
}

impl StopSignal {
    /// Returns false when the loop has already exited.
    pub fn request_stop(&self) -> bool {
        self.sender.send(()).is_ok()
    }
}

/// Owns the engine and sinks until started.
#[derive(Debug)]
pub struct SimulatorOrchestrator {
    config: Arc<AppConfig>,
    engine: Arc<TelemetryEngine>,
    sinks: SimulatorSinks,
    state: RunStateCell,
    metrics: Option<SimulatorMetrics>,
    version: VersionInfo,
}

impl SimulatorOrchestrator {
    /// Load the topology and build the engine. A topology failure is fatal.
    pub async fn initialize(
        config: AppConfig,
        topology: &dyn TopologySource,
        mut sinks: SimulatorSinks,
        clock: SharedClock,
        environment: SharedEnvironmentSource,
        registry: Option<SharedRegistry>,
    ) -> Result<Self> {
        let elements = topology
            .load_elements()
            .await
            .context("failed to load grid topology")?;

        let metrics = match &registry {
            Some(registry) => Some(SimulatorMetrics::new(registry.clone())?),
            None => None,
        };
        if let Some(metrics) = &metrics {
            sinks.attach_metrics(metrics);
        }

        let engine = Arc::new(TelemetryEngine::new(
            EngineSettings::from_config(&config),
            &elements,
            clock,
            environment,
        ));
        let state = RunStateCell::new();
        state.set_active_elements(engine.active_element_count());
        if let Some(metrics) = &metrics {
            metrics.set_active_elements(engine.active_element_count());
        }

        let mut by_type: IndexMap<ElementType, usize> = IndexMap::new();
        for snapshot in engine.snapshots() {
            *by_type.entry(snapshot.element_type()).or_default() += 1;
        }
        info!(
            elements = engine.element_count(),
            active = engine.active_element_count(),
            by_type = ?by_type,
            sink = ?sinks.mode(),
            "simulator initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            sinks,
            state,
            metrics,
            version: VersionInfo::current(),
        })
    }

    pub fn engine(&self) -> Arc<TelemetryEngine> {
        self.engine.clone()
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            state: self.state.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            sink_mode: self.sinks.mode(),
            version: self.version.clone(),
        }
    }

    /// Generate and deliver telemetry for every active element once.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        self.engine.roll_profile();

        let mut report = CycleReport::default();
        let mut per_type: IndexMap<ElementType, usize> = IndexMap::new();
        let mut batch: Vec<TelemetrySample> = Vec::new();

        for snapshot in self.engine.active_snapshots() {
            let outcome = self.engine.simulate_snapshot(snapshot);
            for alarm in &outcome.alarms {
                self.deliver_alarm(alarm).await;
            }
            report.alarms += outcome.alarms.len();
            report.samples += 1;
            *per_type.entry(outcome.sample.element_type()).or_default() += 1;
            batch.push(outcome.sample);

            if let TelemetryDelivery::Outbound(dispatcher) = &self.sinks.telemetry {
                if batch.len() >= dispatcher.batch_size() {
                    report.dropped += dispatcher.flush(std::mem::take(&mut batch)).await.dropped;
                }
            }
        }

        match &self.sinks.telemetry {
            TelemetryDelivery::PersistPublish(sink) => {
                sink.persist_and_publish(&batch)
                    .await
                    .context("failed to persist telemetry batch")?;
            }
            TelemetryDelivery::Outbound(dispatcher) => {
                if !batch.is_empty() {
                    report.dropped += dispatcher.flush(batch).await.dropped;
                }
            }
        }

        report.duration = started.elapsed();
        self.state
            .record_cycle(self.engine.now(), report.duration, report.samples);
        report.cycle = self.state.snapshot().update_count;

        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(report.duration.as_secs_f64());
            for (element_type, count) in &per_type {
                metrics.record_samples(element_type.as_ref(), *count);
            }
            metrics.set_active_elements(report.samples);
            metrics.set_active_alarms(self.engine.active_alarm_count());
        }
        self.state.set_active_elements(report.samples);
        Ok(report)
    }

    async fn deliver_alarm(&self, alarm: &Alarm) {
        if let Err(err) = self.sinks.alarms.persist_and_publish(alarm).await {
            warn!(
                alarm_id = %alarm.id,
                element_id = %alarm.element_id,
                error = %err,
                "alarm delivery failed"
            );
            if let (Some(metrics), SinkMode::OutboundApi) = (&self.metrics, self.sinks.mode()) {
                metrics.record_outbound_dropped("alarm", 1);
            }
        }
        self.state.record_alarm();
        if let Some(metrics) = &self.metrics {
            metrics.record_alarm(alarm.alarm_type.as_ref(), alarm.severity.as_ref());
        }
    }

    /// Spawn the cycle loop. Consumes the orchestrator; restarting requires a fresh initialize.
    pub fn start(self) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let status = self.status();
        self.state.mark_running(self.engine.now());
        info!(
            interval_ms = self.config.simulation.tick_interval.as_millis() as u64,
            version = %self.version.cli_string(),
            "simulator started"
        );

        let task = tokio::spawn(async move {
            self.run_loop(shutdown_rx).await;
            let _ = stopped_tx.send(true);
        });

        OrchestratorHandle {
            shutdown: shutdown_tx,
            stopped: stopped_rx,
            task,
            status,
        }
    }

    async fn run_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut limiter = RateLimiter::new(self.config.simulation.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("simulator stop requested");
                    break;
                }
                _ = limiter.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => info!(
                            cycle = report.cycle,
                            samples = report.samples,
                            alarms = report.alarms,
                            dropped = report.dropped,
                            duration_ms = report.duration.as_secs_f64() * 1000.0,
                            "simulation cycle completed"
                        ),
                        Err(err) => {
                            self.state.record_error();
                            if let Some(metrics) = &self.metrics {
                                metrics.record_cycle_error();
                            }
                            error!(error = ?err, "simulation cycle failed");
                        }
                    }
                }
            }
        }
        self.state.mark_stopped();
        let state = self.state.snapshot();
        info!(
            cycles = state.update_count,
            errors = state.error_count,
            telemetry_sent = state.telemetry_sent,
            alarms = state.alarms_generated,
            "simulator stopped"
        );
    }
}

/// Handle to the spawned cycle loop.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: broadcast::Sender<()>,
    stopped: watch::Receiver<bool>,
    task: JoinHandle<()>,
    status: StatusHandle,
}

impl OrchestratorHandle {
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            sender: self.shutdown.clone(),
        }
    }

    /// Resolves once the loop has exited, whoever requested the stop.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped.clone();
        let _ = stopped.wait_for(|done| *done).await;
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .context("simulator loop task failed to join")?;
        Ok(())
    }
}
