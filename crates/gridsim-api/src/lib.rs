//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP surface for health, status, latest telemetry, and control."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---

mod ws;

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gridsim_common::SinkMode;
use gridsim_core::{
    RunPhase, RunState, SharedTelemetryCache, StatusHandle, StopSignal, TelemetryBroadcaster,
};
use gridsim_engine::TelemetrySample;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const SERVICE_NAME: &str = "gridsim";

/// Shared API state exposed to handlers.
pub struct ApiState {
    status: StatusHandle,
    cache: Option<SharedTelemetryCache>,
    broadcaster: Option<TelemetryBroadcaster>,
    stop: Option<StopSignal>,
}

impl ApiState {
    pub fn new(status: StatusHandle) -> Self {
        Self {
            status,
            cache: None,
            broadcaster: None,
            stop: None,
        }
    }

    /// Latest-sample cache; only present in persist-publish mode.
    pub fn with_cache(mut self, cache: SharedTelemetryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: TelemetryBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.status.engine().now()
    }

    fn version_string(&self) -> String {
        self.status.version().cli_string()
    }

    fn status_report(&self) -> StatusResponse {
        let now = self.now();
        let state = self.status.get_run_state();
        let config = self.status.config();
        let engine = self.status.engine();
        StatusResponse {
            service: ServiceBlock {
                name: SERVICE_NAME,
                version: self.version_string(),
                git_commit: self.status.version().git_sha.clone(),
                uptime_seconds: state.uptime(now).as_secs(),
                timestamp: now,
            },
            simulator: SimulatorBlock {
                active_alarms: self.status.get_active_alarm_count(),
                total_elements: engine.element_count(),
                load_factor: engine.current_load_factor(),
                state,
            },
            configuration: ConfigurationBlock {
                tick_interval_seconds: config.simulation.tick_interval.as_secs_f64(),
                batch_size: config.outbound.batch_size,
                daily_load_curve: config.simulation.daily_load_curve,
                seasonal_variation: config.simulation.seasonal_variation,
                weather_effects: config.simulation.weather_effects,
                sink_mode: self.status.sink_mode(),
            },
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("sink_mode", &self.status.sink_mode())
            .field("cache", &self.cache.is_some())
            .field("broadcaster", &self.broadcaster.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(get_index))
        .route("/health", get(get_health))
        .route("/api/status", get(get_status))
        .route("/api/telemetry/latest", get(get_latest))
        .route("/api/telemetry/latest/:element_id", get(get_latest_for))
        .route("/ws", get(ws::upgrade_handler))
        .route("/control/stop", post(post_stop))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the API. Port 0 binds an ephemeral port reported by [`ApiServer::addr`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct ServiceBlock {
    name: &'static str,
    version: String,
    git_commit: String,
    uptime_seconds: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SimulatorBlock {
    #[serde(flatten)]
    state: RunState,
    active_alarms: usize,
    total_elements: usize,
    load_factor: f64,
}

#[derive(Debug, Serialize)]
struct ConfigurationBlock {
    tick_interval_seconds: f64,
    batch_size: usize,
    daily_load_curve: bool,
    seasonal_variation: bool,
    weather_effects: bool,
    sink_mode: SinkMode,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    service: ServiceBlock,
    simulator: SimulatorBlock,
    configuration: ConfigurationBlock,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    phase: RunPhase,
    uptime_seconds: u64,
    version: String,
    timestamp: DateTime<Utc>,
    state: RunState,
}

#[derive(Debug, Serialize)]
struct LatestResponse {
    count: usize,
    samples: Vec<TelemetrySample>,
}

#[derive(Debug, Serialize)]
struct StopAck {
    stopping: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn cache_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "latest telemetry is only cached in persist-publish mode",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn get_index(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "description": "Synthetic power-grid telemetry simulator",
        "version": state.version_string(),
        "endpoints": {
            "health": "GET /health",
            "status": "GET /api/status",
            "latest": "GET /api/telemetry/latest",
            "latest_element": "GET /api/telemetry/latest/:element_id",
            "events": "GET /ws",
            "stop": "POST /control/stop",
        },
    }))
}

async fn get_health(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<HealthResponse>) {
    let now = state.now();
    let run_state = state.status.get_run_state();
    let (code, label) = if run_state.is_running {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    let body = HealthResponse {
        status: label,
        phase: run_state.phase,
        uptime_seconds: run_state.uptime(now).as_secs(),
        version: state.version_string(),
        timestamp: now,
        state: run_state,
    };
    (code, Json(body))
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status_report())
}

async fn get_latest(State(state): State<Arc<ApiState>>) -> Result<Json<LatestResponse>, ApiError> {
    let cache = state.cache.as_ref().ok_or_else(ApiError::cache_unavailable)?;
    let samples: Vec<TelemetrySample> = cache
        .entries(state.now())
        .into_iter()
        .map(|(_, sample)| sample)
        .collect();
    Ok(Json(LatestResponse {
        count: samples.len(),
        samples,
    }))
}

async fn get_latest_for(
    State(state): State<Arc<ApiState>>,
    Path(element_id): Path<String>,
) -> Result<Json<TelemetrySample>, ApiError> {
    let cache = state.cache.as_ref().ok_or_else(ApiError::cache_unavailable)?;
    cache
        .get(&element_id, state.now())
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("no telemetry for element `{element_id}`"),
            )
        })
}

async fn post_stop(
    State(state): State<Arc<ApiState>>,
) -> Result<(StatusCode, Json<StopAck>), ApiError> {
    let stop = state.stop.as_ref().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "simulator control unavailable")
    })?;
    let stopping = stop.request_stop();
    info!(stopping, "stop requested over http");
    Ok((StatusCode::ACCEPTED, Json(StopAck { stopping })))
}
