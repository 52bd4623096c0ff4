//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "End-to-end checks of the simulator HTTP and WebSocket surface."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use gridsim_api::{spawn_api_server, ApiServer, ApiState};
use gridsim_common::{AppConfig, ManualClock};
use gridsim_core::{
    PersistPublishSink, SimulatorOrchestrator, SimulatorSinks, StaticTopology,
    TelemetryBroadcaster,
};
use gridsim_engine::{Element, ElementType, StaticEnvironment};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

struct Fixture {
    orchestrator: SimulatorOrchestrator,
    state: ApiState,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap(),
    ));
    let mut config = AppConfig::default();
    config.simulation.random_seed = Some(5);
    config.simulation.tick_interval = Duration::from_millis(25);

    let broadcaster = TelemetryBroadcaster::new(64);
    let sink = Arc::new(
        PersistPublishSink::open_at(
            &dir.path().join("events.jsonl"),
            Duration::from_secs(3600),
            broadcaster.clone(),
            clock.clone(),
        )
        .unwrap(),
    );
    let cache = sink.cache();
    let orchestrator = SimulatorOrchestrator::initialize(
        config,
        &StaticTopology::new(vec![
            Element::new("bus-1", ElementType::Bus).with_voltage_level(110.0),
            Element::new("gen-1", ElementType::Generator).with_capacity(120.0),
        ]),
        SimulatorSinks::persist_publish(sink),
        clock,
        Arc::new(StaticEnvironment::default()),
        None,
    )
    .await
    .unwrap();

    let state = ApiState::new(orchestrator.status())
        .with_cache(cache)
        .with_broadcaster(broadcaster);
    Fixture {
        orchestrator,
        state,
        _dir: dir,
    }
}

fn serve(state: ApiState) -> ApiServer {
    spawn_api_server(Arc::new(state), "127.0.0.1:0".parse().unwrap()).unwrap()
}

#[tokio::test]
async fn status_and_latest_telemetry_are_served() {
    let fixture = fixture().await;
    fixture.orchestrator.run_cycle().await.unwrap();
    let server = serve(fixture.state);
    let base = format!("http://{}", server.addr());
    let client = reqwest::Client::new();

    let index: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(index["service"], "gridsim");
    assert_eq!(index["endpoints"]["health"], "GET /health");

    let status: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["simulator"]["update_count"], 1);
    assert_eq!(status["simulator"]["telemetry_sent"], 2);
    assert_eq!(status["simulator"]["total_elements"], 2);
    assert_eq!(status["configuration"]["sink_mode"], "persist-publish");
    assert_eq!(status["configuration"]["batch_size"], 100);

    let latest: Value = client
        .get(format!("{base}/api/telemetry/latest"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["count"], 2);

    let bus: Value = client
        .get(format!("{base}/api/telemetry/latest/bus-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bus["element_id"], "bus-1");
    assert_eq!(bus["element_type"], "Bus");
    assert!(bus["voltage"].as_f64().unwrap() > 100.0);

    let missing = client
        .get(format!("{base}/api/telemetry/latest/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn health_follows_run_state_and_stop_is_accepted() {
    let fixture = fixture().await;
    let handle = fixture.orchestrator.start();
    let server = serve(fixture.state.with_stop_signal(handle.stop_signal()));
    let base = format!("http://{}", server.addr());
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["phase"], "running");

    let stop = client
        .post(format!("{base}/control/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status(), reqwest::StatusCode::ACCEPTED);
    timeout(Duration::from_secs(2), handle.stopped())
        .await
        .expect("simulator stops");

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["phase"], "stopped");

    server.shutdown().await.unwrap();
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn websocket_filters_events_by_element() {
    let fixture = fixture().await;
    let server = serve(fixture.state);
    let url = format!("ws://{}/ws", server.addr());
    let (mut socket, _response) = connect_async(&url).await.unwrap();

    socket
        .send(WsMessage::Text(
            json!({ "action": "subscribe", "elements": ["gen-1"] }).to_string(),
        ))
        .await
        .unwrap();
    sleep(Duration::from_millis(30)).await;

    fixture.orchestrator.run_cycle().await.unwrap();

    let mut events = Vec::new();
    while let Ok(Some(message)) = timeout(Duration::from_millis(200), socket.next()).await {
        match message.unwrap() {
            WsMessage::Text(payload) => {
                events.push(serde_json::from_str::<Value>(&payload).unwrap());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    assert!(!events.is_empty());
    assert!(events.iter().all(|event| event["element_id"] == "gen-1"));
    let telemetry = events
        .iter()
        .find(|event| event["event"] == "telemetry:update")
        .expect("telemetry event for the subscribed element");
    assert_eq!(telemetry["data"]["type"], "Generator");
    server.shutdown().await.unwrap();
}
