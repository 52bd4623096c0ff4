//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shipped configuration and topology driven through the full simulator pipeline."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use gridsim_common::{AppConfig, ManualClock, SinkMode};
use gridsim_core::{
    FileTopology, PersistPublishSink, SimulatorOrchestrator, SimulatorSinks,
    TelemetryBroadcaster, TopologySource,
};
use gridsim_engine::{ElementStatus, ElementType, EnvironmentalState, StaticEnvironment};
use gridsim_persistence::{replay_event_log, EventKind};

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

fn read(path: &str) -> String {
    let full = repo_path(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn shipped_files_carry_frontmatter() {
    for file in ["configs/gridsim.dev.toml", "configs/topology.yaml"] {
        let content = read(file);
        assert!(
            content.starts_with("# ---"),
            "{file} must include frontmatter header"
        );
        assert!(content.contains("ems_description"), "{file} lacks a description");
    }
}

#[test]
fn dev_profile_parses_and_validates() {
    let config: AppConfig = read("configs/gridsim.dev.toml").parse().unwrap();
    config.validate().unwrap();
    assert_eq!(config.sink.mode, SinkMode::PersistPublish);
    assert_eq!(config.simulation.tick_interval, Duration::from_secs(5));
    assert_eq!(config.outbound.retry_base_delay, Duration::from_secs(1));
    assert_eq!(config.topology.path, PathBuf::from("configs/topology.yaml"));
}

#[tokio::test]
async fn sample_topology_covers_every_element_type() {
    let elements = FileTopology::new(repo_path("configs/topology.yaml"))
        .load_elements()
        .await
        .unwrap();
    assert_eq!(elements.len(), 10);
    for element_type in [
        ElementType::Bus,
        ElementType::Generator,
        ElementType::Load,
        ElementType::Line,
        ElementType::Transformer,
    ] {
        assert!(
            elements.iter().any(|e| e.element_type == element_type),
            "missing {element_type}"
        );
    }
    assert_eq!(
        elements
            .iter()
            .filter(|e| e.status != ElementStatus::Active)
            .count(),
        1
    );
}

#[tokio::test]
async fn pipeline_writes_every_active_element_each_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let mut config: AppConfig = read("configs/gridsim.dev.toml").parse().unwrap();
    config.persistence.event_log = log_path.clone();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 18, 30, 0).unwrap(),
    ));
    let sink = Arc::new(
        PersistPublishSink::open(
            &config.persistence,
            TelemetryBroadcaster::new(config.persistence.publish_capacity),
            clock.clone(),
        )
        .unwrap(),
    );
    let cache = sink.cache();
    let environment = Arc::new(StaticEnvironment(EnvironmentalState::from(
        &config.environment,
    )));
    let orchestrator = SimulatorOrchestrator::initialize(
        config,
        &FileTopology::new(repo_path("configs/topology.yaml")),
        SimulatorSinks::persist_publish(sink),
        clock.clone(),
        environment,
        None,
    )
    .await
    .unwrap();

    for _ in 0..3 {
        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.samples, 9);
        clock.advance(Duration::from_secs(5));
    }

    let mut sequences = Vec::new();
    let mut telemetry = 0;
    let mut alarms = 0;
    replay_event_log(&log_path, |entry| {
        sequences.push(entry.sequence);
        match entry.kind {
            EventKind::Telemetry => {
                assert_ne!(entry.payload["element_id"], "load-suburb-east");
                telemetry += 1;
            }
            EventKind::Alarm => alarms += 1,
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(telemetry, 27);
    assert!(sequences.windows(2).all(|pair| pair[1] == pair[0] + 1));
    assert_eq!(cache.len(), 9);

    let state = orchestrator.status().get_run_state();
    assert_eq!(state.update_count, 3);
    assert_eq!(state.telemetry_sent, 27);
    assert_eq!(state.alarms_generated, alarms);
}
