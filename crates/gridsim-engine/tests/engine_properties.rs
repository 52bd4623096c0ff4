//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Behavioural properties of the telemetry engine."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use gridsim_common::{Clock, ManualClock, NoiseConfig};
use gridsim_engine::{
    AlarmKind, Element, ElementStatus, ElementType, EngineSettings, EnvironmentalState, Reading,
    SharedEnvironment, StaticEnvironment, TelemetryEngine,
};

fn settings(seed: u64) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.simulation.random_seed = Some(seed);
    settings
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap(),
    ))
}

#[test]
fn non_active_elements_emit_zeroed_fields_only() {
    let expected: [(ElementType, &[&str]); 5] = [
        (ElementType::Bus, &["voltage", "frequency"]),
        (
            ElementType::Generator,
            &["power", "frequency", "voltage", "efficiency"],
        ),
        (ElementType::Load, &["power", "current", "power_factor"]),
        (ElementType::Line, &["current", "loading", "power_flow"]),
        (
            ElementType::Transformer,
            &["loading", "oil_temperature", "winding_temperature"],
        ),
    ];
    let statuses = [
        ElementStatus::Inactive,
        ElementStatus::Maintenance,
        ElementStatus::Fault,
    ];

    let mut elements = Vec::new();
    for (element_type, _) in &expected {
        for status in statuses {
            elements.push(
                Element::new(format!("{element_type}-{status}"), *element_type).with_status(status),
            );
        }
    }

    let mut settings = settings(3);
    settings.alarms.thresholds.voltage_high = 0.0;
    settings.alarms.thresholds.line_overload_pct = -1.0;
    let engine = TelemetryEngine::new(
        settings,
        &elements,
        clock(),
        Arc::new(StaticEnvironment::default()),
    );

    for (element_type, fields) in &expected {
        for status in statuses {
            let outcome = engine
                .simulate(&format!("{element_type}-{status}"))
                .expect("element exists");
            assert!(outcome.alarms.is_empty());
            let measurements = outcome.sample.measurements();
            let names: Vec<_> = measurements.iter().map(|(name, _)| *name).collect();
            assert_eq!(&names, fields, "{element_type} {status}");
            assert!(measurements.iter().all(|(_, value)| *value == 0.0));
        }
    }
    assert_eq!(engine.active_alarm_count(), 0);
}

#[test]
fn active_samples_populate_the_type_field_set() {
    let elements = vec![
        Element::new("bus", ElementType::Bus),
        Element::new("gen", ElementType::Generator),
        Element::new("load", ElementType::Load),
        Element::new("line", ElementType::Line),
        Element::new("xfmr", ElementType::Transformer),
    ];
    let engine = TelemetryEngine::new(
        settings(5),
        &elements,
        clock(),
        Arc::new(StaticEnvironment::default()),
    );
    let counts: Vec<_> = elements
        .iter()
        .map(|element| engine.simulate(&element.id).unwrap().sample.measurements().len())
        .collect();
    assert_eq!(counts, vec![4, 7, 6, 6, 6]);
}

#[test]
fn generator_ramp_is_bounded_across_cycles() {
    let elements = vec![
        Element::new("thermal", ElementType::Generator).with_capacity(200.0),
        Element::new("pv", ElementType::Generator)
            .with_capacity(80.0)
            .with_property("fuel_type", "solar"),
        Element::new("wind", ElementType::Generator)
            .with_capacity(50.0)
            .with_property("fuel_type", "wind"),
    ];
    let clock = clock();
    let weather = SharedEnvironment::new(EnvironmentalState::default());
    let engine = TelemetryEngine::new(
        settings(17),
        &elements,
        clock.clone(),
        Arc::new(weather.clone()),
    );

    let capacities = [200.0, 80.0, 50.0];
    let mut previous: Vec<Option<f64>> = vec![None; elements.len()];
    for cycle in 0..288 {
        // gusts push the turbine between cut-in and rated speed
        weather.update(|state| state.wind_speed_ms = if cycle % 20 < 10 { 2.0 } else { 14.0 });
        for (index, element) in elements.iter().enumerate() {
            let outcome = engine.simulate(&element.id).unwrap();
            let power = match outcome.sample.reading {
                Reading::Generator(reading) => reading.power.unwrap(),
                other => panic!("unexpected reading {other:?}"),
            };
            if let Some(last) = previous[index] {
                assert!(
                    (power - last).abs() <= 0.05 * capacities[index] + 1e-9,
                    "{} moved from {last} to {power}",
                    element.id
                );
            }
            previous[index] = Some(power);
        }
        clock.advance(Duration::from_secs(300));
    }
}

#[test]
fn repeated_violations_are_deduplicated() {
    let mut settings = settings(23);
    settings.alarms.thresholds.line_overload_pct = 0.0;
    settings.alarms.thresholds.line_critical_pct = 0.0;
    settings.alarms.thresholds.line_temperature_c = 1_000.0;
    let clock = clock();
    let engine = TelemetryEngine::new(
        settings,
        &[Element::new("line-7", ElementType::Line)],
        clock.clone(),
        Arc::new(StaticEnvironment::default()),
    );

    let first = engine.simulate("line-7").unwrap();
    assert_eq!(first.alarms.len(), 1);
    assert_eq!(first.alarms[0].alarm_type, AlarmKind::LineOverload);

    clock.advance(Duration::from_secs(240));
    assert!(engine.simulate("line-7").unwrap().alarms.is_empty());

    clock.advance(Duration::from_secs(61));
    let third = engine.simulate("line-7").unwrap();
    assert_eq!(third.alarms.len(), 1);
    assert_ne!(third.alarms[0].id, first.alarms[0].id);
    assert_eq!(engine.active_alarm_count(), 1);
}

#[test]
fn noiseless_bus_and_thermal_generator_follow_load_factor() {
    let mut settings = settings(1);
    settings.noise = NoiseConfig::silent();
    settings.simulation.thermal_dispatch_spread = 0.0;
    let elements = vec![
        Element::new("bus", ElementType::Bus).with_voltage_level(110.0),
        Element::new("gen", ElementType::Generator)
            .with_capacity(100.0)
            .with_property("efficiency", 90.0),
    ];
    let clock = clock();
    clock.set(Utc.with_ymd_and_hms(2024, 7, 1, 19, 20, 0).unwrap());
    let engine = TelemetryEngine::new(
        settings,
        &elements,
        clock.clone(),
        Arc::new(StaticEnvironment::default()),
    );

    let load_factor = engine
        .profile()
        .base_factor(clock.now())
        .clamp(0.3, 1.5);
    assert_eq!(engine.current_load_factor(), load_factor);

    match engine.simulate("bus").unwrap().sample.reading {
        Reading::Bus(reading) => {
            let expected = 110.0 * (1.0 - 0.03 * load_factor);
            assert!((reading.voltage.unwrap() - expected).abs() < 1e-9);
            assert_eq!(reading.frequency, Some(50.0));
        }
        other => panic!("unexpected reading {other:?}"),
    }

    match engine.simulate("gen").unwrap().sample.reading {
        Reading::Generator(reading) => {
            let expected = (100.0 * load_factor).min(100.0);
            assert!((reading.power.unwrap() - expected).abs() < 1e-9);
            assert_eq!(reading.frequency, Some(50.0));
            assert_eq!(reading.voltage, Some(22.0));
        }
        other => panic!("unexpected reading {other:?}"),
    }
}

#[test]
fn weather_flag_falls_back_to_default_environment() {
    let mut settings = settings(9);
    settings.simulation.weather_effects = false;
    let calm = EnvironmentalState {
        ambient_temperature_c: -10.0,
        wind_speed_ms: 0.0,
        solar_irradiance: 0.0,
    };
    let engine = TelemetryEngine::new(
        settings,
        &[],
        clock(),
        Arc::new(StaticEnvironment(calm)),
    );
    assert_eq!(engine.environment(), EnvironmentalState::default());
}
