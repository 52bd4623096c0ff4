//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Threshold checks and deduplicated alarm emission."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridsim_common::{AlarmConfig, AlarmThresholds};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::model::ElementType;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmKind {
    HighVoltage,
    LowVoltage,
    HighFrequency,
    LowFrequency,
    GeneratorOverload,
    LineOverload,
    HighTemperature,
    HighOilTemp,
    TransformerOverload,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Threshold violation detected by a check, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmCandidate {
    pub kind: AlarmKind,
    pub severity: Severity,
    pub message: String,
    pub threshold: f64,
    pub actual: f64,
}

/// Alarm record handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: Uuid,
    pub element_id: String,
    pub element_type: ElementType,
    pub alarm_type: AlarmKind,
    pub severity: Severity,
    pub message: String,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub is_active: bool,
    pub is_acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alarm {
    pub fn requires_acknowledgement(&self) -> bool {
        self.severity == Severity::Critical
    }
}

pub fn check_bus(voltage: f64, nominal: f64, thresholds: &AlarmThresholds) -> Vec<AlarmCandidate> {
    if nominal <= 0.0 {
        return Vec::new();
    }
    let ratio = voltage / nominal;
    let deviation = (ratio - 1.0) * 100.0;
    if ratio > thresholds.voltage_high {
        vec![AlarmCandidate {
            kind: AlarmKind::HighVoltage,
            severity: Severity::Warning,
            message: format!("High voltage: {voltage:.2}kV ({deviation:+.1}%)"),
            threshold: nominal * thresholds.voltage_high,
            actual: voltage,
        }]
    } else if ratio < thresholds.voltage_low {
        vec![AlarmCandidate {
            kind: AlarmKind::LowVoltage,
            severity: Severity::Critical,
            message: format!("Low voltage: {voltage:.2}kV ({deviation:+.1}%)"),
            threshold: nominal * thresholds.voltage_low,
            actual: voltage,
        }]
    } else {
        Vec::new()
    }
}

pub fn check_generator(
    frequency: f64,
    output_pct: f64,
    thresholds: &AlarmThresholds,
) -> Vec<AlarmCandidate> {
    let mut alarms = Vec::new();
    if frequency > thresholds.frequency_high {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::HighFrequency,
            severity: Severity::Warning,
            message: format!("High frequency: {frequency:.3}Hz"),
            threshold: thresholds.frequency_high,
            actual: frequency,
        });
    } else if frequency < thresholds.frequency_low {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::LowFrequency,
            severity: Severity::Warning,
            message: format!("Low frequency: {frequency:.3}Hz"),
            threshold: thresholds.frequency_low,
            actual: frequency,
        });
    }
    if output_pct > thresholds.generator_overload_pct {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::GeneratorOverload,
            severity: Severity::Warning,
            message: format!("Generator near capacity: {output_pct:.1}%"),
            threshold: thresholds.generator_overload_pct,
            actual: output_pct,
        });
    }
    alarms
}

pub fn check_line(loading: f64, temperature: f64, thresholds: &AlarmThresholds) -> Vec<AlarmCandidate> {
    let mut alarms = Vec::new();
    if loading > thresholds.line_overload_pct {
        let severity = if loading > thresholds.line_critical_pct {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alarms.push(AlarmCandidate {
            kind: AlarmKind::LineOverload,
            severity,
            message: format!("Line overload: {loading:.1}%"),
            threshold: thresholds.line_overload_pct,
            actual: loading,
        });
    }
    if temperature > thresholds.line_temperature_c {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::HighTemperature,
            severity: Severity::Warning,
            message: format!("High conductor temperature: {temperature:.1}°C"),
            threshold: thresholds.line_temperature_c,
            actual: temperature,
        });
    }
    alarms
}

pub fn check_transformer(
    loading: f64,
    oil_temperature: f64,
    thresholds: &AlarmThresholds,
) -> Vec<AlarmCandidate> {
    let mut alarms = Vec::new();
    if oil_temperature > thresholds.oil_temperature_c {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::HighOilTemp,
            severity: Severity::Warning,
            message: format!("High oil temperature: {oil_temperature:.1}°C"),
            threshold: thresholds.oil_temperature_c,
            actual: oil_temperature,
        });
    }
    if loading > thresholds.transformer_overload_pct {
        alarms.push(AlarmCandidate {
            kind: AlarmKind::TransformerOverload,
            severity: Severity::Warning,
            message: format!("Transformer overload: {loading:.1}%"),
            threshold: thresholds.transformer_overload_pct,
            actual: loading,
        });
    }
    alarms
}

/// Suppresses repeats of the same (element, kind) pair inside a window.
#[derive(Debug)]
pub struct AlarmEvaluator {
    suppression_window: Duration,
    active_window: Duration,
    last_raised: Mutex<HashMap<(String, AlarmKind), DateTime<Utc>>>,
}

impl AlarmEvaluator {
    pub fn new(config: &AlarmConfig) -> Self {
        Self {
            suppression_window: config.suppression_window,
            active_window: config.active_window,
            last_raised: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the alarm to deliver, or `None` while the pair is suppressed.
    pub fn raise(
        &self,
        element_id: &str,
        element_type: ElementType,
        candidate: AlarmCandidate,
        now: DateTime<Utc>,
    ) -> Option<Alarm> {
        let key = (element_id.to_owned(), candidate.kind);
        let mut last_raised = self.last_raised.lock();
        if let Some(previous) = last_raised.get(&key) {
            if within(*previous, now, self.suppression_window) {
                return None;
            }
        }
        last_raised.insert(key, now);
        drop(last_raised);

        Some(Alarm {
            id: Uuid::new_v4(),
            element_id: element_id.to_owned(),
            element_type,
            alarm_type: candidate.kind,
            severity: candidate.severity,
            message: candidate.message,
            threshold_value: Some(candidate.threshold),
            actual_value: Some(candidate.actual),
            is_active: true,
            is_acknowledged: false,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        })
    }

    /// Distinct (element, kind) pairs raised within the active window.
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.last_raised
            .lock()
            .values()
            .filter(|raised| within(**raised, now, self.active_window))
            .count()
    }
}

fn within(earlier: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - earlier).to_std() {
        Ok(elapsed) => elapsed < window,
        // Clock moved backwards; treat as still inside the window.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn overload(loading: f64) -> AlarmCandidate {
        check_line(loading, 20.0, &AlarmThresholds::default())
            .into_iter()
            .next()
            .expect("overload candidate")
    }

    #[test]
    fn repeats_are_suppressed_inside_window() {
        let evaluator = AlarmEvaluator::new(&AlarmConfig::default());
        assert!(evaluator
            .raise("line-1", ElementType::Line, overload(92.0), at(0))
            .is_some());
        assert!(evaluator
            .raise("line-1", ElementType::Line, overload(93.0), at(299))
            .is_none());
        assert!(evaluator
            .raise("line-1", ElementType::Line, overload(93.0), at(300))
            .is_some());
    }

    #[test]
    fn suppression_is_keyed_per_element() {
        let evaluator = AlarmEvaluator::new(&AlarmConfig::default());
        assert!(evaluator
            .raise("line-1", ElementType::Line, overload(92.0), at(0))
            .is_some());
        assert!(evaluator
            .raise("line-2", ElementType::Line, overload(92.0), at(1))
            .is_some());
        assert_eq!(evaluator.active_count(at(2)), 2);
        assert_eq!(evaluator.active_count(at(1801)), 0);
    }

    #[test]
    fn raised_alarm_carries_defaults() {
        let evaluator = AlarmEvaluator::new(&AlarmConfig::default());
        let alarm = evaluator
            .raise("line-1", ElementType::Line, overload(97.0), at(0))
            .expect("alarm raised");
        assert!(alarm.is_active);
        assert!(!alarm.is_acknowledged);
        assert!(alarm.resolved_at.is_none());
        assert_eq!(alarm.severity, Severity::Critical);
        assert!(alarm.requires_acknowledgement());
        assert_eq!(alarm.message, "Line overload: 97.0%");
        let json = serde_json::to_value(&alarm).unwrap();
        assert_eq!(json["alarm_type"], "LINE_OVERLOAD");
    }

    #[test]
    fn bus_voltage_bands() {
        let thresholds = AlarmThresholds::default();
        assert!(check_bus(110.0, 110.0, &thresholds).is_empty());
        let high = check_bus(116.0, 110.0, &thresholds);
        assert_eq!(high[0].kind, AlarmKind::HighVoltage);
        assert_eq!(high[0].severity, Severity::Warning);
        let low = check_bus(100.0, 110.0, &thresholds);
        assert_eq!(low[0].kind, AlarmKind::LowVoltage);
        assert_eq!(low[0].severity, Severity::Critical);
        assert_eq!(low[0].message, "Low voltage: 100.00kV (-9.1%)");
    }

    #[test]
    fn transformer_checks_are_independent() {
        let thresholds = AlarmThresholds::default();
        let kinds: Vec<_> = check_transformer(95.0, 90.0, &thresholds)
            .into_iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![AlarmKind::HighOilTemp, AlarmKind::TransformerOverload]
        );
        assert_eq!(AlarmKind::HighOilTemp.to_string(), "HIGH_OIL_TEMP");
    }
}
