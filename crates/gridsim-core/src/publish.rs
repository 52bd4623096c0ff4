//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Real-time broadcast channel for telemetry and alarm events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use gridsim_engine::{Alarm, TelemetrySample};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const TELEMETRY_EVENT: &str = "telemetry:update";
pub const ALARM_EVENT: &str = "alarm:new";

/// Event pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event: String,
    pub element_id: String,
    pub data: Value,
}

impl PublishedEvent {
    pub fn telemetry(sample: &TelemetrySample) -> Result<Self, serde_json::Error> {
        let metrics: serde_json::Map<String, Value> = sample
            .measurements()
            .into_iter()
            .map(|(name, value)| (name.to_owned(), json!(value)))
            .collect();
        Ok(Self {
            event: TELEMETRY_EVENT.to_owned(),
            element_id: sample.element_id.clone(),
            data: json!({
                "elementId": sample.element_id,
                "type": sample.element_type(),
                "status": serde_json::to_value(sample.status)?,
                "timestamp": sample.timestamp,
                "metrics": metrics,
            }),
        })
    }

    pub fn alarm(alarm: &Alarm) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: ALARM_EVENT.to_owned(),
            element_id: alarm.element_id.clone(),
            data: serde_json::to_value(alarm)?,
        })
    }
}

/// Fan-out sender shared by the persist sink and the WebSocket surface.
#[derive(Debug, Clone)]
pub struct TelemetryBroadcaster {
    sender: broadcast::Sender<PublishedEvent>,
}

impl TelemetryBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of receivers reached; zero when nobody listens.
    pub fn publish(&self, event: PublishedEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
