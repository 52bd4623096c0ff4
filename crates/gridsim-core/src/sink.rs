//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Delivery seams for telemetry batches and alarms."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use gridsim_engine::{Alarm, TelemetrySample};
use gridsim_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("downstream rejected {0}")]
    Rejected(String),
}

/// Persist-and-publish target for one cycle's telemetry.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn persist_and_publish(&self, batch: &[TelemetrySample]) -> Result<(), SinkError>;
}

#[async_trait]
pub trait AlarmSink: Send + Sync {
    async fn persist_and_publish(&self, alarm: &Alarm) -> Result<(), SinkError>;
}

/// Remote monitoring API reached as a field device. `false` means not accepted.
#[async_trait]
pub trait FieldDeviceApi: Send + Sync {
    async fn submit_telemetry(&self, sample: &TelemetrySample) -> bool;
    async fn submit_alarm(&self, alarm: &Alarm) -> bool;
}

/// Routes alarms to a field device API.
#[derive(Clone)]
pub struct FieldDeviceAlarmSink {
    device: Arc<dyn FieldDeviceApi>,
}

impl FieldDeviceAlarmSink {
    pub fn new(device: Arc<dyn FieldDeviceApi>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl AlarmSink for FieldDeviceAlarmSink {
    async fn persist_and_publish(&self, alarm: &Alarm) -> Result<(), SinkError> {
        if self.device.submit_alarm(alarm).await {
            Ok(())
        } else {
            Err(SinkError::Rejected(format!("alarm {}", alarm.id)))
        }
    }
}
