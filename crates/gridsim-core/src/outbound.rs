//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Field-device REST client with batched, retried telemetry submission."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use gridsim_common::OutboundConfig;
use gridsim_engine::{Alarm, TelemetrySample};
use gridsim_metrics::SimulatorMetrics;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::sink::FieldDeviceApi;

const TELEMETRY_PATH: &str = "api/monitoring/telemetry";
const ALARM_PATH: &str = "api/monitoring/alarms";
const LOGIN_PATH: &str = "api/auth/service-login";

/// Engineering unit reported alongside a measurement.
pub fn unit_for_field(field: &str) -> &'static str {
    match field {
        "voltage" | "voltage_level" => "kV",
        "current" => "A",
        "power" | "demand" | "power_flow" | "power_loss" | "capacity" => "MW",
        "rating" => "MVA",
        "frequency" => "Hz",
        "loading" | "efficiency" | "utilization_rate" | "load_factor" | "voltage_change" => "%",
        "temperature" | "oil_temperature" | "winding_temperature" => "°C",
        "power_factor" | "tap_position" => "pu",
        _ => "",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
}

/// Posts telemetry and alarms to the monitoring backend as a field device would.
#[derive(Debug)]
pub struct RestFieldDevice {
    client: reqwest::Client,
    base: Url,
    device_id: String,
    device_type: String,
    service_key: Option<String>,
    token: Mutex<Option<String>>,
}

impl RestFieldDevice {
    pub fn from_config(config: &OutboundConfig) -> Result<Self> {
        let mut base = config.base_url()?;
        // keep the configured path prefix when joining endpoint paths
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build outbound HTTP client")?;
        Ok(Self {
            client,
            base,
            device_id: config.device_id.clone(),
            device_type: config.device_type.clone(),
            service_key: config.service_key.clone(),
            token: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn source(&self) -> String {
        format!("field_device_{}", self.device_id)
    }

    pub fn telemetry_payload(&self, sample: &TelemetrySample) -> Value {
        let timestamp = sample.timestamp.to_rfc3339();
        let measurements: Map<String, Value> = sample
            .measurements()
            .into_iter()
            .map(|(field, value)| {
                (
                    field.to_owned(),
                    json!({
                        "value": value,
                        "unit": unit_for_field(field),
                        "timestamp": timestamp,
                    }),
                )
            })
            .collect();
        json!({
            "deviceId": self.device_id,
            "timestamp": timestamp,
            "elementId": sample.element_id,
            "elementType": sample.element_type(),
            "measurements": measurements,
            "quality": "good",
            "source": self.source(),
        })
    }

    pub fn alarm_payload(&self, alarm: &Alarm) -> Value {
        json!({
            "deviceId": self.device_id,
            "alarmId": alarm.id,
            "elementId": alarm.element_id,
            "elementType": alarm.element_type,
            "alarmType": alarm.alarm_type,
            "severity": alarm.severity,
            "message": alarm.message,
            "timestamp": alarm.created_at.to_rfc3339(),
            "acknowledgeRequired": alarm.requires_acknowledgement(),
            "source": self.source(),
        })
    }

    async fn ensure_token(&self) -> Option<String> {
        let key = self.service_key.as_ref()?;
        let cached = self.token.lock().clone();
        if cached.is_some() {
            return cached;
        }

        let url = self.base.join(LOGIN_PATH).ok()?;
        let body = json!({
            "email": format!("device_{}@grid.local", self.device_id),
            "password": key,
            "service": true,
            "deviceId": self.device_id,
            "deviceType": self.device_type,
        });
        let response = match self.client.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(device_id = %self.device_id, error = %err, "field device login failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(device_id = %self.device_id, status = %response.status(), "field device login rejected");
            return None;
        }
        match response.json::<LoginResponse>().await {
            Ok(LoginResponse {
                access_token: Some(token),
            }) => {
                info!(device_id = %self.device_id, "field device authenticated");
                *self.token.lock() = Some(token.clone());
                Some(token)
            }
            Ok(_) => {
                warn!(device_id = %self.device_id, "login response carried no access token");
                None
            }
            Err(err) => {
                warn!(device_id = %self.device_id, error = %err, "unreadable login response");
                None
            }
        }
    }

    async fn post(&self, path: &str, body: &Value) -> bool {
        let url = match self.base.join(path) {
            Ok(url) => url,
            Err(err) => {
                warn!(path, error = %err, "invalid outbound endpoint");
                return false;
            }
        };
        let token = self.ensure_token().await;
        if self.service_key.is_some() && token.is_none() {
            return false;
        }

        let mut request = self
            .client
            .post(url)
            .header("X-Device-ID", &self.device_id)
            .header("X-Device-Type", &self.device_type)
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                if response.status() == StatusCode::UNAUTHORIZED {
                    self.token.lock().take();
                }
                debug!(path, status = %response.status(), "outbound submission rejected");
                false
            }
            Err(err) => {
                debug!(path, error = %err, "outbound submission failed");
                false
            }
        }
    }
}

#[async_trait]
impl FieldDeviceApi for RestFieldDevice {
    async fn submit_telemetry(&self, sample: &TelemetrySample) -> bool {
        self.post(TELEMETRY_PATH, &self.telemetry_payload(sample))
            .await
    }

    async fn submit_alarm(&self, alarm: &Alarm) -> bool {
        self.post(ALARM_PATH, &self.alarm_payload(alarm)).await
    }
}

/// Outcome of one buffered flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub attempts: u32,
}

/// Submits buffered samples, retrying only the failures with exponential backoff.
#[derive(Clone)]
pub struct OutboundDispatcher {
    device: Arc<dyn FieldDeviceApi>,
    batch_size: usize,
    retry_attempts: u32,
    base_delay: Duration,
    metrics: Option<SimulatorMetrics>,
}

impl OutboundDispatcher {
    pub fn new(device: Arc<dyn FieldDeviceApi>, config: &OutboundConfig) -> Self {
        Self {
            device,
            batch_size: config.batch_size.max(1),
            retry_attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SimulatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(2f64.powi(attempt as i32))
    }

    pub async fn flush(&self, samples: Vec<TelemetrySample>) -> FlushReport {
        let total = samples.len();
        let mut pending = samples;
        let mut report = FlushReport::default();

        for attempt in 0..self.retry_attempts {
            if pending.is_empty() {
                break;
            }
            report.attempts = attempt + 1;
            let results = join_all(
                pending
                    .iter()
                    .map(|sample| self.device.submit_telemetry(sample)),
            )
            .await;
            pending = pending
                .into_iter()
                .zip(results)
                .filter_map(|(sample, accepted)| (!accepted).then_some(sample))
                .collect();

            if !pending.is_empty() && attempt + 1 < self.retry_attempts {
                let delay = self.backoff(attempt);
                debug!(
                    failed = pending.len(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying outbound telemetry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        report.dropped = pending.len();
        report.delivered = total - report.dropped;
        if report.dropped > 0 {
            let elements: Vec<&str> = pending.iter().map(|s| s.element_id.as_str()).collect();
            warn!(
                dropped = report.dropped,
                attempts = report.attempts,
                elements = ?elements,
                "dropping outbound telemetry after retries"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_outbound_dropped("telemetry", report.dropped);
            }
        }
        report
    }
}

impl std::fmt::Debug for OutboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundDispatcher")
            .field("batch_size", &self.batch_size)
            .field("retry_attempts", &self.retry_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_follow_measurement_names() {
        assert_eq!(unit_for_field("voltage"), "kV");
        assert_eq!(unit_for_field("oil_temperature"), "°C");
        assert_eq!(unit_for_field("power_factor"), "pu");
        assert_eq!(unit_for_field("unknown"), "");
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        struct Never;
        #[async_trait]
        impl FieldDeviceApi for Never {
            async fn submit_telemetry(&self, _: &TelemetrySample) -> bool {
                false
            }
            async fn submit_alarm(&self, _: &Alarm) -> bool {
                false
            }
        }
        let config = OutboundConfig {
            retry_base_delay: Duration::from_millis(250),
            ..OutboundConfig::default()
        };
        let dispatcher = OutboundDispatcher::new(Arc::new(Never), &config);
        assert_eq!(dispatcher.backoff(0), Duration::from_millis(250));
        assert_eq!(dispatcher.backoff(2), Duration::from_secs(1));
    }
}
