//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulator run state and its copy-on-read cell."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Counters and lifecycle flags reported by the status surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub is_running: bool,
    pub phase: RunPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub update_count: u64,
    pub error_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub active_elements: usize,
    /// Mean cycle duration in seconds over every completed cycle.
    pub avg_update_time: f64,
    pub telemetry_sent: u64,
    pub alarms_generated: u64,
}

impl RunState {
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        self.start_time
            .and_then(|start| (now - start).to_std().ok())
            .unwrap_or_default()
    }
}

/// Shared, lock-protected run state. Readers always receive a clone.
#[derive(Debug, Clone, Default)]
pub struct RunStateCell {
    inner: Arc<RwLock<RunState>>,
}

impl RunStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RunState {
        self.inner.read().clone()
    }

    pub fn set_active_elements(&self, count: usize) {
        self.inner.write().active_elements = count;
    }

    pub fn mark_running(&self, now: DateTime<Utc>) {
        let mut state = self.inner.write();
        state.is_running = true;
        state.phase = RunPhase::Running;
        state.start_time = Some(now);
    }

    pub fn mark_stopped(&self) {
        let mut state = self.inner.write();
        state.is_running = false;
        state.phase = RunPhase::Stopped;
    }

    /// Fold one successful cycle into the counters and the running mean.
    pub fn record_cycle(&self, now: DateTime<Utc>, duration: Duration, samples: usize) {
        let mut state = self.inner.write();
        state.update_count += 1;
        state.last_update = Some(now);
        state.telemetry_sent += samples as u64;
        let n = state.update_count as f64;
        state.avg_update_time =
            (state.avg_update_time * (n - 1.0) + duration.as_secs_f64()) / n;
    }

    pub fn record_error(&self) {
        self.inner.write().error_count += 1;
    }

    pub fn record_alarm(&self) {
        self.inner.write().alarms_generated += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_matches_arithmetic_mean() {
        let cell = RunStateCell::new();
        let durations_ms = [120u64, 80, 95, 400, 5, 61, 77];
        for ms in durations_ms {
            cell.record_cycle(Utc::now(), Duration::from_millis(ms), 3);
        }
        let state = cell.snapshot();
        let mean = durations_ms.iter().sum::<u64>() as f64 / durations_ms.len() as f64 / 1000.0;
        assert!((state.avg_update_time - mean).abs() < 1e-12);
        assert_eq!(state.update_count, durations_ms.len() as u64);
        assert_eq!(state.telemetry_sent, 21);
    }

    #[test]
    fn lifecycle_transitions() {
        let cell = RunStateCell::new();
        assert_eq!(cell.snapshot().phase, RunPhase::Idle);
        cell.mark_running(Utc::now());
        assert!(cell.snapshot().is_running);
        cell.record_error();
        cell.mark_stopped();
        let state = cell.snapshot();
        assert!(!state.is_running);
        assert_eq!(state.phase, RunPhase::Stopped);
        assert_eq!(state.error_count, 1);
    }
}
