//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus metrics for the event log and cache."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::event_log::EventKind;
use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    events_appended: IntCounterVec,
    append_failures: IntCounter,
    event_log_bytes: IntCounter,
    cache_entries: IntGauge,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let events_appended = IntCounterVec::new(
            Opts::new(
                "gridsim_event_log_entries_total",
                "Entries appended to the simulator event log",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let append_failures = IntCounter::new(
            "gridsim_event_log_failures_total",
            "Event log appends that failed",
        )?;
        registry.register(Box::new(append_failures.clone()))?;

        let event_log_bytes = IntCounter::new(
            "gridsim_event_log_bytes_total",
            "Bytes appended to the simulator event log",
        )?;
        registry.register(Box::new(event_log_bytes.clone()))?;

        let cache_entries = IntGauge::new(
            "gridsim_latest_cache_entries",
            "Elements currently held in the latest-telemetry cache",
        )?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            events_appended,
            append_failures,
            event_log_bytes,
            cache_entries,
        })
    }

    /// Record appended entries of one kind and their size.
    pub fn record_appended(&self, kind: EventKind, entries: usize, bytes: usize) {
        let label = match kind {
            EventKind::Telemetry => "telemetry",
            EventKind::Alarm => "alarm",
        };
        self.events_appended
            .with_label_values(&[label])
            .inc_by(entries as u64);
        self.event_log_bytes.inc_by(bytes as u64);
    }

    /// Record a failed append.
    pub fn record_failure(&self) {
        self.append_failures.inc();
    }

    /// Publish the current cache size.
    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
