//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persist-and-publish sink writing the event log, cache, and broadcast channel."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gridsim_common::{PersistenceConfig, SharedClock};
use gridsim_engine::{Alarm, TelemetrySample};
use gridsim_persistence::{
    EventKind, EventLogEntry, EventLogWriter, LatestTelemetryCache, PersistenceMetrics,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::publish::{PublishedEvent, TelemetryBroadcaster};
use crate::sink::{AlarmSink, SinkError, TelemetrySink};

pub type SharedTelemetryCache = Arc<LatestTelemetryCache<TelemetrySample>>;

/// Writes every sample and alarm to the event log, refreshes the latest cache,
/// then broadcasts to real-time subscribers.
pub struct PersistPublishSink {
    log: Mutex<EventLogWriter>,
    cache: SharedTelemetryCache,
    broadcaster: TelemetryBroadcaster,
    clock: SharedClock,
    metrics: Option<PersistenceMetrics>,
}

impl PersistPublishSink {
    pub fn open(
        config: &PersistenceConfig,
        broadcaster: TelemetryBroadcaster,
        clock: SharedClock,
    ) -> Result<Self, SinkError> {
        Self::open_at(&config.event_log, config.cache_ttl, broadcaster, clock)
    }

    pub fn open_at(
        event_log: &Path,
        cache_ttl: std::time::Duration,
        broadcaster: TelemetryBroadcaster,
        clock: SharedClock,
    ) -> Result<Self, SinkError> {
        let log = EventLogWriter::open(event_log)?;
        debug!(path = %event_log.display(), next = log.last_sequence() + 1, "event log opened");
        Ok(Self {
            log: Mutex::new(log),
            cache: Arc::new(LatestTelemetryCache::new(cache_ttl)),
            broadcaster,
            clock,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> SharedTelemetryCache {
        self.cache.clone()
    }

    pub fn broadcaster(&self) -> TelemetryBroadcaster {
        self.broadcaster.clone()
    }

    fn append(&self, kind: EventKind, entries: Vec<EventLogEntry>) -> Result<(), SinkError> {
        let count = entries.len();
        let result = self.log.lock().append_batch(entries);
        match result {
            Ok(bytes) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_appended(kind, count, bytes);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for PersistPublishSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistPublishSink")
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TelemetrySink for PersistPublishSink {
    async fn persist_and_publish(&self, batch: &[TelemetrySample]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        let entries = batch
            .iter()
            .map(|sample| {
                EventLogEntry::from_serializable(EventKind::Telemetry, sample.timestamp, sample)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.append(EventKind::Telemetry, entries)?;

        let now = self.clock.now();
        for sample in batch {
            self.cache
                .insert(sample.element_id.clone(), sample.clone(), now);
        }
        let purged = self.cache.purge_expired(now);
        if let Some(metrics) = &self.metrics {
            metrics.set_cache_entries(self.cache.len());
        }

        let mut delivered = 0usize;
        for sample in batch {
            match PublishedEvent::telemetry(sample) {
                Ok(event) => delivered += self.broadcaster.publish(event),
                Err(err) => {
                    warn!(element_id = %sample.element_id, error = %err, "failed to encode telemetry event")
                }
            }
        }
        debug!(samples = batch.len(), purged, delivered, "telemetry batch persisted");
        Ok(())
    }
}

#[async_trait]
impl AlarmSink for PersistPublishSink {
    async fn persist_and_publish(&self, alarm: &Alarm) -> Result<(), SinkError> {
        let entry = EventLogEntry::from_serializable(EventKind::Alarm, alarm.created_at, alarm)?;
        self.append(EventKind::Alarm, vec![entry])?;
        self.broadcaster.publish(PublishedEvent::alarm(alarm)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridsim_common::SystemClock;
    use gridsim_engine::{ElementStatus, GeneratorReading, Reading};
    use gridsim_persistence::replay_event_log;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn batch_is_logged_cached_and_broadcast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let broadcaster = TelemetryBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let sink = PersistPublishSink::open_at(
            &path,
            Duration::from_secs(3600),
            broadcaster,
            Arc::new(SystemClock),
        )
        .unwrap();

        let sample = TelemetrySample {
            timestamp: Utc::now(),
            element_id: "gen-1".into(),
            status: ElementStatus::Active,
            reading: Reading::Generator(GeneratorReading {
                power: Some(55.0),
                ..GeneratorReading::default()
            }),
        };
        TelemetrySink::persist_and_publish(&sink, std::slice::from_ref(&sample))
            .await
            .unwrap();

        assert_eq!(sink.cache().get("gen-1", Utc::now()), Some(sample.clone()));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.element_id, "gen-1");

        let mut kinds = Vec::new();
        replay_event_log(&path, |entry| {
            kinds.push(entry.kind);
            Ok(())
        })
        .unwrap();
        assert_eq!(kinds, vec![EventKind::Telemetry]);
    }
}
