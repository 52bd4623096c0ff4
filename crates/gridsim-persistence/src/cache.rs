//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Latest telemetry per element with time-to-live expiry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct CachedValue<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Most recent value per element id; entries older than the TTL read as absent.
#[derive(Debug)]
pub struct LatestTelemetryCache<V> {
    ttl: Duration,
    entries: RwLock<IndexMap<String, CachedValue<V>>>,
}

impl<V: Clone> LatestTelemetryCache<V> {
    /// Create an empty cache with the provided time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the cached value for `key`.
    pub fn insert(&self, key: impl Into<String>, value: V, now: DateTime<Utc>) {
        self.entries.write().insert(
            key.into(),
            CachedValue {
                value,
                stored_at: now,
            },
        );
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.read();
        let cached = entries.get(key)?;
        self.is_fresh(cached, now).then(|| cached.value.clone())
    }

    /// All fresh entries in first-insert order.
    pub fn entries(&self, now: DateTime<Utc>) -> Vec<(String, V)> {
        self.entries
            .read()
            .iter()
            .filter(|(_, cached)| self.is_fresh(cached, now))
            .map(|(key, cached)| (key.clone(), cached.value.clone()))
            .collect()
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, cached| {
            (now - cached.stored_at)
                .to_std()
                .map(|age| age < self.ttl)
                .unwrap_or(true)
        });
        before - entries.len()
    }

    /// Number of stored entries, including any not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn is_fresh(&self, cached: &CachedValue<V>, now: DateTime<Utc>) -> bool {
        match (now - cached.stored_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }
}
