//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event log and latest-value cache backing the persist sink."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Storage for simulator output: an append-only JSONL event log and an
//! in-memory cache holding the most recent telemetry per element.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing the event log.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when the log header is missing or unreadable.
    #[error("invalid event log header: {0}")]
    InvalidHeader(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod cache;
pub mod event_log;
pub mod metrics;

pub use cache::LatestTelemetryCache;
pub use event_log::replay as replay_event_log;
pub use event_log::{EventKind, EventLogEntry, EventLogReader, EventLogWriter, EVENT_LOG_VERSION};
pub use metrics::PersistenceMetrics;
