//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Daemon log sinks, filter selection, and service naming."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Simulator-specific filter override, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "GRIDSIM_LOG";
const RUST_LOG_ENV: &str = "RUST_LOG";
const FALLBACK_SERVICE: &str = "gridsimd";

static LOGGING: OnceCell<LoggingHandle> = OnceCell::new();

/// Stdout rendering; the rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    GridsimLog,
    RustLog,
    Config,
}

/// What the installed subscriber ended up using. Lives for the process so the
/// non-blocking writers keep flushing.
pub struct LoggingHandle {
    pub service: String,
    pub directive: String,
    pub source: FilterSource,
    pub log_file: Option<PathBuf>,
    _guards: Vec<WorkerGuard>,
}

/// Checks that a filter directive such as `info,gridsim_engine=debug` parses.
pub fn parse_directive(directive: &str) -> Result<EnvFilter> {
    if directive.trim().is_empty() {
        return Err(anyhow!("log directive must not be empty"));
    }
    EnvFilter::try_new(directive).with_context(|| format!("invalid log directive `{directive}`"))
}

/// Picks the first usable directive: `GRIDSIM_LOG`, then `RUST_LOG`, then the
/// configured level. Unparseable environment values are skipped with a warning
/// on stderr, since the subscriber is not up yet.
pub fn select_directive(
    gridsim_log: Option<String>,
    rust_log: Option<String>,
    configured: &str,
) -> (String, FilterSource) {
    let candidates = [
        (gridsim_log, LOG_ENV, FilterSource::GridsimLog),
        (rust_log, RUST_LOG_ENV, FilterSource::RustLog),
    ];
    for (value, name, source) in candidates {
        let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        match parse_directive(&value) {
            Ok(_) => return (value, source),
            Err(err) => eprintln!("ignoring {name}: {err:#}"),
        }
    }
    (configured.to_owned(), FilterSource::Config)
}

/// File-safe form of the service name. Anything outside `[A-Za-z0-9_-]`
/// becomes `-`.
pub fn service_slug(service_name: &str) -> String {
    let slug: String = service_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if slug.trim_matches('-').is_empty() {
        FALLBACK_SERVICE.to_owned()
    } else {
        slug
    }
}

/// Base name of the rolling file; the appender adds the date suffix.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let stem = match config.file_prefix.as_deref() {
        Some(prefix) if !prefix.trim().is_empty() => {
            format!("{}-{}", service_slug(prefix), service_slug(service_name))
        }
        _ => service_slug(service_name),
    };
    format!("{stem}.log")
}

/// Installs the global subscriber once; later calls return the first handle.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<&'static LoggingHandle> {
    let handle = LOGGING.get_or_try_init(|| install(service_name, config))?;
    info!(
        service = %handle.service,
        directive = %handle.directive,
        source = ?handle.source,
        log_file = ?handle.log_file,
        format = ?config.format,
        "tracing initialised"
    );
    Ok(handle)
}

fn install(service_name: &str, config: &LoggingConfig) -> Result<LoggingHandle> {
    let service = service_slug(service_name);
    let (directive, source) = select_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(RUST_LOG_ENV).ok(),
        &config.level,
    );
    let filter = parse_directive(&directive)?;
    let mut guards = Vec::new();

    let stdout_layer = if config.stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        Some(match config.format {
            LogFormat::StructuredJson => fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(writer)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed(),
        })
    } else {
        None
    };

    let mut log_file = None;
    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("failed to create log directory {}", config.directory.display())
        })?;
        let file_name = log_file_name(&service, config);
        log_file = Some(config.directory.join(&file_name));
        let (writer, guard) = tracing_appender::non_blocking(daily(&config.directory, file_name));
        guards.push(guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(LoggingHandle {
        service,
        directive,
        source,
        log_file,
        _guards: guards,
    })
}
