//! Global `tracing` subscriber for the binary.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Full filter directive overriding the level-derived default.
pub const FILTER_ENV: &str = "TIDEPOOL_LOG_FILTER";

/// Crate names plus the `<module>::<area>` roots our events log under.
const OWN_TARGETS: [&str; 10] = [
    "tidepool",
    "tidepool_core",
    "route_bus",
    "cli",
    "config",
    "refs",
    "route",
    "sync",
    "telemetry",
    "tree",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot open log file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("a global subscriber is already installed: {0}")]
    AlreadySet(String),
}

// Dropping the guard would stop the background writer.
static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber once; repeated calls return `Ok`.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if WRITER_GUARD.get().is_some() {
        return Ok(());
    }

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = std::env::var(FILTER_ENV)
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_names(config.level == LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::AlreadySet(err.to_string()))?;

    let _ = WRITER_GUARD.set(guard);
    Ok(())
}

/// Our crates follow `level`; everything else stays at warn unless trace
/// was asked for.
fn default_directive(level: LogLevel) -> String {
    let filter = LevelFilter::from(level);
    if level == LogLevel::Trace {
        return "trace".to_string();
    }
    let level = filter.to_string().to_lowercase();
    let mut directive = String::from("warn");
    for target in OWN_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}
