//! Opt-in session counters and the logging setup.
//!
//! Counters stay off unless `TIDEPOOL_PERF` is set to something other than
//! `0`. When on, every metric is summarized through `tracing` at target
//! `telemetry::perf` once per [`REPORT_INTERVAL`] samples.

pub mod logging;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub const PERF_ENV: &str = "TIDEPOOL_PERF";
pub const REPORT_INTERVAL: u64 = 64;

static ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var(PERF_ENV)
        .map(|value| !value.is_empty() && value != "0")
        .unwrap_or(false)
});

static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::default()));

/// What the session measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Wall time spent applying one merged response, in microseconds.
    ApplyResponse,
    ResponseChunks,
    RenderUpdates,
    RequestEvents,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::ApplyResponse => "session.apply_response_us",
            Metric::ResponseChunks => "session.response_chunks",
            Metric::RenderUpdates => "session.render_updates",
            Metric::RequestEvents => "session.request_events",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Series {
    pub samples: u64,
    pub total: u64,
    pub max: u64,
    pub last: u64,
}

impl Series {
    fn push(&mut self, value: u64) {
        self.samples = self.samples.saturating_add(1);
        self.total = self.total.saturating_add(value);
        self.max = self.max.max(value);
        self.last = value;
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.total as f64 / self.samples as f64
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    series: HashMap<Metric, Series>,
}

impl Metrics {
    /// Adds a sample. Returns the series when it is due for a report.
    pub fn record(&mut self, metric: Metric, value: u64) -> Option<Series> {
        let series = self.series.entry(metric).or_default();
        series.push(value);
        (series.samples % REPORT_INTERVAL == 0).then_some(*series)
    }

    pub fn get(&self, metric: Metric) -> Option<Series> {
        self.series.get(&metric).copied()
    }
}

pub fn enabled() -> bool {
    *ENABLED
}

pub fn record(metric: Metric, value: u64) {
    if !enabled() {
        return;
    }
    let due = METRICS.lock().record(metric, value);
    if let Some(series) = due {
        tracing::info!(
            target = "telemetry::perf",
            metric = %metric,
            samples = series.samples,
            mean = format_args!("{:.2}", series.mean()),
            max = series.max,
            last = series.last,
            "perf summary"
        );
    }
}

pub fn record_duration(metric: Metric, elapsed: Duration) {
    record(metric, u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
}

/// Current totals for `metric`; `None` until it was recorded while enabled.
pub fn series(metric: Metric) -> Option<Series> {
    METRICS.lock().get(metric)
}

/// Times its own lifetime into a duration metric.
pub struct PerfGuard {
    metric: Metric,
    start: Instant,
}

impl PerfGuard {
    pub fn new(metric: Metric) -> Option<Self> {
        enabled().then(|| Self {
            metric,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.metric, self.start.elapsed());
    }
}
