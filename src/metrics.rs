//! Metric sink with histograms and gauges, sampled log emission
//! (component A, spec §4.A).
//!
//! Instrument kind is inferred from the dotted metric name: `_ms`/`_sec`
//! suffixes are histograms, `hit_rate` suffixes are gauges, everything
//! else defaults to a histogram. A sampling ratio controls how often a
//! per-metric summary line is logged; the raw observation is always
//! recorded regardless of sampling. Flushing to an external endpoint
//! runs on a dedicated background task, the way the teacher's
//! `pipeline::otel::OtelProcessor` offloads exporting to a dedicated
//! thread so the hot path never blocks on network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Histogram,
    Gauge,
}

fn infer_kind(name: &str) -> InstrumentKind {
    if name.ends_with("_ms") || name.ends_with("_sec") {
        InstrumentKind::Histogram
    } else if name.ends_with("hit_rate") {
        InstrumentKind::Gauge
    } else {
        InstrumentKind::Histogram
    }
}

#[derive(Debug, Clone)]
pub struct MetricSummary {
    pub kind: InstrumentKind,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

#[derive(Debug, Default)]
struct MetricState {
    kind: Option<InstrumentKind>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    /// Observations recorded since the last sampled log line.
    since_log: u64,
}

/// Thread-safe in-memory collector. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<HashMap<String, MetricState>>>,
    /// Sampling ratio R in [0, 1]; 0 means "record but never log a
    /// per-metric summary line."
    sampling_ratio: f64,
    total_observations: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub fn new(sampling_ratio: f64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            sampling_ratio: sampling_ratio.clamp(0.0, 1.0),
            total_observations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one observation for `name`. Thread-safe for concurrent use.
    pub fn record(&self, name: &str, value: f64) {
        self.total_observations.fetch_add(1, Ordering::Relaxed);

        let mut map = self.inner.write().expect("metrics lock poisoned");
        let state = map.entry(name.to_string()).or_default();
        if state.kind.is_none() {
            state.kind = Some(infer_kind(name));
            state.min = value;
            state.max = value;
        }
        state.count += 1;
        state.sum += value;
        state.min = state.min.min(value);
        state.max = state.max.max(value);
        state.last = value;
        state.since_log += 1;

        if self.should_log(state.since_log) {
            state.since_log = 0;
            tracing::debug!(
                metric = name,
                count = state.count,
                sum = state.sum,
                min = state.min,
                max = state.max,
                last = state.last,
                "metric summary"
            );
        }
    }

    /// Every ceil(1/R) observations a summary is logged; R=0 disables
    /// logging entirely (but observations still accumulate).
    fn should_log(&self, since_log: u64) -> bool {
        if self.sampling_ratio <= 0.0 {
            return false;
        }
        if self.sampling_ratio >= 1.0 {
            return true;
        }
        let period = (1.0 / self.sampling_ratio).ceil() as u64;
        since_log >= period.max(1)
    }

    pub fn snapshot(&self) -> HashMap<String, MetricSummary> {
        self.inner
            .read()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    MetricSummary {
                        kind: v.kind.unwrap_or(InstrumentKind::Histogram),
                        count: v.count,
                        sum: v.sum,
                        min: v.min,
                        max: v.max,
                        last: v.last,
                    },
                )
            })
            .collect()
    }
}

/// Pluggable exporter, flushed on a fixed interval.
#[async_trait::async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn export(&self, snapshot: &HashMap<String, MetricSummary>);
}

/// Default exporter: one summary line per metric to stdout.
pub struct StdoutExporter;

#[async_trait::async_trait]
impl MetricsExporter for StdoutExporter {
    async fn export(&self, snapshot: &HashMap<String, MetricSummary>) {
        for (name, summary) in snapshot {
            println!(
                "metric {name} kind={:?} count={} sum={:.3} min={:.3} max={:.3} last={:.3}",
                summary.kind, summary.count, summary.sum, summary.min, summary.max, summary.last
            );
        }
    }
}

/// Exporter posting the snapshot as JSON to an external metrics endpoint.
pub struct HttpExporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExporter {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait::async_trait]
impl MetricsExporter for HttpExporter {
    async fn export(&self, snapshot: &HashMap<String, MetricSummary>) {
        let body: HashMap<&str, serde_json::Value> = snapshot
            .iter()
            .map(|(name, summary)| {
                (
                    name.as_str(),
                    serde_json::json!({
                        "count": summary.count,
                        "sum": summary.sum,
                        "min": summary.min,
                        "max": summary.max,
                        "last": summary.last,
                    }),
                )
            })
            .collect();

        if let Err(err) = self.client.post(&self.endpoint).json(&body).send().await {
            tracing::warn!(error = %err, "metrics export failed");
        }
    }
}

/// Spawn the periodic flush task. Returns a handle that can be aborted
/// on shutdown.
pub fn spawn_exporter(
    collector: MetricsCollector,
    exporter: Arc<dyn MetricsExporter>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot = collector.snapshot();
            exporter.export(&snapshot).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_histogram_for_ms_and_sec_suffix() {
        assert_eq!(infer_kind("bulk_index_ms"), InstrumentKind::Histogram);
        assert_eq!(infer_kind("flush_sec"), InstrumentKind::Histogram);
    }

    #[test]
    fn infers_gauge_for_hit_rate_suffix() {
        assert_eq!(infer_kind("routing_cache_hit_rate"), InstrumentKind::Gauge);
    }

    #[test]
    fn defaults_to_histogram() {
        assert_eq!(infer_kind("records_processed"), InstrumentKind::Histogram);
    }

    #[test]
    fn records_min_max_last() {
        let collector = MetricsCollector::new(0.0);
        collector.record("x", 1.0);
        collector.record("x", 5.0);
        collector.record("x", 3.0);
        let snap = collector.snapshot();
        let s = &snap["x"];
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        assert_eq!(s.last, 3.0);
        assert_eq!(s.sum, 9.0);
    }

    #[test]
    fn sampling_ratio_zero_never_logs_but_still_records() {
        let collector = MetricsCollector::new(0.0);
        for _ in 0..10 {
            collector.record("y", 1.0);
        }
        assert_eq!(collector.snapshot()["y"].count, 10);
    }
}
