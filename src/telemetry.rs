//! Request latency telemetry.
//!
//! Every request that reaches the gateway dispatcher produces one sample:
//! the route it hit and how long the pipeline took, short-circuits included.
//! Samples land in two places:
//!
//! - an in-process aggregator ([`RequestTelemetry`]) read by the debug
//!   endpoint and the periodic summary log
//! - the `metrics` facade, exported to Prometheus when `METRICS_PORT` is set
//!
//! Recording is lock-sharded (DashMap) plus atomics and never waits on an
//! exporter.
//!
//! # Available Metrics
//!
//! - `lms_request_duration_seconds` (histogram; labels: path, status)
//! - `lms_requests_total` (counter; labels: path, status)
//! - `lms_gate_rejections_total` (counter; label: reason)

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUEST_DURATION_SECONDS: &str = "lms_request_duration_seconds";
    pub const REQUESTS_TOTAL: &str = "lms_requests_total";
    pub const GATE_REJECTIONS_TOTAL: &str = "lms_gate_rejections_total";
}

/// Placeholder for identifier segments in route keys.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Route key used once [`MAX_ROUTES`] distinct keys exist.
pub const OVERFLOW_ROUTE: &str = "{other}";

/// Upper bound on distinct route keys held in memory.
pub const MAX_ROUTES: usize = 512;

/// Bucket upper bounds in microseconds. A final overflow bucket follows.
const BUCKET_BOUNDS_MICROS: [u64; 11] = [
    5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000, 5_000_000,
    10_000_000,
];

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds, measured around the access gate and handler"
    );
    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests");
    describe_counter!(
        names::GATE_REJECTIONS_TOTAL,
        "Requests refused by the access gate"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Count a gate refusal.
pub fn record_gate_rejection(reason: &'static str) {
    counter!(names::GATE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Normalise a request path into a bounded-cardinality route key.
///
/// UUID and all-digit segments become `{id}`.
pub fn route_key(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            let is_id = Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()));
            if is_id { ID_PLACEHOLDER } else { segment }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Atomic latency histogram for one route.
#[derive(Debug, Default)]
pub struct LatencySeries {
    buckets: [AtomicU64; BUCKET_BOUNDS_MICROS.len() + 1],
    count: AtomicU64,
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl LatencySeries {
    pub fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let index = BUCKET_BOUNDS_MICROS
            .iter()
            .position(|bound| micros <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MICROS.len());

        if let Some(bucket) = self.buckets.get(index) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn summarize(&self, path: &str) -> RouteSummary {
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let count = self.count();
        let sum = self.sum_micros.load(Ordering::Relaxed);
        let max = self.max_micros.load(Ordering::Relaxed);

        let mean_ms = if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64 / 1000.0
        };

        RouteSummary {
            path: path.to_string(),
            count,
            mean_ms,
            p50_ms: quantile_ms(&counts, 0.50, max),
            p95_ms: quantile_ms(&counts, 0.95, max),
            p99_ms: quantile_ms(&counts, 0.99, max),
            max_ms: max as f64 / 1000.0,
        }
    }
}

/// Upper bound of the bucket holding quantile `q`, capped at the observed
/// maximum.
fn quantile_ms(counts: &[u64], q: f64, max_micros: u64) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let target = ((total as f64) * q).ceil().max(1.0) as u64;
    let mut seen = 0;
    for (i, c) in counts.iter().enumerate() {
        seen += c;
        if seen >= target {
            let bound = BUCKET_BOUNDS_MICROS.get(i).copied().unwrap_or(max_micros);
            return bound.min(max_micros) as f64 / 1000.0;
        }
    }
    max_micros as f64 / 1000.0
}

/// Per-route latency summary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouteSummary {
    pub path: String,
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// In-memory aggregator of request latency keyed by route.
#[derive(Debug, Default)]
pub struct RequestTelemetry {
    series: DashMap<String, Arc<LatencySeries>>,
}

impl RequestTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&self, path: &str, status: u16, elapsed: Duration) {
        let key = route_key(path);
        self.series_for(&key).observe(elapsed);

        let status = status.to_string();
        histogram!(
            names::REQUEST_DURATION_SECONDS,
            "path" => key.clone(),
            "status" => status.clone()
        )
        .record(elapsed.as_secs_f64());
        counter!(names::REQUESTS_TOTAL, "path" => key, "status" => status).increment(1);
    }

    fn series_for(&self, key: &str) -> Arc<LatencySeries> {
        if let Some(existing) = self.series.get(key) {
            return existing.clone();
        }

        let key = if self.series.len() >= MAX_ROUTES {
            OVERFLOW_ROUTE
        } else {
            key
        };
        self.series.entry(key.to_string()).or_default().clone()
    }

    /// Sample count for a raw path, after normalisation.
    pub fn count_for(&self, path: &str) -> u64 {
        self.series
            .get(&route_key(path))
            .map(|s| s.count())
            .unwrap_or(0)
    }

    /// Per-route summaries, busiest first.
    pub fn snapshot(&self) -> Vec<RouteSummary> {
        let mut summaries: Vec<RouteSummary> = self
            .series
            .iter()
            .map(|entry| entry.value().summarize(entry.key()))
            .collect();
        summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        summaries
    }

    /// Emit the busiest routes to the log.
    pub fn log_summary(&self, top: usize) {
        for summary in self.snapshot().into_iter().take(top) {
            info!(
                path = %summary.path,
                count = summary.count,
                mean_ms = summary.mean_ms,
                p95_ms = summary.p95_ms,
                max_ms = summary.max_ms,
                "Request latency summary"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_route_key_normalises_ids() {
        let id = Uuid::new_v4();
        assert_eq!(route_key(&format!("/courses/{id}")), "/courses/{id}");
        assert_eq!(
            route_key(&format!("/lessons/course/{id}")),
            "/lessons/course/{id}"
        );
        assert_eq!(route_key("/grades/42"), "/grades/{id}");
        assert_eq!(route_key("/health"), "/health");
        assert_eq!(route_key(""), "/");
    }

    #[test]
    fn test_record_and_snapshot() {
        let telemetry = RequestTelemetry::new();
        telemetry.record("/health", 200, Duration::from_millis(2));
        telemetry.record("/health", 200, Duration::from_millis(4));
        telemetry.record("/courses", 401, Duration::from_millis(30));

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, "/health");
        assert_eq!(snapshot[0].count, 2);
        assert!((snapshot[0].mean_ms - 3.0).abs() < 0.01);
        assert!((snapshot[0].max_ms - 4.0).abs() < 0.01);
        assert!(snapshot[0].p95_ms <= snapshot[0].max_ms);
    }

    #[test]
    fn test_ids_share_one_series() {
        let telemetry = RequestTelemetry::new();
        telemetry.record(&format!("/users/{}", Uuid::new_v4()), 200, Duration::ZERO);
        telemetry.record(&format!("/users/{}", Uuid::new_v4()), 404, Duration::ZERO);
        assert_eq!(telemetry.count_for("/users/{id}"), 2);
    }

    #[test]
    fn test_cardinality_is_bounded() {
        let telemetry = RequestTelemetry::new();
        for i in 0..(MAX_ROUTES + 10) {
            telemetry.record(&format!("/junk-{i}"), 404, Duration::ZERO);
        }
        assert_eq!(telemetry.snapshot().len(), MAX_ROUTES + 1);
        assert_eq!(telemetry.count_for(OVERFLOW_ROUTE), 10);
    }

    #[test]
    fn test_overflow_bucket_for_slow_requests() {
        let series = LatencySeries::default();
        series.observe(Duration::from_secs(60));
        let summary = series.summarize("/slow");
        assert_eq!(summary.count, 1);
        assert!((summary.p99_ms - 60_000.0).abs() < 0.01);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_samples_are_all_counted() {
        const TASKS: usize = 16;
        const PER_TASK: usize = 250;

        let telemetry = Arc::new(RequestTelemetry::new());
        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let telemetry = telemetry.clone();
                tokio::spawn(async move {
                    for i in 0..PER_TASK {
                        telemetry.record("/courses", 200, Duration::from_micros(i as u64));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(telemetry.count_for("/courses"), (TASKS * PER_TASK) as u64);
    }
}
