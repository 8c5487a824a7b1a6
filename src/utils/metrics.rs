use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::StageKind;

/// Process-wide metrics collector.
///
/// Tracks request outcomes, per-stage durations and failures, and endpoint
/// traffic. Cheap to clone and safe to share between handlers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Request outcomes
    requests_total: AtomicUsize,
    requests_succeeded: AtomicUsize,
    requests_rejected: AtomicUsize,
    requests_failed: AtomicUsize,
    request_duration_ms: RwLock<Vec<u64>>,

    // Stage metrics keyed by stage key
    stage_duration_ms: DashMap<&'static str, Vec<u64>>,
    stage_failures: DashMap<&'static str, AtomicUsize>,

    boxes_detected: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_total: AtomicUsize::new(0),
                requests_succeeded: AtomicUsize::new(0),
                requests_rejected: AtomicUsize::new(0),
                requests_failed: AtomicUsize::new(0),
                request_duration_ms: RwLock::new(Vec::new()),
                stage_duration_ms: DashMap::new(),
                stage_failures: DashMap::new(),
                boxes_detected: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Request Metrics
    pub fn record_request_success(&self, duration: Duration) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.inner
            .request_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    /// Client error (bad upload), no pipeline work was done
    pub fn record_request_rejected(&self) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_failure(&self, duration: Duration) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .request_duration_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    // Stage Metrics
    pub fn record_stage_duration(&self, stage: StageKind, duration: Duration) {
        self.inner
            .stage_duration_ms
            .entry(stage.key())
            .or_default()
            .push(duration.as_millis() as u64);
    }

    pub fn record_stage_failure(&self, stage: StageKind) {
        self.inner
            .stage_failures
            .entry(stage.key())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_boxes_detected(&self, count: usize) {
        self.inner.boxes_detected.fetch_add(count, Ordering::Relaxed);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let durations = self.inner.request_duration_ms.read();
        let request_avg = avg(&durations);
        let request_p50 = percentile(&durations, 0.5);
        let request_p95 = percentile(&durations, 0.95);
        drop(durations);

        let stages = StageKind::ALL
            .iter()
            .map(|stage| {
                let key = stage.key();
                let (runs, avg_ms) = self
                    .inner
                    .stage_duration_ms
                    .get(key)
                    .map(|d| (d.len(), avg(&d)))
                    .unwrap_or((0, 0));
                let failures = self
                    .inner
                    .stage_failures
                    .get(key)
                    .map(|c| c.load(Ordering::Relaxed))
                    .unwrap_or(0);
                (
                    key.to_string(),
                    StageSnapshot {
                        runs,
                        failures,
                        avg_ms,
                    },
                )
            })
            .collect();

        let endpoints = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            requests_total: self.inner.requests_total.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_rejected: self.inner.requests_rejected.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            request_avg_ms: request_avg,
            request_p50_ms: request_p50,
            request_p95_ms: request_p95,
            boxes_detected: self.inner.boxes_detected.load(Ordering::Relaxed),
            stages,
            endpoints,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP requests_total Total number of upload requests
# TYPE requests_total counter
requests_total {{}} {}

# HELP requests_succeeded_total Requests that produced a cleaned image
# TYPE requests_succeeded_total counter
requests_succeeded_total {{}} {}

# HELP requests_rejected_total Requests rejected as invalid input
# TYPE requests_rejected_total counter
requests_rejected_total {{}} {}

# HELP requests_failed_total Requests that failed inside the pipeline
# TYPE requests_failed_total counter
requests_failed_total {{}} {}

# HELP request_avg_duration_ms Average request duration in milliseconds
# TYPE request_avg_duration_ms gauge
request_avg_duration_ms {{}} {}

# HELP boxes_detected_total Text boxes found by the detector
# TYPE boxes_detected_total counter
boxes_detected_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
"#,
            snapshot.requests_total,
            snapshot.requests_succeeded,
            snapshot.requests_rejected,
            snapshot.requests_failed,
            snapshot.request_avg_ms,
            snapshot.boxes_detected,
            snapshot.uptime_seconds,
        );

        for (stage, s) in &snapshot.stages {
            let _ = writeln!(out, "stage_avg_duration_ms {{stage=\"{stage}\"}} {}", s.avg_ms);
        }
        out.push_str("\n# HELP stage_failures_total Stage failures\n# TYPE stage_failures_total counter\n");
        for (stage, s) in &snapshot.stages {
            let _ = writeln!(out, "stage_failures_total {{stage=\"{stage}\"}} {}", s.failures);
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub runs: usize,
    pub failures: usize,
    pub avg_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: usize,
    pub requests_succeeded: usize,
    pub requests_rejected: usize,
    pub requests_failed: usize,
    pub request_avg_ms: u64,
    pub request_p50_ms: u64,
    pub request_p95_ms: u64,
    pub boxes_detected: usize,
    pub stages: BTreeMap<String, StageSnapshot>,
    pub endpoints: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
