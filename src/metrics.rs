//! Observability: latency histograms and event counters for the pipeline.
//! Histograms keep a fixed window of samples and report p50/p95/p99.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Measures one operation from creation until `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record elapsed milliseconds and return them.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.registry.record(self.name, elapsed_ms);
        elapsed_ms
    }
}

/// Fixed-capacity sample window.
struct SampleWindow {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

#[derive(Default)]
struct Inner {
    histograms: HashMap<&'static str, SampleWindow>,
    counters: HashMap<&'static str, u64>,
}

pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    window: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            window: 512,
        }
    }

    /// Record a latency sample in milliseconds.
    pub fn record(&self, name: &'static str, value_ms: f64) {
        let mut inner = self.inner.lock();
        inner
            .histograms
            .entry(name)
            .or_insert_with(|| SampleWindow::new(self.window))
            .push(value_ms);
        tracing::trace!(metric = name, value_ms, "metric_recorded");
    }

    pub fn increment(&self, name: &'static str) {
        *self.inner.lock().counters.entry(name).or_insert(0) += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.inner
            .lock()
            .histograms
            .get(name)
            .map_or(0.0, |w| w.percentile(p))
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let inner = self.inner.lock();
        inner
            .histograms
            .iter()
            .map(|(&name, window)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_ms: window.percentile(50.0),
                        p95_ms: window.percentile(95.0),
                        p99_ms: window.percentile(99.0),
                        count: window.count,
                    },
                )
            })
            .collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

/// Well-known metric names.
pub mod metric_names {
    // histograms
    pub const SCAN: &str = "scan";
    pub const QUEUE_WAIT: &str = "queue_wait";
    pub const GATEWAY_CALL: &str = "gateway_call";
    pub const TARGET_SETTLED: &str = "target_settled";
    pub const RPC_ROUND_TRIP: &str = "rpc_round_trip";
    // counters
    pub const CACHE_HIT: &str = "cache_hit";
    pub const DEDUP_JOINED: &str = "dedup_joined";
    pub const NETWORK_CALL: &str = "network_call";
    pub const CIRCUIT_REJECTED: &str = "circuit_rejected";
    pub const STALE_RESULT: &str = "stale_result";
}
