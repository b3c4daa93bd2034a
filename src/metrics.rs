//! Process-Wide Metrics
//!
//! One [`Metrics`] instance lives for the whole process and is shared by
//! every connection and the store. Counters are lock-free atomics; the
//! latency percentiles come from a mutex-protected FIFO reservoir of the
//! last 10 000 samples.
//!
//! The STATS command renders the collected numbers as a JSON object with a
//! stable key set, so dashboards can scrape it without caring about field
//! order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// How many latency samples the reservoir keeps (FIFO eviction).
const MAX_SAMPLES: usize = 10_000;

/// Latency distribution: six fixed buckets plus a percentile reservoir.
///
/// Buckets are keyed by milliseconds: <1, <5, <10, <50, <100, >=100.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    bucket_1ms: AtomicU64,
    bucket_5ms: AtomicU64,
    bucket_10ms: AtomicU64,
    bucket_50ms: AtomicU64,
    bucket_100ms: AtomicU64,
    bucket_plus: AtomicU64,

    samples: Mutex<VecDeque<u64>>,
}

impl LatencyHistogram {
    /// Records one latency observation in microseconds.
    pub fn record(&self, micros: u64) {
        let millis = micros / 1000;
        if millis < 1 {
            self.bucket_1ms.fetch_add(1, Ordering::Relaxed);
        } else if millis < 5 {
            self.bucket_5ms.fetch_add(1, Ordering::Relaxed);
        } else if millis < 10 {
            self.bucket_10ms.fetch_add(1, Ordering::Relaxed);
        } else if millis < 50 {
            self.bucket_50ms.fetch_add(1, Ordering::Relaxed);
        } else if millis < 100 {
            self.bucket_100ms.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bucket_plus.fetch_add(1, Ordering::Relaxed);
        }

        let mut samples = self.samples.lock().unwrap();
        samples.push_back(micros);
        if samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    /// Computes the p-th percentile (0.0..1.0) over the current reservoir.
    ///
    /// Returns 0 when no samples have been recorded yet.
    pub fn percentile(&self, p: f64) -> u64 {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((p * sorted.len() as f64) as usize).min(sorted.len() - 1);
        sorted[index]
    }

    /// Snapshot of the bucket counts, in boundary order.
    pub fn bucket_counts(&self) -> [u64; 6] {
        [
            self.bucket_1ms.load(Ordering::Relaxed),
            self.bucket_5ms.load(Ordering::Relaxed),
            self.bucket_10ms.load(Ordering::Relaxed),
            self.bucket_50ms.load(Ordering::Relaxed),
            self.bucket_100ms.load(Ordering::Relaxed),
            self.bucket_plus.load(Ordering::Relaxed),
        ]
    }
}

/// Cache, latency, and batch counters for the whole process.
#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_requests: AtomicU64,
    total_latency_us: AtomicU64,

    total_batches: AtomicU64,
    total_batched_writes: AtomicU64,

    histogram: LatencyHistogram,
}

static GLOBAL: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    /// Creates a detached instance. Production code uses [`Metrics::global`];
    /// this exists so tests can assert on counters in isolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance.
    pub fn global() -> &'static Metrics {
        GLOBAL.get_or_init(Metrics::default)
    }

    /// Records a cache hit. Every hit is also a request, which keeps
    /// `cache_hits + cache_misses == total_requests` true at all times.
    pub fn record_hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss (missing key or expired entry).
    pub fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one operation latency in microseconds.
    pub fn record_latency(&self, micros: u64) {
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.histogram.record(micros);
    }

    /// Records one drained write batch of the given size.
    pub fn record_batch(&self, batch_size: usize) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_batched_writes
            .fetch_add(batch_size as u64, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Renders the STATS JSON object.
    pub fn to_json(&self) -> String {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = self.total_requests.load(Ordering::Relaxed);
        let latency = self.total_latency_us.load(Ordering::Relaxed);

        let hit_rate = if total > 0 {
            100.0 * hits as f64 / total as f64
        } else {
            0.0
        };
        let avg_latency_us = if total > 0 {
            latency as f64 / total as f64
        } else {
            0.0
        };

        let batches = self.total_batches.load(Ordering::Relaxed);
        let batched_writes = self.total_batched_writes.load(Ordering::Relaxed);
        let batch_avg_size = if batches > 0 {
            batched_writes as f64 / batches as f64
        } else {
            0.0
        };

        let buckets = self.histogram.bucket_counts();

        serde_json::json!({
            "cache_hits": hits,
            "cache_misses": misses,
            "total_requests": total,
            "hit_rate": hit_rate,
            "avg_latency_us": avg_latency_us,
            "p50_latency_us": self.histogram.percentile(0.50),
            "p95_latency_us": self.histogram.percentile(0.95),
            "p99_latency_us": self.histogram.percentile(0.99),
            "p50_less_than_1ms": buckets[0],
            "p99_tail_events": buckets[5],
            "batch_avg_size": batch_avg_size,
            "histogram": {
                "<1ms": buckets[0],
                "<5ms": buckets[1],
                "<10ms": buckets[2],
                "<50ms": buckets[3],
                "<100ms": buckets[4],
                ">=100ms": buckets[5],
            },
        })
        .to_string()
    }
}
