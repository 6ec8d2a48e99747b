//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::ScanKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for dispatch latency (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// Counters are monotonic. The dispatch histogram is cumulative so the
/// Prometheus endpoint and the periodic log see the same numbers.
pub struct Metrics {
    /// Scan events received from the feed
    scans_received: AtomicU64,
    /// Scans received since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Single-scan decisions emitted
    decisions_single: AtomicU64,
    /// Double-scan decisions emitted
    decisions_double: AtomicU64,
    /// Pending scans resolved because the feed closed
    decisions_flushed: AtomicU64,
    /// Dispatches that returned an error
    dispatch_failures: AtomicU64,
    /// Dispatch latency histogram buckets (milliseconds)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    dispatch_latency_sum_ms: AtomicU64,
    dispatch_latency_max_ms: AtomicU64,
    /// Feed (re)connections established
    feed_connects: AtomicU64,
    /// Feed messages that could not be turned into a scan
    feed_messages_invalid: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_received: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            decisions_single: AtomicU64::new(0),
            decisions_double: AtomicU64::new(0),
            decisions_flushed: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_sum_ms: AtomicU64::new(0),
            dispatch_latency_max_ms: AtomicU64::new(0),
            feed_connects: AtomicU64::new(0),
            feed_messages_invalid: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_scan_received(&self) {
        self.scans_received.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decision(&self, kind: ScanKind) {
        match kind {
            ScanKind::Single => &self.decisions_single,
            ScanKind::Double => &self.decisions_double,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush(&self) {
        self.decisions_flushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed dispatch and whether it failed
    #[inline]
    pub fn record_dispatch(&self, latency_ms: u64, failed: bool) {
        if failed {
            self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.dispatch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.dispatch_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.dispatch_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_feed_connect(&self) {
        self.feed_connects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feed_message_invalid(&self) {
        self.feed_messages_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scans_received(&self) -> u64 {
        self.scans_received.load(Ordering::Relaxed)
    }

    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    /// Snapshot all metrics
    ///
    /// Only the per-interval scan rate is reset; everything else is cumulative.
    pub fn report(&self) -> MetricsSummary {
        let scans_since_report = self.scans_since_report.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let scans_per_min = if elapsed.as_secs_f64() > 0.0 {
            scans_since_report as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let dispatch_latency_buckets = load_buckets(&self.dispatch_latency_buckets);
        let dispatch_count: u64 = dispatch_latency_buckets.iter().sum();
        let dispatch_latency_sum_ms = self.dispatch_latency_sum_ms.load(Ordering::Relaxed);
        let dispatch_latency_avg_ms =
            if dispatch_count > 0 { dispatch_latency_sum_ms / dispatch_count } else { 0 };

        MetricsSummary {
            scans_received: self.scans_received.load(Ordering::Relaxed),
            scans_per_min,
            decisions_single: self.decisions_single.load(Ordering::Relaxed),
            decisions_double: self.decisions_double.load(Ordering::Relaxed),
            decisions_flushed: self.decisions_flushed.load(Ordering::Relaxed),
            dispatch_total: dispatch_count,
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            dispatch_latency_buckets,
            dispatch_latency_sum_ms,
            dispatch_latency_avg_ms,
            dispatch_latency_max_ms: self.dispatch_latency_max_ms.load(Ordering::Relaxed),
            dispatch_latency_p99_ms: percentile_from_buckets(&dispatch_latency_buckets, 0.99),
            feed_connects: self.feed_connects.load(Ordering::Relaxed),
            feed_messages_invalid: self.feed_messages_invalid.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub scans_received: u64,
    pub scans_per_min: f64,
    pub decisions_single: u64,
    pub decisions_double: u64,
    pub decisions_flushed: u64,
    pub dispatch_total: u64,
    pub dispatch_failures: u64,
    pub dispatch_latency_buckets: [u64; NUM_BUCKETS],
    pub dispatch_latency_sum_ms: u64,
    pub dispatch_latency_avg_ms: u64,
    pub dispatch_latency_max_ms: u64,
    pub dispatch_latency_p99_ms: u64,
    pub feed_connects: u64,
    pub feed_messages_invalid: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_received,
            scans_per_min = format!("{:.1}", self.scans_per_min),
            single = %self.decisions_single,
            double = %self.decisions_double,
            flushed = %self.decisions_flushed,
            dispatch_failures = %self.dispatch_failures,
            dispatch_avg_ms = %self.dispatch_latency_avg_ms,
            dispatch_p99_ms = %self.dispatch_latency_p99_ms,
            feed_connects = %self.feed_connects,
            "metrics"
        );
    }
}
