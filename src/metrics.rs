//! Resize-latency and growth metrics.
//!
//! Adapted from `velesdb-core/src/metrics/latency.rs`'s `LatencyStats`/
//! `compute_latency_percentiles`, which VelesDB's own `MmapStorage` uses to
//! watch for stop-the-world pauses during large resizes. This crate narrows
//! that idea to the two operations this core actually performs:
//! `ensure_size`/`truncate` growth and shrink.

use std::time::Duration;

use parking_lot::Mutex;

/// p50/p95/p99 summary over a bounded window of recorded durations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    /// 50th percentile.
    pub p50: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// Number of samples the percentiles were computed from.
    pub count: usize,
}

/// Computes p50/p95/p99 from an unsorted sample set, following
/// `metrics::latency::compute_latency_percentiles`'s nearest-rank method.
#[must_use]
pub fn compute_latency_percentiles(samples: &[Duration]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted: Vec<Duration> = samples.to_vec();
    sorted.sort_unstable();
    LatencyStats {
        p50: percentile(&sorted, 50),
        p95: percentile(&sorted, 95),
        p99: percentile(&sorted, 99),
        count: sorted.len(),
    }
}

fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (sorted.len() * pct).div_ceil(100).saturating_sub(1);
    sorted[rank.min(sorted.len() - 1)]
}

/// Maximum number of recent resize-latency samples retained per kind before
/// the oldest is evicted; bounds memory for long-lived instances.
const MAX_SAMPLES: usize = 4096;

#[derive(Default)]
struct Samples {
    grow: Vec<Duration>,
    shrink: Vec<Duration>,
}

impl Samples {
    fn push(buf: &mut Vec<Duration>, d: Duration) {
        if buf.len() == MAX_SAMPLES {
            buf.remove(0);
        }
        buf.push(d);
    }
}

/// Per-instance resize metrics: latency percentiles plus simple counters.
///
/// Mirrors `MmapStorage::metrics()`'s accessor shape: a cheap snapshot method
/// callers can poll, backed by a lock held only for the duration of a push
/// or snapshot.
pub struct StorageMetrics {
    samples: Mutex<Samples>,
    resize_count: std::sync::atomic::AtomicU64,
    bytes_grown: std::sync::atomic::AtomicU64,
}

impl Default for StorageMetrics {
    fn default() -> Self {
        Self {
            samples: Mutex::new(Samples::default()),
            resize_count: std::sync::atomic::AtomicU64::new(0),
            bytes_grown: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

/// Snapshot of [`StorageMetrics`] at a point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Latency distribution for growth operations.
    pub grow_latency: LatencyStats,
    /// Latency distribution for shrink operations.
    pub shrink_latency: LatencyStats,
    /// Total number of resizes (grow or shrink) observed.
    pub resize_count: u64,
    /// Total bytes added across all growth operations.
    pub bytes_grown: u64,
}

impl StorageMetrics {
    /// Creates an empty metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a growth resize: `old` -> `new` size, taking `elapsed`.
    pub fn record_grow(&self, old: u64, new: u64, elapsed: Duration) {
        let mut s = self.samples.lock();
        Samples::push(&mut s.grow, elapsed);
        drop(s);
        self.resize_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.bytes_grown.fetch_add(new.saturating_sub(old), std::sync::atomic::Ordering::Relaxed);
    }

    /// Records a shrink resize taking `elapsed`.
    pub fn record_shrink(&self, elapsed: Duration) {
        let mut s = self.samples.lock();
        Samples::push(&mut s.shrink, elapsed);
        drop(s);
        self.resize_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Computes a snapshot of current percentiles and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let s = self.samples.lock();
        MetricsSnapshot {
            grow_latency: compute_latency_percentiles(&s.grow),
            shrink_latency: compute_latency_percentiles(&s.shrink),
            resize_count: self.resize_count.load(std::sync::atomic::Ordering::Relaxed),
            bytes_grown: self.bytes_grown.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_of_empty_samples_are_zero() {
        let stats = compute_latency_percentiles(&[]);
        assert_eq!(stats, LatencyStats::default());
    }

    #[test]
    fn percentiles_of_uniform_samples_match() {
        let samples = vec![Duration::from_millis(10); 100];
        let stats = compute_latency_percentiles(&samples);
        assert_eq!(stats.p50, Duration::from_millis(10));
        assert_eq!(stats.p99, Duration::from_millis(10));
        assert_eq!(stats.count, 100);
    }

    #[test]
    fn percentiles_rank_ordering() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let stats = compute_latency_percentiles(&samples);
        assert_eq!(stats.p50, Duration::from_millis(50));
        assert_eq!(stats.p95, Duration::from_millis(95));
        assert_eq!(stats.p99, Duration::from_millis(99));
    }

    #[test]
    fn metrics_track_count_and_bytes() {
        let m = StorageMetrics::new();
        m.record_grow(4096, 8192, Duration::from_micros(50));
        m.record_grow(8192, 12288, Duration::from_micros(70));
        m.record_shrink(Duration::from_micros(20));
        let snap = m.snapshot();
        assert_eq!(snap.resize_count, 3);
        assert_eq!(snap.bytes_grown, 8192);
        assert_eq!(snap.grow_latency.count, 2);
        assert_eq!(snap.shrink_latency.count, 1);
    }

    #[test]
    fn sample_buffer_evicts_oldest_when_full() {
        let m = StorageMetrics::new();
        for i in 0..(MAX_SAMPLES + 10) {
            m.record_grow(0, 1, Duration::from_nanos(i as u64));
        }
        let snap = m.snapshot();
        assert_eq!(snap.grow_latency.count, MAX_SAMPLES);
    }
}
