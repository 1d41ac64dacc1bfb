use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range for `currentOp` round trips: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Live sampler counters.
///
/// The counters are plain atomics so any thread can read them while the
/// sampler runs. Only the latency histogram sits behind a lock, and the
/// sampler holds it for a single `record` per tick.
pub struct SamplerStats {
    num_samples: AtomicU64,
    num_ops: AtomicU64,
    num_dropped: AtomicU64,
    poll_latency: Mutex<Histogram<u64>>,
}

/// Percentile breakdown of how long the server took to answer `currentOp`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PollLatency {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub count: u64,
}

/// Point-in-time copy of the sampler counters.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerSnapshot {
    pub num_samples: u64,
    pub num_ops: u64,
    pub num_dropped: u64,
    pub poll_latency: PollLatency,
}

// ─── SamplerStats impl ───────────────────────────────────────────

impl SamplerStats {
    pub fn new() -> Self {
        Self {
            num_samples: AtomicU64::new(0),
            num_ops: AtomicU64::new(0),
            num_dropped: AtomicU64::new(0),
            poll_latency: Mutex::new(new_histogram()),
        }
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples.load(Ordering::Relaxed)
    }

    pub fn num_ops(&self) -> u64 {
        self.num_ops.load(Ordering::Relaxed)
    }

    pub fn num_dropped(&self) -> u64 {
        self.num_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sample(&self, ops: usize) {
        self.num_samples.fetch_add(1, Ordering::Relaxed);
        self.num_ops.fetch_add(ops as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.num_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one `currentOp` round trip (clamped to ≥ 1 μs).
    pub(crate) fn record_poll(&self, micros: u64) {
        let _ = self.poll_latency.lock().record(micros.clamp(HIST_LOW, HIST_HIGH));
    }

    /// Zeroes everything — called when a sampler (re)starts.
    pub(crate) fn reset(&self) {
        self.num_samples.store(0, Ordering::Relaxed);
        self.num_ops.store(0, Ordering::Relaxed);
        self.num_dropped.store(0, Ordering::Relaxed);
        self.poll_latency.lock().reset();
    }

    pub fn snapshot(&self) -> SamplerSnapshot {
        SamplerSnapshot {
            num_samples: self.num_samples(),
            num_ops: self.num_ops(),
            num_dropped: self.num_dropped(),
            poll_latency: PollLatency::from_histogram(&self.poll_latency.lock()),
        }
    }
}

impl Default for SamplerStats {
    fn default() -> Self {
        Self::new()
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}

// ─── PollLatency impl ────────────────────────────────────────────

impl PollLatency {
    /// Zeroed values when nothing has been recorded yet.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self {
                min_us: 0,
                max_us: 0,
                mean_us: 0.0,
                p50_us: 0,
                p95_us: 0,
                p99_us: 0,
                p999_us: 0,
                count: 0,
            };
        }

        Self {
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_quantile(0.50),
            p95_us: hist.value_at_quantile(0.95),
            p99_us: hist.value_at_quantile(0.99),
            p999_us: hist.value_at_quantile(0.999),
            count: hist.len(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_stats() {
        let stats = SamplerStats::new();
        assert_eq!(stats.num_samples(), 0);
        assert_eq!(stats.num_ops(), 0);
        assert_eq!(stats.num_dropped(), 0);
        assert!(!stats.snapshot().poll_latency.has_data());
    }

    #[test]
    fn test_counters_and_reset() {
        let stats = SamplerStats::new();
        stats.record_sample(3);
        stats.record_sample(0);
        stats.record_drop();
        stats.record_poll(0);
        stats.record_poll(250);

        let snap = stats.snapshot();
        assert_eq!(snap.num_samples, 2);
        assert_eq!(snap.num_ops, 3);
        assert_eq!(snap.num_dropped, 1);
        assert_eq!(snap.poll_latency.count, 2);
        assert_eq!(snap.poll_latency.min_us, 1);

        stats.reset();
        assert_eq!(stats.num_samples(), 0);
        assert_eq!(stats.snapshot().poll_latency.count, 0);
    }
}
