use std::collections::VecDeque;
use std::time::Duration;

use tracing::info;

/// Rolling latency histograms per operation (entry order, exit order).
pub struct LatencyTracker {
    histograms: dashmap::DashMap<String, VecDeque<Duration>>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            histograms: dashmap::DashMap::new(),
            max_samples,
        }
    }

    /// Record a latency sample for a named operation.
    pub fn record(&self, operation: &str, duration: Duration) {
        let max = self.max_samples;
        self.histograms
            .entry(operation.to_string())
            .and_modify(|hist| {
                if hist.len() >= max {
                    hist.pop_front();
                }
                hist.push_back(duration);
            })
            .or_insert_with(|| {
                let mut dq = VecDeque::with_capacity(max);
                dq.push_back(duration);
                dq
            });
    }

    /// p50, p95, p99 latencies for an operation, when any samples exist.
    pub fn percentiles(&self, operation: &str) -> Option<(Duration, Duration, Duration)> {
        let hist = self.histograms.get(operation)?;
        if hist.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = hist.iter().copied().collect();
        sorted.sort();

        let len = sorted.len();
        let p50 = sorted[len / 2];
        let p95 = sorted[((len as f64 * 0.95) as usize).min(len - 1)];
        let p99 = sorted[((len as f64 * 0.99) as usize).min(len - 1)];
        Some((p50, p95, p99))
    }

    /// Print a latency summary for every tracked operation.
    pub fn log_summary(&self) {
        for entry in self.histograms.iter() {
            if let Some((p50, p95, p99)) = self.percentiles(entry.key()) {
                info!(
                    "Latency {}: p50={:?} p95={:?} p99={:?} (n={})",
                    entry.key(),
                    p50,
                    p95,
                    p99,
                    entry.value().len()
                );
            }
        }
    }
}
