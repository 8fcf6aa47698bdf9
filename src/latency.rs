//! Storefront fetch latency, summarised once per run.

use std::time::Duration;

/// Values stored in milliseconds.
pub struct FetchLatency {
    inner: hdrhistogram::Histogram<u64>,
}

impl FetchLatency {
    /// Tracks 1ms to 10min, 3 significant figures.
    pub fn new() -> Self {
        let inner = hdrhistogram::Histogram::new_with_bounds(1, 600_000, 3)
            .expect("valid histogram bounds");
        Self { inner }
    }

    pub fn record(&mut self, d: Duration) {
        let ms = d.as_millis().clamp(1, 600_000) as u64;
        let _ = self.inner.record(ms);
    }

    /// Return (p50_ms, p95_ms, max_ms). None if no samples.
    pub fn percentiles(&self) -> Option<(u64, u64, u64)> {
        if self.inner.len() == 0 {
            return None;
        }
        Some((
            self.inner.value_at_quantile(0.5),
            self.inner.value_at_quantile(0.95),
            self.inner.max(),
        ))
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }
}

impl Default for FetchLatency {
    fn default() -> Self {
        Self::new()
    }
}
