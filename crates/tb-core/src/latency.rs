//! Histogram of end-to-end relay latency (frame receipt → publish ack).
//!
//! Fixed 50µs bins cover 0–1s; anything slower lands in the last bin but is
//! still reflected in `max_us` and the mean.

/// Width of each histogram bin in microseconds.
const BIN_WIDTH_US: u64 = 50;

/// Number of histogram bins (covers 0–1s).
const NUM_BINS: usize = 20_000;

/// Snapshot of the recorded latencies.
#[derive(Debug, Clone, Copy)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} min={}µs mean={:.0}µs p50={}µs p99={}µs max={}µs",
            self.count, self.min_us, self.mean_us, self.p50_us, self.p99_us, self.max_us,
        )
    }
}

/// Latency histogram. Owned by a single task; reset after each report.
pub struct LatencyHistogram {
    bins: Vec<u64>,
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self { bins: vec![0u64; NUM_BINS], count: 0, sum: 0, min: u64::MAX, max: 0 }
    }

    #[inline]
    pub fn record(&mut self, latency_us: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(latency_us);
        self.min = self.min.min(latency_us);
        self.max = self.max.max(latency_us);
        let bin = usize::try_from(latency_us / BIN_WIDTH_US).unwrap_or(usize::MAX).min(NUM_BINS - 1);
        self.bins[bin] += 1;
    }

    /// `None` until something is recorded.
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.count == 0 {
            return None;
        }
        Some(LatencySummary {
            count: self.count,
            min_us: self.min,
            max_us: self.max,
            mean_us: self.sum as f64 / self.count as f64,
            p50_us: self.quantile(50),
            p99_us: self.quantile(99),
        })
    }

    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.count = 0;
        self.sum = 0;
        self.min = u64::MAX;
        self.max = 0;
    }

    /// Lower edge of the bin holding the `pct`-th percentile sample.
    fn quantile(&self, pct: u64) -> u64 {
        let target = (self.count * pct).div_ceil(100).max(1);
        let mut seen = 0u64;
        for (i, &n) in self.bins.iter().enumerate() {
            seen += n;
            if seen >= target {
                return (i as u64 * BIN_WIDTH_US).min(self.max);
            }
        }
        self.max
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_uniform_samples() {
        let mut h = LatencyHistogram::new();
        for i in 1..=100 {
            h.record(i * 100); // 100µs .. 10ms
        }
        let s = h.summary().unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.min_us, 100);
        assert_eq!(s.max_us, 10_000);
        assert!(s.p50_us >= 4_950 && s.p50_us <= 5_000);
        assert!(s.p99_us >= 9_850 && s.p99_us <= 9_900);
    }

    #[test]
    fn empty_has_no_summary() {
        assert!(LatencyHistogram::new().summary().is_none());
    }

    #[test]
    fn slow_samples_clamp_to_last_bin() {
        let mut h = LatencyHistogram::new();
        h.record(5_000_000);
        let s = h.summary().unwrap();
        assert_eq!(s.max_us, 5_000_000);
        assert_eq!(s.p99_us, (NUM_BINS as u64 - 1) * BIN_WIDTH_US);
    }

    #[test]
    fn reset_clears() {
        let mut h = LatencyHistogram::new();
        h.record(10);
        h.reset();
        assert!(h.summary().is_none());
    }
}
