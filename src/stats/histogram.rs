//! Latency histogram using HdrHistogram
//!
//! Session-wide accumulation of per-node round-trip times and frame times.
//! Purely diagnostic: the balancer only ever looks at the last frame.
//!
//! # Example
//!
//! ```
//! use mandelfarm::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_millis(12));
//! hist.record(Duration::from_millis(18));
//!
//! assert_eq!(hist.len(), 2);
//! assert!(hist.percentile(50.0).is_some());
//! ```

use crate::Result;
use hdrhistogram::Histogram;
use std::time::Duration;

/// Largest trackable value: one hour in nanoseconds
const MAX_TRACKABLE_NANOS: u64 = 3_600_000_000_000;

/// Latency histogram wrapper
///
/// One of these exists per node plus one for whole-frame times. Samples are
/// stored in nanoseconds.
///
/// # Precision
///
/// - 3 significant digits: every reported value is within 0.1% of a recorded one
/// - Recording and querying are O(1)
///
/// # Range
///
/// - **Minimum**: 1 nanosecond
/// - **Maximum**: 1 hour (`MAX_TRACKABLE_NANOS`); a frame that takes longer
///   is recorded as exactly one hour
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty histogram covering 1ns to 1 hour
    pub fn new() -> Self {
        // Constant bounds: construction cannot fail
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_NANOS, 3)
            .expect("histogram bounds are valid constants");
        Self { histogram }
    }

    /// Record one sample
    ///
    /// Values outside `[1ns, 1h]` are clamped rather than dropped, so a zero
    /// duration (a worker answering an empty region) still counts.
    ///
    /// # Arguments
    ///
    /// * `latency` - Round-trip or frame time to add
    ///
    /// # Example
    ///
    /// ```
    /// use mandelfarm::stats::histogram::LatencyHistogram;
    /// use std::time::Duration;
    ///
    /// let mut hist = LatencyHistogram::new();
    /// hist.record(Duration::ZERO);
    /// hist.record(Duration::from_millis(40));
    ///
    /// assert_eq!(hist.len(), 2);
    /// assert_eq!(hist.min(), Some(Duration::from_nanos(1)));
    /// ```
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let value = nanos.clamp(1, MAX_TRACKABLE_NANOS);
        let _ = self.histogram.record(value);
    }

    /// Value at a percentile
    ///
    /// # Arguments
    ///
    /// * `percentile` - Percentile to query, 0.0 to 100.0
    ///
    /// # Returns
    ///
    /// The recorded latency at that percentile, or `None` when nothing has
    /// been recorded yet.
    ///
    /// # Example
    ///
    /// ```
    /// use mandelfarm::stats::histogram::LatencyHistogram;
    /// use std::time::Duration;
    ///
    /// let mut hist = LatencyHistogram::new();
    /// assert!(hist.percentile(99.0).is_none());
    ///
    /// for ms in 1..=10 {
    ///     hist.record(Duration::from_millis(ms));
    /// }
    /// let p90 = hist.percentile(90.0).unwrap();
    /// assert!(p90 >= Duration::from_millis(8) && p90 <= Duration::from_millis(10));
    /// ```
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.value_at_percentile(percentile)))
    }

    /// Smallest recorded sample, or `None` when empty
    pub fn min(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.min()))
    }

    /// Largest recorded sample, or `None` when empty
    pub fn max(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.max()))
    }

    /// Arithmetic mean of all samples, truncated to whole nanoseconds
    pub fn mean(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.mean() as u64))
    }

    /// Standard deviation of all samples, or `None` when empty
    pub fn stddev(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.stdev() as u64))
    }

    /// Number of recorded samples
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }

    /// Fold another histogram into this one
    ///
    /// Used to build the cluster-wide latency view from the per-node ones.
    ///
    /// # Arguments
    ///
    /// * `other` - Histogram whose samples are added; it is left unchanged
    ///
    /// # Errors
    ///
    /// Fails if `other` holds values this histogram cannot represent. Two
    /// histograms built with [`LatencyHistogram::new`] always merge.
    ///
    /// # Example
    ///
    /// ```
    /// use mandelfarm::stats::histogram::LatencyHistogram;
    /// use std::time::Duration;
    ///
    /// let mut cluster = LatencyHistogram::new();
    /// let mut worker = LatencyHistogram::new();
    /// worker.record(Duration::from_millis(7));
    /// worker.record(Duration::from_millis(9));
    ///
    /// cluster.merge(&worker).unwrap();
    /// assert_eq!(cluster.len(), 2);
    /// assert_eq!(worker.len(), 2);
    /// ```
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<()> {
        self.histogram
            .add(&other.histogram)
            .map_err(|e| anyhow::anyhow!("Failed to merge histograms: {}", e))?;
        Ok(())
    }

    /// Drop every sample, keeping the configured range
    pub fn reset(&mut self) {
        self.histogram.reset();
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
    fn test_new_histogram() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.len(), 0);
        assert!(hist.is_empty());
        assert!(hist.percentile(50.0).is_none());
        assert!(hist.mean().is_none());
    }

    #[test]
    fn test_percentile() {
        let mut hist = LatencyHistogram::new();
        for i in 1..=100 {
            hist.record(Duration::from_millis(i));
        }

        let p50 = hist.percentile(50.0).unwrap();
        let p99 = hist.percentile(99.0).unwrap();

        assert!(p50.as_millis() >= 49 && p50.as_millis() <= 51);
        assert!(p99.as_millis() >= 98 && p99.as_millis() <= 100);
    }

    #[test]
    fn test_min_max_mean() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_millis(10));
        hist.record(Duration::from_millis(30));
        hist.record(Duration::from_millis(20));

        let min = hist.min().unwrap();
        let max = hist.max().unwrap();
        let mean = hist.mean().unwrap();

        assert!(min.as_micros() >= 9_990 && min.as_micros() <= 10_010);
        assert!(max.as_micros() >= 29_970 && max.as_micros() <= 30_030);
        assert!(mean.as_millis() >= 19 && mean.as_millis() <= 21);
        assert!(hist.stddev().is_some());
    }

    #[test]
    fn test_rpc_timeout_range() {
        // Failed calls are recorded at the rpc timeout, typically one second
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_secs(1));
        hist.record(Duration::from_secs(2));
        let max = hist.max().unwrap();
        assert!(max.as_millis() >= 1_998 && max.as_millis() <= 2_002);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::ZERO);
        hist.record(Duration::from_secs(10_000));
        assert_eq!(hist.len(), 2);
        assert!(hist.max().unwrap() <= Duration::from_secs(3_601));
    }

    #[test]
    fn test_merge() {
        let mut worker = LatencyHistogram::new();
        worker.record(Duration::from_millis(10));
        worker.record(Duration::from_millis(20));

        let mut coordinator = LatencyHistogram::new();
        coordinator.record(Duration::from_millis(30));
        coordinator.record(Duration::from_millis(40));

        worker.merge(&coordinator).unwrap();

        assert_eq!(worker.len(), 4);
        let mean = worker.mean().unwrap();
        assert!(mean.as_millis() >= 24 && mean.as_millis() <= 26);
    }

    #[test]
    fn test_reset() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_micros(100));
        hist.reset();
        assert!(hist.is_empty());
    }
}
