//! Session statistics
//!
//! Accumulates what the coordinator observed over a whole run: frame times,
//! per-node round-trip latency, success and failure counts, and the
//! per-thread timings of the most recent frame.
//!
//! Nothing in here feeds back into balancing.
//!
//! # Example
//!
//! ```
//! use mandelfarm::stats::SessionStats;
//! use std::time::Duration;
//!
//! let mut stats = SessionStats::new(2);
//! stats.record_success(0, Duration::from_millis(10));
//! stats.record_failure(1, "timed out");
//! stats.record_frame(Duration::from_millis(35));
//!
//! assert_eq!(stats.frames(), 1);
//! assert_eq!(stats.node(1).unwrap().failures, 1);
//! ```

pub mod histogram;

use crate::Result;
use histogram::LatencyHistogram;
use std::time::Duration;

/// Everything observed about one node
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Round-trip (or local compute) time of successful frames
    pub latency: LatencyHistogram,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

impl NodeStats {
    /// Fraction of attempted frames that failed
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.successes + self.failures;
        if attempts == 0 {
            0.0
        } else {
            self.failures as f64 / attempts as f64
        }
    }
}

/// Accumulated statistics of one coordinator session
#[derive(Debug, Clone)]
pub struct SessionStats {
    nodes: Vec<NodeStats>,
    frame_times: LatencyHistogram,
    total_frame_time: Duration,
    frames: u64,
    last_thread_timings: Vec<Vec<Duration>>,
}

impl SessionStats {
    pub fn new(node_count: usize) -> Self {
        Self {
            nodes: vec![NodeStats::default(); node_count],
            frame_times: LatencyHistogram::new(),
            total_frame_time: Duration::ZERO,
            frames: 0,
            last_thread_timings: vec![Vec::new(); node_count],
        }
    }

    pub fn record_success(&mut self, node: usize, latency: Duration) {
        if let Some(stats) = self.nodes.get_mut(node) {
            stats.latency.record(latency);
            stats.successes += 1;
        }
    }

    pub fn record_failure(&mut self, node: usize, error: impl Into<String>) {
        if let Some(stats) = self.nodes.get_mut(node) {
            stats.failures += 1;
            stats.last_error = Some(error.into());
        }
    }

    pub fn record_frame(&mut self, elapsed: Duration) {
        self.frame_times.record(elapsed);
        self.total_frame_time += elapsed;
        self.frames += 1;
    }

    /// Replace one node's per-thread timings with the latest frame's
    pub fn set_thread_timings(&mut self, node: usize, timings: Vec<Duration>) {
        if let Some(slot) = self.last_thread_timings.get_mut(node) {
            *slot = timings;
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn total_frame_time(&self) -> Duration {
        self.total_frame_time
    }

    pub fn frame_times(&self) -> &LatencyHistogram {
        &self.frame_times
    }

    pub fn node(&self, index: usize) -> Option<&NodeStats> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[NodeStats] {
        &self.nodes
    }

    pub fn last_thread_timings(&self) -> &[Vec<Duration>] {
        &self.last_thread_timings
    }

    pub fn total_failures(&self) -> u64 {
        self.nodes.iter().map(|n| n.failures).sum()
    }

    /// Latency distribution across every node
    pub fn cluster_latency(&self) -> Result<LatencyHistogram> {
        let mut merged = LatencyHistogram::new();
        for node in &self.nodes {
            merged.merge(&node.latency)?;
        }
        Ok(merged)
    }
}
