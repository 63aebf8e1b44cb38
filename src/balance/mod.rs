//! Workload partitioning and adaptive balancing
//!
//! Node order is fixed for the whole session: remote workers first, in the
//! order they were configured, and the coordinator's own slot last. Every
//! vector in this module (shares, latencies, regions) uses that order.
//!
//! - `partition`: shares → contiguous vertical strips covering the screen
//! - `balancer`: last frame's latencies → nudged shares

pub mod balancer;
pub mod partition;

pub use balancer::{AdaptiveBalancer, BalancePolicy, Shift};
pub use partition::{partition, verify_tiling, Region, TilingError};

use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Percentage of the screen width assigned to each node
///
/// Entries are in `[0, 100]` and always sum to exactly 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadShare(Vec<u8>);

impl WorkloadShare {
    /// Near-equal starting split for `worker_count` workers plus the coordinator
    ///
    /// Workers alternate between the floor and ceiling of `100 / (n + 1)`,
    /// starting with the floor; the coordinator takes whatever remains.
    pub fn initial(worker_count: usize) -> Self {
        let portion = 100.0 / (worker_count + 1) as f64;
        let mut shares = Vec::with_capacity(worker_count + 1);
        let mut assigned: u32 = 0;

        for index in 0..worker_count {
            let rounded = if index % 2 == 0 { portion.floor() } else { portion.ceil() };
            let wanted = rounded as u32;
            let share = wanted.min(100 - assigned);
            assigned += share;
            shares.push(share as u8);
        }
        shares.push((100 - assigned) as u8);

        Self(shares)
    }

    /// Build from explicit percentages, rejecting vectors that do not sum to 100
    pub fn from_vec(shares: Vec<u8>) -> Result<Self, ClusterError> {
        if shares.is_empty() {
            return Err(ClusterError::configuration("workload shares must not be empty"));
        }
        if let Some(bad) = shares.iter().find(|s| **s > 100) {
            return Err(ClusterError::configuration(format!(
                "workload share {} is outside [0, 100]",
                bad
            )));
        }
        let total: u32 = shares.iter().map(|s| *s as u32).sum();
        if total != 100 {
            return Err(ClusterError::configuration(format!(
                "workload shares must sum to 100, got {}",
                total
            )));
        }
        Ok(Self(shares))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn total(&self) -> u32 {
        self.0.iter().map(|s| *s as u32).sum()
    }

    /// Index of the coordinator's own slot
    pub fn coordinator_index(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Move up to `amount` points from `from` to `to`, clamped so both stay in
    /// `[0, 100]`. Returns the amount actually moved.
    pub fn transfer(&mut self, from: usize, to: usize, amount: u8) -> u8 {
        if from == to || from >= self.0.len() || to >= self.0.len() {
            return 0;
        }
        let moved = amount.min(self.0[from]).min(100 - self.0[to]);
        self.0[from] -= moved;
        self.0[to] += moved;
        moved
    }
}

/// Most recent per-node latency sample
///
/// `None` marks a node excluded from balancing this frame (quarantined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLatency(Vec<Option<Duration>>);

impl NodeLatency {
    /// Every node starts from the same finite sentinel, so the first frame
    /// sees no ranking and leaves the initial split untouched.
    pub fn seeded(node_count: usize, sentinel: Duration) -> Self {
        Self(vec![Some(sentinel); node_count])
    }

    pub fn from_samples(samples: Vec<Option<Duration>>) -> Self {
        Self(samples)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Duration> {
        self.0.get(index).copied().flatten()
    }

    pub fn samples(&self) -> &[Option<Duration>] {
        &self.0
    }

    pub fn set(&mut self, index: usize, latency: Duration) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = Some(latency);
        }
    }

    pub fn exclude(&mut self, index: usize) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = None;
        }
    }
}
