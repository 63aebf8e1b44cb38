//! Adaptive balancer
//!
//! A bounded hill-climbing controller. Once per frame it finds the fastest
//! and the slowest node of the previous frame and moves `step` percentage
//! points from the slowest to the fastest. Only the last frame's samples are
//! used; there is no smoothing across frames.
//!
//! Ties resolve to the first node in scan order. Nodes whose latency is
//! `None` are skipped entirely.

use super::{NodeLatency, WorkloadShare};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tunable knobs of the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancePolicy {
    /// Percentage points moved per frame
    #[serde(default = "default_step")]
    pub step: u8,

    /// Minimum relative gap `(slowest - fastest) / slowest` before acting
    #[serde(default)]
    pub deadband: f64,
}

fn default_step() -> u8 {
    1
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            step: default_step(),
            deadband: 0.0,
        }
    }
}

/// A share movement applied by one rebalance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub from: usize,
    pub to: usize,
    pub amount: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveBalancer {
    policy: BalancePolicy,
}

impl AdaptiveBalancer {
    pub fn new(policy: BalancePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BalancePolicy {
        &self.policy
    }

    /// Nudge `shares` toward equal completion time
    ///
    /// Returns the shift applied, or `None` when the shares were left alone.
    pub fn rebalance(&self, shares: &mut WorkloadShare, latencies: &NodeLatency) -> Option<Shift> {
        if shares.len() != latencies.len() {
            warn!(
                shares = shares.len(),
                latencies = latencies.len(),
                "share and latency vectors disagree, skipping rebalance"
            );
            return None;
        }

        let (fastest, slowest) = fastest_and_slowest(latencies)?;
        if fastest == slowest {
            return None;
        }

        if self.policy.deadband > 0.0 {
            let fast = latencies.get(fastest)?.as_secs_f64();
            let slow = latencies.get(slowest)?.as_secs_f64();
            if slow <= 0.0 || (slow - fast) / slow < self.policy.deadband {
                return None;
            }
        }

        let moved = shares.transfer(slowest, fastest, self.policy.step);
        if moved == 0 {
            return None;
        }

        debug!(from = slowest, to = fastest, amount = moved, "rebalanced workload");
        Some(Shift {
            from: slowest,
            to: fastest,
            amount: moved,
        })
    }
}

/// Indices of the minimum and maximum latency, first-seen on ties
pub fn fastest_and_slowest(latencies: &NodeLatency) -> Option<(usize, usize)> {
    let mut fastest: Option<(usize, std::time::Duration)> = None;
    let mut slowest: Option<(usize, std::time::Duration)> = None;

    for (index, sample) in latencies.samples().iter().enumerate() {
        let Some(latency) = *sample else { continue };

        if fastest.map_or(true, |(_, best)| latency < best) {
            fastest = Some((index, latency));
        }
        if slowest.map_or(true, |(_, worst)| latency > worst) {
            slowest = Some((index, latency));
        }
    }

    Some((fastest?.0, slowest?.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::time::Duration;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    fn shares(v: &[u8]) -> WorkloadShare {
        WorkloadShare::from_vec(v.to_vec()).unwrap()
    }

    #[test]
    fn test_worker_faster_than_coordinator() {
        let balancer = AdaptiveBalancer::default();
        let mut s = shares(&[50, 50]);
        let latency = NodeLatency::from_samples(vec![ms(10), ms(30)]);

        let shift = balancer.rebalance(&mut s, &latency);
        assert_eq!(shift, Some(Shift { from: 1, to: 0, amount: 1 }));
        assert_eq!(s.as_slice(), &[51, 49]);
    }

    #[test]
    fn test_single_node_is_noop() {
        let balancer = AdaptiveBalancer::default();
        let mut s = shares(&[100]);
        let latency = NodeLatency::from_samples(vec![ms(42)]);
        assert_eq!(balancer.rebalance(&mut s, &latency), None);
        assert_eq!(s.as_slice(), &[100]);
    }

    #[test]
    fn test_seeded_latencies_leave_initial_split() {
        let balancer = AdaptiveBalancer::default();
        let mut s = WorkloadShare::initial(2);
        let latency = NodeLatency::seeded(3, Duration::from_secs(1));
        assert_eq!(balancer.rebalance(&mut s, &latency), None);
        assert_eq!(s, WorkloadShare::initial(2));
    }

    #[test]
    fn test_ties_resolve_to_first_seen() {
        let latency = NodeLatency::from_samples(vec![ms(20), ms(10), ms(10), ms(40), ms(40)]);
        assert_eq!(fastest_and_slowest(&latency), Some((1, 3)));
    }

    #[test]
    fn test_excluded_nodes_are_skipped() {
        let latency = NodeLatency::from_samples(vec![None, ms(30), None, ms(10)]);
        assert_eq!(fastest_and_slowest(&latency), Some((3, 1)));
        assert_eq!(fastest_and_slowest(&NodeLatency::from_samples(vec![None, None])), None);
    }

    #[test]
    fn test_clamps_respected() {
        let balancer = AdaptiveBalancer::default();

        // slowest already at 0
        let mut s = shares(&[100, 0]);
        let latency = NodeLatency::from_samples(vec![ms(5), ms(50)]);
        assert_eq!(balancer.rebalance(&mut s, &latency), None);
        assert_eq!(s.as_slice(), &[100, 0]);
    }

    #[test]
    fn test_length_mismatch_is_noop() {
        let balancer = AdaptiveBalancer::default();
        let mut s = shares(&[50, 50]);
        let latency = NodeLatency::from_samples(vec![ms(5), ms(50), ms(7)]);
        assert_eq!(balancer.rebalance(&mut s, &latency), None);
    }

    #[test]
    fn test_deadband_suppresses_small_gaps() {
        let balancer = AdaptiveBalancer::new(BalancePolicy { step: 1, deadband: 0.2 });
        let mut s = shares(&[50, 50]);

        // 10% gap: ignored
        let latency = NodeLatency::from_samples(vec![ms(90), ms(100)]);
        assert_eq!(balancer.rebalance(&mut s, &latency), None);

        // 50% gap: acted on
        let latency = NodeLatency::from_samples(vec![ms(50), ms(100)]);
        assert!(balancer.rebalance(&mut s, &latency).is_some());
        assert_eq!(s.as_slice(), &[51, 49]);
    }

    #[test]
    fn test_larger_step_is_clamped() {
        let balancer = AdaptiveBalancer::new(BalancePolicy { step: 5, deadband: 0.0 });
        let mut s = shares(&[97, 3]);
        let latency = NodeLatency::from_samples(vec![ms(1), ms(9)]);
        let shift = balancer.rebalance(&mut s, &latency).unwrap();
        assert_eq!(shift.amount, 3);
        assert_eq!(s.as_slice(), &[100, 0]);
    }

    #[test]
    fn test_convergence_gap_grows_monotonically() {
        let balancer = AdaptiveBalancer::default();
        let mut s = shares(&[50, 50]);
        let latency = NodeLatency::from_samples(vec![ms(10), ms(20)]);

        let mut previous_gap = 0i32;
        for _ in 0..50 {
            balancer.rebalance(&mut s, &latency);
            let gap = s.as_slice()[0] as i32 - s.as_slice()[1] as i32;
            assert!(gap > previous_gap);
            previous_gap = gap;
        }
        assert_eq!(s.as_slice(), &[100, 0]);

        // Clamp reached: nothing moves any more
        assert_eq!(balancer.rebalance(&mut s, &latency), None);
    }

    #[test]
    fn test_random_latencies_preserve_invariants() {
        let mut rng = rand::thread_rng();
        let balancer = AdaptiveBalancer::new(BalancePolicy { step: 3, deadband: 0.0 });

        for _ in 0..50 {
            let nodes = rng.gen_range(1..=8);
            let mut s = WorkloadShare::initial(nodes - 1);
            for _ in 0..200 {
                let samples = (0..nodes)
                    .map(|_| {
                        if rng.gen_bool(0.1) {
                            None
                        } else {
                            Some(Duration::from_micros(rng.gen_range(1..10_000)))
                        }
                    })
                    .collect();
                balancer.rebalance(&mut s, &NodeLatency::from_samples(samples));
                assert_eq!(s.total(), 100);
                assert!(s.as_slice().iter().all(|v| *v <= 100));
            }
        }
    }
}
