//! Frame coordinator
//!
//! Owns every piece of cross-frame state (shares, latencies, regions, the
//! pixel buffer, node health) and drives one frame at a time:
//!
//! 1. rebalance shares from the previous frame's latencies
//! 2. partition the screen and prove the regions tile it
//! 3. fan out one compute call per remote worker, each under its own timeout
//! 4. evaluate the coordinator's own region on the blocking pool meanwhile
//! 5. wait for every branch (the frame barrier)
//! 6. composite the strips that came back
//!
//! A failed node never fails the frame. Its columns keep whatever the buffer
//! held before, its latency is charged just above both the rpc timeout and the
//! slowest node that did answer, and after enough consecutive failures it is
//! quarantined: its share is handed to the coordinator and it is only probed
//! every few frames until it answers again.

use super::protocol::ComputeRegionRequest;
use super::remote::RemoteNode;
use super::RegionOutput;
use crate::balance::{
    partition, verify_tiling, AdaptiveBalancer, BalancePolicy, NodeLatency, Region, Shift, TilingError,
    WorkloadShare,
};
use crate::error::ClusterError;
use crate::render::{FragmentEvaluator, FrameSource, PixelBuffer, RenderParams, Strip};
use crate::stats::SessionStats;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Label used for the coordinator's own slot in reports
pub const LOCAL_NODE_LABEL: &str = "local";

/// Everything the coordinator needs to know at startup
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Worker addresses (`host:port`), in node order
    pub workers: Vec<String>,
    pub screen_width: i32,
    pub screen_height: i32,
    /// Bound on each remote call, connect included
    pub rpc_timeout: Duration,
    pub policy: BalancePolicy,
    /// Explicit starting split (one entry per node, coordinator last)
    pub initial_shares: Option<Vec<u8>>,
    /// Consecutive failures before a worker is quarantined
    pub quarantine_after: u32,
    /// Frames between probes of a quarantined worker
    pub probe_interval: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            screen_width: 1280,
            screen_height: 720,
            rpc_timeout: Duration::from_millis(1000),
            policy: BalancePolicy::default(),
            initial_shares: None,
            quarantine_after: 3,
            probe_interval: 10,
        }
    }
}

/// What happened to one node during a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Pixels arrived and were composited
    Completed { latency: Duration },
    /// The node's strip was left stale
    Failed { error: ClusterError },
    /// Quarantined and not probed this frame
    Quarantined,
}

#[derive(Debug, Clone)]
pub struct NodeReport {
    pub index: usize,
    pub address: String,
    pub region: Region,
    pub outcome: NodeOutcome,
    /// Per-thread wall time on that node (empty unless completed)
    pub thread_times: Vec<Duration>,
}

/// Summary of one rendered frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Zero-based frame number
    pub frame: u64,
    pub elapsed: Duration,
    pub params: RenderParams,
    /// Balancer move applied before partitioning
    pub shift: Option<Shift>,
    /// Shares the frame was partitioned with
    pub shares: Vec<u8>,
    pub nodes: Vec<NodeReport>,
}

impl FrameReport {
    pub fn failures(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Failed { .. }))
            .count()
    }

    pub fn regions(&self) -> Vec<Region> {
        self.nodes.iter().map(|n| n.region).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeHealth {
    consecutive_failures: u32,
    quarantined: bool,
    frames_until_probe: u32,
}

impl NodeHealth {
    /// Whether to send this node work this frame; advances the probe countdown
    fn take_dispatch(&mut self, probe_interval: u32) -> bool {
        if !self.quarantined {
            return true;
        }
        if self.frames_until_probe <= 1 {
            self.frames_until_probe = probe_interval;
            true
        } else {
            self.frames_until_probe -= 1;
            false
        }
    }
}

/// Result of one fan-out branch
type Branch = (Duration, Result<RegionOutput, ClusterError>);

pub struct Coordinator {
    settings: CoordinatorSettings,
    evaluator: FragmentEvaluator,
    remotes: Vec<Arc<Mutex<RemoteNode>>>,
    addresses: Vec<String>,
    balancer: AdaptiveBalancer,
    shares: WorkloadShare,
    latency: NodeLatency,
    regions: Vec<Region>,
    buffer: PixelBuffer,
    /// Reused output buffer for the coordinator's own region
    local_scratch: Vec<u8>,
    params: RenderParams,
    dirty: bool,
    health: Vec<NodeHealth>,
    stats: SessionStats,
    frames: u64,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        evaluator: FragmentEvaluator,
        params: RenderParams,
    ) -> Result<Self, ClusterError> {
        if settings.screen_width <= 0 || settings.screen_height <= 0 {
            return Err(ClusterError::configuration(format!(
                "screen must be at least 1x1, got {}x{}",
                settings.screen_width, settings.screen_height
            )));
        }

        let worker_count = settings.workers.len();
        let node_count = worker_count + 1;

        let shares = match &settings.initial_shares {
            Some(explicit) => {
                if explicit.len() != node_count {
                    return Err(ClusterError::configuration(format!(
                        "{} initial shares given for {} nodes",
                        explicit.len(),
                        node_count
                    )));
                }
                WorkloadShare::from_vec(explicit.clone())?
            }
            None => WorkloadShare::initial(worker_count),
        };

        let remotes = settings
            .workers
            .iter()
            .enumerate()
            .map(|(index, address)| Arc::new(Mutex::new(RemoteNode::new(index, address.clone()))))
            .collect();

        let mut addresses = settings.workers.clone();
        addresses.push(LOCAL_NODE_LABEL.to_string());

        let regions = partition(&shares, settings.screen_width, settings.screen_height);
        let buffer = PixelBuffer::new(settings.screen_width as usize, settings.screen_height as usize);

        Ok(Self {
            latency: NodeLatency::seeded(node_count, settings.rpc_timeout),
            balancer: AdaptiveBalancer::new(settings.policy),
            health: vec![NodeHealth::default(); worker_count],
            stats: SessionStats::new(node_count),
            settings,
            evaluator,
            remotes,
            addresses,
            shares,
            regions,
            buffer,
            local_scratch: Vec::new(),
            params,
            dirty: true,
            frames: 0,
        })
    }

    /// Try to connect to every worker up front
    ///
    /// Failures are only logged; the node is retried on its next frame.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for remote in &self.remotes {
            let mut node = remote.lock().await;
            match node.connect(self.settings.rpc_timeout).await {
                Ok(()) => {
                    info!(node = node.index(), address = node.address(), "connected to region worker");
                    connected += 1;
                }
                Err(e) => warn!("{}", e),
            }
        }
        connected
    }

    /// Adopt new parameters; marks the scene dirty when they differ
    pub fn set_params(&mut self, params: RenderParams) {
        if params != self.params {
            self.params = params;
            self.dirty = true;
        }
    }

    /// Render one frame with `params`
    ///
    /// Returns `None` without doing any work when the parameters are the same
    /// as the last frame's and nobody marked the scene dirty.
    pub async fn run_frame(&mut self, params: RenderParams) -> Option<FrameReport> {
        self.set_params(params);
        if !self.dirty {
            return None;
        }

        let started = Instant::now();

        let shift = match self.plan_frame() {
            Ok(shift) => shift,
            Err(e) => {
                error!("regions do not tile the screen, keeping previous frame: {}", e);
                return None;
            }
        };
        let shares_used = self.shares.as_slice().to_vec();

        let params = self.params;
        let timeout = self.settings.rpc_timeout;
        let probe_interval = self.settings.probe_interval;
        let coordinator = self.remotes.len();

        // Fan out to remote workers
        let mut tasks = JoinSet::new();
        let mut dispatched = vec![false; self.remotes.len()];
        for (index, remote) in self.remotes.iter().enumerate() {
            if !self.health[index].take_dispatch(probe_interval) {
                continue;
            }
            dispatched[index] = true;

            let remote = Arc::clone(remote);
            let request = ComputeRegionRequest::new(&params, index as i32, self.regions[index]);
            tasks.spawn(async move {
                let mut node = remote.lock().await;
                let start = Instant::now();
                let result = node.compute(&request, timeout).await;
                (index, start.elapsed(), result)
            });
        }

        // Our own region, concurrently with the remote calls
        let local_region = self.regions[coordinator];
        let evaluator = self.evaluator.clone();
        let mut scratch = std::mem::take(&mut self.local_scratch);
        scratch.resize(local_region.pixel_bytes(), 0);
        let local = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = evaluator.evaluate_into(&local_region, &params, &mut scratch);
            (scratch, start.elapsed(), result)
        });

        // Barrier: every branch finishes (or times out) before compositing
        let mut remote_results: Vec<Option<Branch>> = (0..coordinator).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, elapsed, result)) => remote_results[index] = Some((elapsed, result)),
                Err(e) => error!("remote call task failed: {}", e),
            }
        }

        let (scratch, local_result) = match local.await {
            Ok((scratch, elapsed, Ok(thread_times))) => (scratch, (elapsed, Ok(thread_times))),
            Ok((scratch, elapsed, Err(e))) => (
                scratch,
                (elapsed, Err(ClusterError::compute(coordinator as i32, e.to_string()))),
            ),
            Err(e) => (
                Vec::new(),
                (
                    Duration::ZERO,
                    Err(ClusterError::compute(coordinator as i32, format!("local task failed: {}", e))),
                ),
            ),
        };

        // Composite whatever came back
        let mut strips = Vec::with_capacity(coordinator + 1);
        for (index, slot) in remote_results.iter().enumerate() {
            if let Some((_, Ok(output))) = slot {
                if let Some(strip) = Strip::new(self.regions[index], &output.pixels) {
                    strips.push(strip);
                }
            }
        }
        if local_result.1.is_ok() {
            if let Some(strip) = Strip::new(local_region, &scratch) {
                strips.push(strip);
            }
        }
        self.buffer.composite(&strips);
        drop(strips);

        // Fold outcomes into latency, health and stats
        let mut outcomes = Vec::with_capacity(coordinator + 1);
        for (index, slot) in remote_results.into_iter().enumerate() {
            let (outcome, thread_times) = match slot {
                Some((elapsed, Ok(output))) => (NodeOutcome::Completed { latency: elapsed }, output.thread_times),
                Some((_, Err(error))) => (NodeOutcome::Failed { error }, Vec::new()),
                None if dispatched[index] => (
                    NodeOutcome::Failed {
                        error: ClusterError::compute(index as i32, "remote call task did not finish"),
                    },
                    Vec::new(),
                ),
                None => (NodeOutcome::Quarantined, Vec::new()),
            };
            outcomes.push((outcome, thread_times));
        }

        outcomes.push(match local_result {
            (elapsed, Ok(thread_times)) => (NodeOutcome::Completed { latency: elapsed }, thread_times),
            (_, Err(error)) => (NodeOutcome::Failed { error }, Vec::new()),
        });

        let failed_latency = failure_latency(timeout, &outcomes);
        let mut nodes = Vec::with_capacity(outcomes.len());
        for (index, (outcome, thread_times)) in outcomes.into_iter().enumerate() {
            self.record_outcome(index, &outcome, &thread_times, failed_latency);
            nodes.push(self.node_report(index, outcome, thread_times));
        }

        self.local_scratch = scratch;

        let elapsed = started.elapsed();
        self.stats.record_frame(elapsed);
        let report = FrameReport {
            frame: self.frames,
            elapsed,
            params,
            shift,
            shares: shares_used,
            nodes,
        };

        debug!(
            frame = report.frame,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            failures = report.failures(),
            "frame complete"
        );

        self.frames += 1;
        self.dirty = false;
        Some(report)
    }

    /// Steps 1 and 2: rebalance, apply quarantine, partition and verify
    fn plan_frame(&mut self) -> Result<Option<Shift>, TilingError> {
        for (index, health) in self.health.iter().enumerate() {
            if health.quarantined {
                self.latency.exclude(index);
            }
        }

        let shift = self.balancer.rebalance(&mut self.shares, &self.latency);

        let coordinator = self.shares.coordinator_index();
        for (index, health) in self.health.iter().enumerate() {
            if health.quarantined {
                self.shares.transfer(index, coordinator, 100);
            }
        }

        let regions = partition(&self.shares, self.settings.screen_width, self.settings.screen_height);
        verify_tiling(&regions, self.settings.screen_width, self.settings.screen_height)?;
        self.regions = regions;

        Ok(shift)
    }

    fn record_outcome(
        &mut self,
        index: usize,
        outcome: &NodeOutcome,
        thread_times: &[Duration],
        failure_latency: Duration,
    ) {
        match outcome {
            NodeOutcome::Completed { latency } => {
                self.latency.set(index, *latency);
                self.stats.record_success(index, *latency);
                self.stats.set_thread_timings(index, thread_times.to_vec());

                if let Some(health) = self.health.get_mut(index) {
                    if health.quarantined {
                        info!(node = index, "region worker answered probe, leaving quarantine");
                    }
                    *health = NodeHealth::default();
                }
            }
            NodeOutcome::Failed { error } => {
                warn!("{}", error);
                self.latency.set(index, failure_latency);
                self.stats.record_failure(index, error.to_string());

                if let Some(health) = self.health.get_mut(index) {
                    health.consecutive_failures += 1;
                    if !health.quarantined && health.consecutive_failures >= self.settings.quarantine_after {
                        health.quarantined = true;
                        health.frames_until_probe = self.settings.probe_interval;
                        warn!(
                            node = index,
                            failures = health.consecutive_failures,
                            "quarantining region worker, its share moves to the coordinator"
                        );
                    }
                    if health.quarantined {
                        self.latency.exclude(index);
                    }
                }
            }
            NodeOutcome::Quarantined => self.latency.exclude(index),
        }
    }

    fn node_report(&self, index: usize, outcome: NodeOutcome, thread_times: Vec<Duration>) -> NodeReport {
        NodeReport {
            index,
            address: self.addresses[index].clone(),
            region: self.regions[index],
            outcome,
            thread_times,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn worker_count(&self) -> usize {
        self.remotes.len()
    }

    /// Worker addresses followed by the local label
    pub fn node_addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn shares(&self) -> &WorkloadShare {
        &self.shares
    }

    pub fn latency(&self) -> &NodeLatency {
        &self.latency
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn params(&self) -> RenderParams {
        self.params
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_quarantined(&self, index: usize) -> bool {
        self.health.get(index).map_or(false, |h| h.quarantined)
    }
}

impl FrameSource for Coordinator {
    fn pixel_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Latency charged to a failed node: strictly slower than the rpc timeout
/// and than every node that completed this frame
fn failure_latency(rpc_timeout: Duration, outcomes: &[(NodeOutcome, Vec<Duration>)]) -> Duration {
    let slowest_completed = outcomes
        .iter()
        .filter_map(|(outcome, _)| match outcome {
            NodeOutcome::Completed { latency } => Some(*latency),
            _ => None,
        })
        .max()
        .unwrap_or(Duration::ZERO);

    rpc_timeout.max(slowest_completed) + Duration::from_nanos(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::RegionWorkerService;
    use crate::render::{ColorOracle, MandelbrotOracle};
    use tokio::net::TcpListener;

    fn evaluator(concurrency: usize) -> FragmentEvaluator {
        FragmentEvaluator::new(Arc::new(MandelbrotOracle), concurrency)
    }

    fn settings(workers: Vec<String>, width: i32, height: i32) -> CoordinatorSettings {
        CoordinatorSettings {
            workers,
            screen_width: width,
            screen_height: height,
            rpc_timeout: Duration::from_secs(2),
            ..CoordinatorSettings::default()
        }
    }

    async fn spawn_worker() -> String {
        let service = RegionWorkerService::new(0, evaluator(2));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(service.serve(listener));
        addr
    }

    /// Accepts connections and never answers
    async fn spawn_stalled_worker() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    async fn refused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    fn assert_columns_match_oracle(buffer: &PixelBuffer, params: &RenderParams, columns: std::ops::Range<usize>) {
        for x in columns {
            for y in 0..buffer.height() {
                let expected = MandelbrotOracle.color_at(x as i32, y as i32, params).unwrap();
                assert_eq!(buffer.pixel(x, y), Some(expected), "pixel ({}, {})", x, y);
            }
        }
    }

    #[tokio::test]
    async fn test_standalone_frame_fills_buffer() {
        let params = RenderParams::default();
        let mut coordinator = Coordinator::new(settings(vec![], 64, 48), evaluator(3), params).unwrap();

        let report = coordinator.run_frame(params).await.unwrap();
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.shares, vec![100]);
        assert!(matches!(report.nodes[0].outcome, NodeOutcome::Completed { .. }));
        assert_eq!(report.nodes[0].thread_times.len(), 3);

        assert_columns_match_oracle(coordinator.pixel_buffer(), &params, 0..64);
    }

    #[tokio::test]
    async fn test_clean_scene_is_noop() {
        let params = RenderParams::default();
        let mut coordinator = Coordinator::new(settings(vec![], 16, 16), evaluator(1), params).unwrap();

        assert!(coordinator.is_dirty());
        assert!(coordinator.run_frame(params).await.is_some());
        assert!(!coordinator.is_dirty());
        assert!(coordinator.run_frame(params).await.is_none());
        assert_eq!(coordinator.frames(), 1);

        coordinator.mark_dirty();
        assert!(coordinator.run_frame(params).await.is_some());

        let moved = RenderParams {
            pan_x: params.pan_x + 0.01,
            ..params
        };
        assert!(coordinator.run_frame(moved).await.is_some());
        assert_eq!(coordinator.frames(), 3);
    }

    #[tokio::test]
    async fn test_scene_commands_drive_dirty_flag() {
        use crate::render::{Scene, SceneCommand};

        let mut scene = Scene::new(RenderParams::default());
        let mut coordinator = Coordinator::new(settings(vec![], 16, 8), evaluator(1), scene.params()).unwrap();
        assert!(coordinator.run_frame(scene.params()).await.is_some());

        let params = scene.apply(SceneCommand::ZoomIn, &mut coordinator);
        assert!(coordinator.is_dirty());
        let report = coordinator.run_frame(params).await.unwrap();
        assert_eq!(report.params, params);
        assert!(coordinator.run_frame(params).await.is_none());

        while scene.zoom_level() > 0.0 {
            scene.zoom_out();
        }
        let floor = scene.params();
        assert!(coordinator.run_frame(floor).await.is_some());

        // Zooming out at level zero changes nothing, so no frame is rendered
        let params = scene.apply(SceneCommand::ZoomOut, &mut coordinator);
        assert!(!coordinator.is_dirty());
        assert!(coordinator.run_frame(params).await.is_none());
        assert_eq!(coordinator.frames(), 3);
    }

    #[test]
    fn test_first_rebalance_moves_share_to_faster_worker() {
        let mut s = settings(vec!["127.0.0.1:9".to_string()], 100, 10);
        s.initial_shares = Some(vec![50, 50]);
        let mut coordinator = Coordinator::new(s, evaluator(1), RenderParams::default()).unwrap();

        coordinator.latency = NodeLatency::from_samples(vec![
            Some(Duration::from_millis(10)),
            Some(Duration::from_millis(30)),
        ]);
        let shift = coordinator.plan_frame().unwrap();

        assert_eq!(shift, Some(Shift { from: 1, to: 0, amount: 1 }));
        assert_eq!(coordinator.shares().as_slice(), &[51, 49]);
        let regions = coordinator.regions();
        assert_eq!((regions[0].x_start, regions[0].x_end), (0, 50));
        assert_eq!((regions[1].x_start, regions[1].x_end), (51, 99));
    }

    #[tokio::test]
    async fn test_first_frame_keeps_initial_split() {
        let params = RenderParams::default();
        let mut coordinator = Coordinator::new(settings(vec![], 30, 10), evaluator(1), params).unwrap();
        let report = coordinator.run_frame(params).await.unwrap();
        assert_eq!(report.shift, None);
    }

    #[tokio::test]
    async fn test_one_worker_end_to_end() {
        let addr = spawn_worker().await;
        let params = RenderParams::default();
        let mut coordinator = Coordinator::new(settings(vec![addr], 80, 40), evaluator(2), params).unwrap();
        assert_eq!(coordinator.connect_all().await, 1);

        let report = coordinator.run_frame(params).await.unwrap();
        assert_eq!(report.failures(), 0);
        assert_eq!(report.shares, vec![50, 50]);
        assert_eq!(report.nodes[0].thread_times.len(), 2);
        assert!(verify_tiling(&report.regions(), 80, 40).is_ok());

        assert_columns_match_oracle(coordinator.pixel_buffer(), &params, 0..80);
        assert_eq!(coordinator.stats().node(0).unwrap().successes, 1);
    }

    #[tokio::test]
    async fn test_stalled_worker_does_not_block_frame() {
        let live = spawn_worker().await;
        let stalled = spawn_stalled_worker().await;
        let params = RenderParams::default();

        let mut s = settings(vec![live, stalled], 60, 30);
        s.rpc_timeout = Duration::from_millis(300);
        let mut coordinator = Coordinator::new(s, evaluator(2), params).unwrap();

        let started = Instant::now();
        let report = coordinator.run_frame(params).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(matches!(report.nodes[0].outcome, NodeOutcome::Completed { .. }));
        match &report.nodes[1].outcome {
            NodeOutcome::Failed { error } => {
                assert!(matches!(error, ClusterError::NetworkFailure { node_index: 1, .. }))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(report.nodes[2].outcome, NodeOutcome::Completed { .. }));
        let charged = coordinator.latency().get(1).unwrap();
        assert!(charged > Duration::from_millis(300));
        assert!(charged > coordinator.latency().get(0).unwrap());
        assert!(charged > coordinator.latency().get(2).unwrap());

        // Healthy strips are in place; the stalled strip keeps its old content
        let regions = report.regions();
        let buffer = coordinator.pixel_buffer();
        assert_columns_match_oracle(buffer, &params, 0..regions[0].width as usize);
        assert_columns_match_oracle(buffer, &params, regions[2].x_start as usize..60);
        assert_eq!(buffer.as_bytes().len(), 60 * 30 * 3);

        // Next frame the slow node gives up one point
        coordinator.mark_dirty();
        let report = coordinator.run_frame(params).await.unwrap();
        assert_eq!(report.shift.map(|s| s.from), Some(1));
        assert_eq!(report.shares.iter().map(|s| *s as u32).sum::<u32>(), 100);
    }

    /// Spends a fixed time on every pixel
    struct SlowOracle {
        per_pixel: Duration,
    }

    impl ColorOracle for SlowOracle {
        fn color_at(
            &self,
            x: i32,
            y: i32,
            params: &RenderParams,
        ) -> std::result::Result<crate::render::Rgb, crate::error::OracleError> {
            std::thread::sleep(self.per_pixel);
            MandelbrotOracle.color_at(x, y, params)
        }
    }

    #[tokio::test]
    async fn test_failed_worker_loses_share_when_local_is_slower_than_timeout() {
        let addr = refused_address().await;
        let params = RenderParams::default();

        // Local strip: 10 columns x 10 rows at 1ms each on one thread, far above the timeout
        let mut s = settings(vec![addr], 20, 10);
        s.rpc_timeout = Duration::from_millis(20);
        let slow = FragmentEvaluator::new(
            Arc::new(SlowOracle {
                per_pixel: Duration::from_millis(1),
            }),
            1,
        );
        let mut coordinator = Coordinator::new(s, slow, params).unwrap();

        coordinator.mark_dirty();
        let first = coordinator.run_frame(params).await.unwrap();
        assert!(matches!(first.nodes[0].outcome, NodeOutcome::Failed { .. }));
        let local = match first.nodes[1].outcome {
            NodeOutcome::Completed { latency } => latency,
            ref other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(local > Duration::from_millis(20));
        assert!(coordinator.latency().get(0).unwrap() > local);

        coordinator.mark_dirty();
        let second = coordinator.run_frame(params).await.unwrap();
        assert_eq!(second.shift, Some(Shift { from: 0, to: 1, amount: 1 }));
        assert_eq!(second.shares, vec![49, 51]);
        assert!(!coordinator.is_quarantined(0));
    }

    #[test]
    fn test_failure_latency_ranks_slowest() {
        let timeout = Duration::from_millis(50);
        let outcomes = vec![
            (
                NodeOutcome::Failed {
                    error: ClusterError::network(0, "127.0.0.1:1", "refused"),
                },
                Vec::new(),
            ),
            (
                NodeOutcome::Completed {
                    latency: Duration::from_millis(245),
                },
                Vec::new(),
            ),
        ];
        assert_eq!(
            failure_latency(timeout, &outcomes),
            Duration::from_millis(245) + Duration::from_nanos(1)
        );
        assert_eq!(
            failure_latency(timeout, &outcomes[..1]),
            timeout + Duration::from_nanos(1)
        );
    }

    #[tokio::test]
    async fn test_quarantine_probe_and_recovery() {
        let addr = refused_address().await;
        let params = RenderParams::default();

        let mut s = settings(vec![addr.clone()], 40, 20);
        s.rpc_timeout = Duration::from_millis(500);
        s.quarantine_after = 2;
        s.probe_interval = 3;
        let mut coordinator = Coordinator::new(s, evaluator(1), params).unwrap();

        let mut reports = Vec::new();
        for _ in 0..5 {
            coordinator.mark_dirty();
            reports.push(coordinator.run_frame(params).await.unwrap());
        }

        assert!(matches!(reports[0].nodes[0].outcome, NodeOutcome::Failed { .. }));
        assert!(matches!(reports[1].nodes[0].outcome, NodeOutcome::Failed { .. }));
        assert!(coordinator.is_quarantined(0));

        // Quarantined: share handed to the coordinator, node skipped
        assert_eq!(reports[2].shares, vec![0, 100]);
        assert_eq!(reports[2].nodes[0].outcome, NodeOutcome::Quarantined);
        assert_eq!(reports[3].nodes[0].outcome, NodeOutcome::Quarantined);

        // Probe on the third quarantined frame, still refused
        assert!(matches!(reports[4].nodes[0].outcome, NodeOutcome::Failed { .. }));
        assert!(coordinator.is_quarantined(0));
        assert_eq!(coordinator.latency().get(0), None);

        // The whole screen is still rendered locally
        assert_columns_match_oracle(coordinator.pixel_buffer(), &params, 0..40);

        // Bring the worker up on the same address; the next probe clears it
        let listener = TcpListener::bind(&addr).await.unwrap();
        tokio::spawn(RegionWorkerService::new(0, evaluator(1)).serve(listener));

        let mut recovered = None;
        for _ in 0..3 {
            coordinator.mark_dirty();
            let report = coordinator.run_frame(params).await.unwrap();
            if matches!(report.nodes[0].outcome, NodeOutcome::Completed { .. }) {
                recovered = Some(report);
            }
        }
        let recovered = recovered.expect("probe should succeed");
        assert_eq!(recovered.nodes[0].region.width, 0);
        assert!(!coordinator.is_quarantined(0));
        assert!(coordinator.latency().get(0).is_some());
    }
}
