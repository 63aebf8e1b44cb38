//! mandelfarm - distributed, self-balancing escape-time fractal renderer
//!
//! A coordinator splits the screen into vertical strips, one per node, and
//! renders its own strip while region workers on other machines render
//! theirs. After every frame it shifts screen share from the slowest node to
//! the fastest, so the split converges towards equal completion times.
//!
//! # Architecture
//!
//! - **Render core**: color oracle, parallel fragment evaluator, frame buffer
//! - **Balancing**: workload shares, strip partitioning, adaptive balancer
//! - **Distributed mode**: length-prefixed MessagePack RPC over TCP
//! - **Stats**: per-node latency histograms and frame timings for reports

pub mod balance;
pub mod config;
pub mod distributed;
pub mod error;
pub mod output;
pub mod render;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Coordinator, RegionWorkerService};
pub use error::ClusterError;
pub use render::{FragmentEvaluator, MandelbrotOracle, RenderParams};

/// Result type used throughout mandelfarm
pub type Result<T> = anyhow::Result<T>;
