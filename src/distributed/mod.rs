//! Distributed rendering
//!
//! Coordinator-worker architecture over plain TCP:
//!
//! - **Coordinator**: balances shares, partitions the screen, fans compute
//!   out to every node (itself included) and composites the results
//! - **Region worker**: evaluates whatever region it is sent
//!
//! # Modules
//!
//! - `protocol`: message definitions and framing
//! - `node_service`: the worker service
//! - `remote`: coordinator-side client for one worker
//! - `coordinator`: the per-frame orchestration

pub mod coordinator;
pub mod node_service;
pub mod protocol;
pub mod remote;

pub use coordinator::{Coordinator, CoordinatorSettings, FrameReport, NodeOutcome, NodeReport};
pub use node_service::RegionWorkerService;
pub use protocol::{
    ComputeRegionRequest, ComputeRegionResponse, ErrorMessage, Message, PROTOCOL_VERSION,
};
pub use remote::RemoteNode;

use std::time::Duration;

/// Pixels and thread timings returned by one node for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionOutput {
    pub node_index: usize,
    pub pixels: Vec<u8>,
    pub thread_times: Vec<Duration>,
}
