//! Error taxonomy
//!
//! Failures are split by who can recover from them:
//!
//! - **ComputeFailure**: the color oracle or a worker's evaluation failed
//! - **NetworkFailure**: connect, timeout or transport error on a remote call
//! - **Configuration**: rejected at startup, before any frame is rendered
//!
//! Compute and network failures are folded into the frame by the coordinator
//! (the node's strip stays stale); configuration errors abort the process.

use thiserror::Error;

/// Errors surfaced by the render cluster
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Evaluation failed inside a node
    #[error("compute failure on node {node_index}: {reason}")]
    ComputeFailure { node_index: i32, reason: String },

    /// A remote call could not be completed
    #[error("network failure on node {node_index} ({address}): {reason}")]
    NetworkFailure {
        node_index: i32,
        address: String,
        reason: String,
    },

    /// Startup configuration is unusable
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClusterError {
    pub fn compute(node_index: i32, reason: impl Into<String>) -> Self {
        Self::ComputeFailure {
            node_index,
            reason: reason.into(),
        }
    }

    pub fn network(node_index: i32, address: &str, reason: impl Into<String>) -> Self {
        Self::NetworkFailure {
            node_index,
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Only configuration errors terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Failure reported by a color oracle for a single pixel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("oracle failed at pixel ({x}, {y}): {reason}")]
pub struct OracleError {
    pub x: i32,
    pub y: i32,
    pub reason: String,
}

/// Failure evaluating a whole region on one node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    /// The first failing pixel aborts the region
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Caller-supplied output slot does not match the region size
    #[error("output buffer holds {actual} bytes, region needs {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// A fragment thread panicked before finishing
    #[error("fragment thread panicked")]
    Panicked,
}
