//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! The TOML layout mirrors [`Config`]:
//!
//! ```toml
//! [cluster]
//! role = "coordinator"
//! workers = ["10.0.1.10", "10.0.1.11:6000"]
//! rpc_timeout_ms = 1000
//!
//! [screen]
//! width = 1280
//! height = 720
//!
//! [render]
//! magnification = 400.0
//! max_iterations = 80.0
//!
//! [compute]
//! concurrency = 8
//!
//! [balancer]
//! step = 1
//! quarantine_after = 3
//!
//! [output]
//! frames = 60
//! ```

pub mod cli;
pub mod toml;
pub mod validator;

use crate::balance::BalancePolicy;
use crate::distributed::CoordinatorSettings;
use crate::error::ClusterError;
use crate::render::RenderParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Port region workers listen on unless told otherwise
pub const DEFAULT_WORKER_PORT: u16 = 50051;

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub render: RenderParams,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which side of the compute RPC this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Coordinator with no remote workers
    #[default]
    Standalone,
    Coordinator,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Standalone => write!(f, "standalone"),
            Role::Coordinator => write!(f, "coordinator"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Cluster membership and transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub role: Role,
    /// Worker addresses, `host` or `host:port`, in node order
    #[serde(default)]
    pub workers: Vec<String>,
    /// Port used for workers given without one
    #[serde(default = "default_port")]
    pub worker_port: u16,
    /// Port a worker listens on
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// Per-call bound on remote compute
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_WORKER_PORT
}

fn default_rpc_timeout_ms() -> u64 {
    1000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            workers: Vec::new(),
            worker_port: default_port(),
            listen_port: default_port(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

/// Screen dimensions in pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
}

fn default_width() -> i32 {
    1280
}

fn default_height() -> i32 {
    720
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Local evaluation settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Fragment threads per region on this node
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Balancer tuning and node health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_step")]
    pub step: u8,
    #[serde(default)]
    pub deadband: f64,
    /// Explicit starting split, one entry per node (coordinator last)
    #[serde(default)]
    pub initial_shares: Option<Vec<u8>>,
    #[serde(default = "default_quarantine_after")]
    pub quarantine_after: u32,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u32,
}

fn default_step() -> u8 {
    1
}

fn default_quarantine_after() -> u32 {
    3
}

fn default_probe_interval() -> u32 {
    10
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            deadband: 0.0,
            initial_shares: None,
            quarantine_after: default_quarantine_after(),
            probe_interval: default_probe_interval(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Frames in the scripted zoom flight
    #[serde(default = "default_frames")]
    pub frames: u64,
    /// JSON session report path
    pub json_output: Option<PathBuf>,
    /// PNG of the final frame
    pub image_output: Option<PathBuf>,
    /// Print one line per frame
    #[serde(default = "default_true")]
    pub per_frame: bool,
    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
}

fn default_frames() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frames: default_frames(),
            json_output: None,
            image_output: None,
            per_frame: true,
            debug: false,
        }
    }
}

impl Config {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.rpc_timeout_ms)
    }

    pub fn balance_policy(&self) -> BalancePolicy {
        BalancePolicy {
            step: self.balancer.step,
            deadband: self.balancer.deadband,
        }
    }

    /// Worker addresses normalised to `host:port`
    pub fn worker_addresses(&self) -> Result<Vec<String>, ClusterError> {
        self.cluster
            .workers
            .iter()
            .map(|raw| parse_worker_address(raw, self.cluster.worker_port))
            .collect()
    }

    /// Settings for [`Coordinator::new`](crate::distributed::Coordinator::new)
    pub fn coordinator_settings(&self) -> Result<CoordinatorSettings, ClusterError> {
        let workers = match self.cluster.role {
            Role::Standalone => Vec::new(),
            _ => self.worker_addresses()?,
        };

        Ok(CoordinatorSettings {
            workers,
            screen_width: self.screen.width,
            screen_height: self.screen.height,
            rpc_timeout: self.rpc_timeout(),
            policy: self.balance_policy(),
            initial_shares: self.balancer.initial_shares.clone(),
            quarantine_after: self.balancer.quarantine_after,
            probe_interval: self.balancer.probe_interval,
        })
    }
}

/// Normalise `host` or `host:port` to `host:port`
///
/// IPv6 hosts must be bracketed (`[::1]:50051`).
pub fn parse_worker_address(raw: &str, default_port: u16) -> Result<String, ClusterError> {
    let addr = raw.trim();
    if addr.is_empty() {
        return Err(ClusterError::configuration("empty worker address"));
    }
    if addr.chars().any(char::is_whitespace) {
        return Err(ClusterError::configuration(format!(
            "worker address '{}' contains whitespace",
            addr
        )));
    }

    let bracketed = addr.starts_with('[');
    let has_port = if bracketed {
        addr.contains("]:")
    } else {
        addr.contains(':')
    };

    if !has_port {
        if bracketed && !addr.ends_with(']') {
            return Err(ClusterError::configuration(format!("malformed worker address '{}'", addr)));
        }
        return Ok(format!("{}:{}", addr, default_port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ClusterError::configuration(format!("malformed worker address '{}'", addr)))?;

    if host.is_empty() || (!bracketed && host.contains(':')) {
        return Err(ClusterError::configuration(format!(
            "malformed worker address '{}' (IPv6 hosts must be bracketed)",
            addr
        )));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(ClusterError::configuration(format!(
            "worker address '{}' has invalid port '{}'",
            addr, port
        ))),
        Ok(_) => Ok(addr.to_string()),
    }
}
