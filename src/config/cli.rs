//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Standalone mode - render everything on this machine
    Standalone,
    /// Coordinator mode - balance and composite across region workers
    Coordinator,
    /// Service mode - run a region worker (accepts coordinator requests)
    Service,
}

/// mandelfarm - distributed fractal renderer with adaptive load balancing
#[derive(Parser, Debug, Default)]
#[command(name = "mandelfarm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: standalone, coordinator, or service
    #[arg(long, value_enum)]
    pub mode: Option<ExecutionMode>,

    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Comma-separated worker addresses (e.g., "10.0.1.10,10.0.1.11:6000")
    #[arg(long)]
    pub workers: Option<String>,

    /// File containing worker addresses (one per line, '#' comments allowed)
    #[arg(long)]
    pub workers_file: Option<PathBuf>,

    /// Port used for workers listed without one
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Port for the region worker to listen on (service mode only)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Per-call timeout for remote compute, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    // === Screen & Scene ===
    /// Screen width in pixels
    #[arg(long)]
    pub width: Option<i32>,

    /// Screen height in pixels
    #[arg(long)]
    pub height: Option<i32>,

    /// Initial magnification (pixels per unit)
    #[arg(long)]
    pub magnification: Option<f64>,

    /// Initial escape-time iteration cap
    #[arg(long)]
    pub max_iterations: Option<f64>,

    /// Initial horizontal pan
    #[arg(long, allow_hyphen_values = true)]
    pub pan_x: Option<f64>,

    /// Initial vertical pan
    #[arg(long, allow_hyphen_values = true)]
    pub pan_y: Option<f64>,

    /// Number of frames to render (one zoom step each)
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    // === Compute ===
    /// Fragment threads per region on this node (default: CPU count)
    #[arg(short = 't', long)]
    pub concurrency: Option<usize>,

    // === Balancer ===
    /// Percentage points moved per frame
    #[arg(long)]
    pub balance_step: Option<u8>,

    /// Minimum relative latency gap before shares move (0.0 - 1.0)
    #[arg(long)]
    pub deadband: Option<f64>,

    /// Starting split, one percentage per node, coordinator last (e.g., "30,30,40")
    #[arg(long)]
    pub initial_shares: Option<String>,

    /// Consecutive failures before a worker is quarantined
    #[arg(long)]
    pub quarantine_after: Option<u32>,

    /// Frames between probes of a quarantined worker
    #[arg(long)]
    pub probe_interval: Option<u32>,

    // === Output ===
    /// Write the session report as JSON
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Save the final frame as PNG
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Only print the summary, not one line per frame
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate flag combinations clap cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.is_some() && self.workers_file.is_some() {
            anyhow::bail!("--workers and --workers-file are mutually exclusive");
        }

        if self.mode == Some(ExecutionMode::Service) {
            if self.workers.is_some() || self.workers_file.is_some() {
                anyhow::bail!("service mode does not take a worker list");
            }
            if self.json_output.is_some() || self.output.is_some() {
                anyhow::bail!("service mode does not produce reports");
            }
        }

        if let Some(deadband) = self.deadband {
            if !(0.0..1.0).contains(&deadband) {
                anyhow::bail!("deadband must be in [0.0, 1.0), got {}", deadband);
            }
        }

        Ok(())
    }
}
