//! JSON output formatting
//!
//! Serializes the session statistics held by a [`Coordinator`] into one
//! report file:
//! - Run metadata (timestamp, role, screen, final scene parameters)
//! - Frame time distribution
//! - Per-node share, health, latency percentiles, and last-frame thread timings

use crate::balance::Region;
use crate::distributed::Coordinator;
use crate::render::RenderParams;
use crate::stats::histogram::LatencyHistogram;
use crate::util::time::{format_duration, frames_per_second};
use crate::Result;
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: u64::try_from(d.as_micros()).unwrap_or(u64::MAX),
            human: format_duration(d),
        }
    }
}

/// Latency statistics with percentiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLatency {
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p50: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<JsonDuration>,
}

impl JsonLatency {
    pub fn from_histogram(hist: &LatencyHistogram) -> Self {
        let pct = |p: f64| hist.percentile(p).map(JsonDuration::from_duration);
        Self {
            samples: hist.len(),
            min: hist.min().map(JsonDuration::from_duration),
            max: hist.max().map(JsonDuration::from_duration),
            mean: hist.mean().map(JsonDuration::from_duration),
            p50: pct(50.0),
            p90: pct(90.0),
            p99: pct(99.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonNode {
    pub index: usize,
    pub address: String,
    /// Share at the end of the run (percent)
    pub share: u8,
    /// Region of the last frame
    pub region: Region,
    pub quarantined: bool,
    pub successes: u64,
    pub failures: u64,
    pub failure_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub latency: JsonLatency,
    pub last_thread_times: Vec<JsonDuration>,
}

/// Complete session report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSessionReport {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub version: String,
    pub role: String,
    pub screen_width: i32,
    pub screen_height: i32,
    pub frames: u64,
    pub wall_time: JsonDuration,
    pub frames_per_second: f64,
    pub frame_time: JsonLatency,
    pub total_failures: u64,
    pub final_params: RenderParams,
    pub nodes: Vec<JsonNode>,
}

/// Build a report from the coordinator's accumulated statistics
pub fn build_session_report(coordinator: &Coordinator, role: &str, wall_time: Duration) -> JsonSessionReport {
    let stats = coordinator.stats();
    let settings = coordinator.settings();
    let timings = stats.last_thread_timings();

    let nodes = coordinator
        .node_addresses()
        .iter()
        .enumerate()
        .filter_map(|(index, address)| {
            let node = stats.node(index)?;
            Some(JsonNode {
                index,
                address: address.clone(),
                share: coordinator.shares().get(index).unwrap_or(0),
                region: coordinator.regions().get(index).copied().unwrap_or_default(),
                quarantined: coordinator.is_quarantined(index),
                successes: node.successes,
                failures: node.failures,
                failure_rate: node.failure_rate(),
                last_error: node.last_error.clone(),
                latency: JsonLatency::from_histogram(&node.latency),
                last_thread_times: timings
                    .get(index)
                    .map(|t| t.iter().copied().map(JsonDuration::from_duration).collect())
                    .unwrap_or_default(),
            })
        })
        .collect();

    JsonSessionReport {
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: role.to_string(),
        screen_width: settings.screen_width,
        screen_height: settings.screen_height,
        frames: stats.frames(),
        wall_time: JsonDuration::from_duration(wall_time),
        frames_per_second: frames_per_second(stats.frames(), wall_time),
        frame_time: JsonLatency::from_histogram(stats.frame_times()),
        total_failures: stats.total_failures(),
        final_params: coordinator.params(),
        nodes,
    }
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, report: &JsonSessionReport, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, report)?;
    } else {
        serde_json::to_writer(writer, report)?;
    }

    Ok(())
}
