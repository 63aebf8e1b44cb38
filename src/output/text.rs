//! Human-readable text output

use crate::distributed::coordinator::LOCAL_NODE_LABEL;
use crate::distributed::{Coordinator, FrameReport, NodeOutcome};
use crate::stats::histogram::LatencyHistogram;
use crate::util::time::{format_duration, frames_per_second, mean_duration};
use std::fmt::Write as _;
use std::time::Duration;

/// One line per rendered frame
///
/// ```text
/// frame    7    41.20ms  shares [34, 32, 34]  1->0 (1)  n0 12.10ms  n1 FAILED  local 40.90ms
/// ```
pub fn format_frame_line(report: &FrameReport) -> String {
    let mut line = format!(
        "frame {:>4} {:>10}  shares {:?}",
        report.frame,
        format_duration(report.elapsed),
        report.shares
    );

    if let Some(shift) = report.shift {
        let _ = write!(line, "  {}->{} ({})", shift.from, shift.to, shift.amount);
    }

    for node in &report.nodes {
        let label = if node.index + 1 == report.nodes.len() {
            LOCAL_NODE_LABEL.to_string()
        } else {
            format!("n{}", node.index)
        };
        let status = match &node.outcome {
            NodeOutcome::Completed { latency } => format_duration(*latency),
            NodeOutcome::Failed { .. } => "FAILED".to_string(),
            NodeOutcome::Quarantined => "quarantined".to_string(),
        };
        let _ = write!(line, "  {} {}", label, status);
    }

    line
}

pub fn print_frame(report: &FrameReport) {
    println!("{}", format_frame_line(report));
    for node in &report.nodes {
        if let NodeOutcome::Failed { error } = &node.outcome {
            println!("      {}", error);
        }
    }
}

/// End-of-run summary
pub fn format_summary(coordinator: &Coordinator, wall_time: Duration) -> String {
    let stats = coordinator.stats();
    let mut out = String::new();

    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out, "                    RENDER RESULTS");
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out);
    let _ = writeln!(out, "Elapsed Time: {:.3}s", wall_time.as_secs_f64());
    let _ = writeln!(
        out,
        "Frames:       {} ({:.2} fps)",
        stats.frames(),
        frames_per_second(stats.frames(), wall_time)
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Frame Time:");
    write_latency(&mut out, stats.frame_times());
    let _ = writeln!(out);

    if let Ok(cluster) = stats.cluster_latency() {
        if !cluster.is_empty() {
            let _ = writeln!(out, "Node Latency (all nodes):");
            write_latency(&mut out, &cluster);
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "Nodes:");
    let shares = coordinator.shares();
    for (index, address) in coordinator.node_addresses().iter().enumerate() {
        let Some(node) = stats.node(index) else {
            continue;
        };
        let quarantined = if coordinator.is_quarantined(index) {
            "  [quarantined]"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  [{}] {:<24} share {:>3}%  ok {:>5}  failed {:>5}{}",
            index,
            address,
            shares.get(index).unwrap_or(0),
            node.successes,
            node.failures,
            quarantined
        );
        if !node.latency.is_empty() {
            let _ = writeln!(
                out,
                "      latency mean {}  p50 {}  p99 {}",
                opt_duration(node.latency.mean()),
                opt_duration(node.latency.percentile(50.0)),
                opt_duration(node.latency.percentile(99.0))
            );
        }
        if let Some(err) = &node.last_error {
            let _ = writeln!(out, "      last error: {}", err);
        }
    }

    if stats.total_failures() > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures: {}", stats.total_failures());
    }

    let timings = stats.last_thread_timings();
    if timings.iter().any(|t| !t.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "Thread Timings (last frame):");
        for (index, threads) in timings.iter().enumerate() {
            if threads.is_empty() {
                continue;
            }
            let per_thread: Vec<String> = threads.iter().map(|d| format_duration(*d)).collect();
            let _ = writeln!(
                out,
                "  [{}] mean {}  [{}]",
                index,
                format_duration(mean_duration(threads)),
                per_thread.join(", ")
            );
        }
    }

    out
}

pub fn print_summary(coordinator: &Coordinator, wall_time: Duration) {
    print!("{}", format_summary(coordinator, wall_time));
}

fn write_latency(out: &mut String, hist: &LatencyHistogram) {
    if hist.is_empty() {
        let _ = writeln!(out, "  (no frames rendered)");
        return;
    }
    let _ = writeln!(out, "  Mean: {}", opt_duration(hist.mean()));
    let _ = writeln!(out, "  Min:  {}", opt_duration(hist.min()));
    let _ = writeln!(out, "  p50:  {}", opt_duration(hist.percentile(50.0)));
    let _ = writeln!(out, "  p99:  {}", opt_duration(hist.percentile(99.0)));
    let _ = writeln!(out, "  Max:  {}", opt_duration(hist.max()));
}

fn opt_duration(d: Option<Duration>) -> String {
    d.map(format_duration).unwrap_or_else(|| "-".to_string())
}
