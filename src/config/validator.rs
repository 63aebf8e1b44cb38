//! Configuration validation
//!
//! Everything here runs before the first frame; any failure is a
//! [`ClusterError::Configuration`] and aborts startup.

use super::*;

type Result<T> = std::result::Result<T, ClusterError>;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_cluster(&config.cluster)?;
    validate_screen(&config.screen)?;
    validate_render(&config.render)?;
    validate_compute(&config.compute)?;
    validate_balancer(&config.balancer, config.cluster.role, config.cluster.workers.len())?;

    Ok(())
}

/// Validate cluster membership and transport settings
pub fn validate_cluster(cluster: &ClusterConfig) -> Result<()> {
    if cluster.rpc_timeout_ms == 0 {
        return Err(ClusterError::configuration("rpc_timeout_ms must be greater than 0"));
    }

    match cluster.role {
        Role::Coordinator => {
            if cluster.workers.is_empty() {
                return Err(ClusterError::configuration(
                    "coordinator mode requires at least one worker (use standalone mode otherwise)",
                ));
            }
            if cluster.worker_port == 0 {
                return Err(ClusterError::configuration("worker_port must be greater than 0"));
            }
            for addr in &cluster.workers {
                parse_worker_address(addr, cluster.worker_port)?;
            }
        }
        Role::Worker | Role::Standalone => {}
    }

    Ok(())
}

pub fn validate_screen(screen: &ScreenConfig) -> Result<()> {
    if screen.width <= 0 || screen.height <= 0 {
        return Err(ClusterError::configuration(format!(
            "screen dimensions must be positive, got {}x{}",
            screen.width, screen.height
        )));
    }
    Ok(())
}

pub fn validate_render(render: &RenderParams) -> Result<()> {
    if !render.magnification.is_finite() || render.magnification <= 0.0 {
        return Err(ClusterError::configuration(format!(
            "magnification must be a positive number, got {}",
            render.magnification
        )));
    }
    if !render.max_iterations.is_finite() || render.max_iterations <= 0.0 {
        return Err(ClusterError::configuration(format!(
            "max_iterations must be a positive number, got {}",
            render.max_iterations
        )));
    }
    if !render.pan_x.is_finite() || !render.pan_y.is_finite() {
        return Err(ClusterError::configuration("pan offsets must be finite"));
    }
    Ok(())
}

pub fn validate_compute(compute: &ComputeConfig) -> Result<()> {
    if compute.concurrency == 0 {
        return Err(ClusterError::configuration("concurrency must be at least 1"));
    }
    Ok(())
}

/// Validate balancer tuning; explicit shares must cover every node
pub fn validate_balancer(balancer: &BalancerConfig, role: Role, worker_count: usize) -> Result<()> {
    if balancer.step == 0 || balancer.step > 100 {
        return Err(ClusterError::configuration(format!(
            "balancer step must be between 1 and 100, got {}",
            balancer.step
        )));
    }
    if !(0.0..1.0).contains(&balancer.deadband) {
        return Err(ClusterError::configuration(format!(
            "deadband must be in [0.0, 1.0), got {}",
            balancer.deadband
        )));
    }
    if balancer.quarantine_after == 0 {
        return Err(ClusterError::configuration("quarantine_after must be at least 1"));
    }
    if balancer.probe_interval == 0 {
        return Err(ClusterError::configuration("probe_interval must be at least 1"));
    }

    if let Some(shares) = &balancer.initial_shares {
        let node_count = match role {
            Role::Standalone => 1,
            _ => worker_count + 1,
        };
        if role != Role::Worker && shares.len() != node_count {
            return Err(ClusterError::configuration(format!(
                "initial_shares has {} entries but there are {} nodes (workers + coordinator)",
                shares.len(),
                node_count
            )));
        }
        crate::balance::WorkloadShare::from_vec(shares.clone())?;
    }

    Ok(())
}
