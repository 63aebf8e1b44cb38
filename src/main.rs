//! mandelfarm CLI entry point

use anyhow::{Context, Result};
use mandelfarm::config::cli::Cli;
use mandelfarm::config::{toml::load_config, validator::validate_config, Config, Role};
use mandelfarm::distributed::{Coordinator, RegionWorkerService};
use mandelfarm::output;
use mandelfarm::render::{FragmentEvaluator, FrameSource, MandelbrotOracle, Scene, SceneCommand};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    println!("mandelfarm v{}", env!("CARGO_PKG_VERSION"));
    println!("Distributed, self-balancing fractal renderer");
    println!();

    let cli = Cli::parse_args();
    cli.validate()?;

    let config = load_config(&cli)?;
    setup_tracing(config.output.debug);

    validate_config(&config).context("Configuration validation failed")?;

    print_configuration(&config);

    if cli.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    match config.cluster.role {
        Role::Worker => runtime.block_on(run_service(&config)),
        Role::Standalone | Role::Coordinator => runtime.block_on(run_coordinator(&config)),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--debug`
fn setup_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_evaluator(config: &Config) -> FragmentEvaluator {
    FragmentEvaluator::new(Arc::new(MandelbrotOracle), config.compute.concurrency)
}

/// Run as a region worker until killed
async fn run_service(config: &Config) -> Result<()> {
    let service = RegionWorkerService::new(config.cluster.listen_port, build_evaluator(config));
    service.run().await
}

/// Drive a zoom flight of `frames` frames, one `zoom_in` per frame
async fn run_coordinator(config: &Config) -> Result<()> {
    let settings = config.coordinator_settings()?;
    let mut coordinator = Coordinator::new(settings, build_evaluator(config), config.render)
        .context("Failed to create coordinator")?;

    if coordinator.worker_count() > 0 {
        let connected = coordinator.connect_all().await;
        info!(
            connected,
            workers = coordinator.worker_count(),
            "initial connections established"
        );
    }

    println!();
    println!("Rendering {} frames...", config.output.frames);
    println!();

    let mut scene = Scene::new(config.render);
    let mut params = scene.params();
    let start = Instant::now();

    for _ in 0..config.output.frames {
        if let Some(report) = coordinator.run_frame(params).await {
            if config.output.per_frame {
                output::text::print_frame(&report);
            }
        }
        params = scene.apply(SceneCommand::ZoomIn, &mut coordinator);
    }

    let wall_time = start.elapsed();
    println!();
    output::text::print_summary(&coordinator, wall_time);

    if let Some(path) = &config.output.json_output {
        let report = output::json::build_session_report(&coordinator, &config.cluster.role.to_string(), wall_time);
        output::json::write_json_output(path, &report, true)?;
        println!();
        println!("Session report written to {}", path.display());
    }

    if let Some(path) = &config.output.image_output {
        output::image::save_png(coordinator.pixel_buffer(), path)?;
        println!("Final frame written to {}", path.display());
    }

    Ok(())
}

fn print_configuration(config: &Config) {
    println!("Configuration:");
    println!("  Mode: {}", config.cluster.role);
    match config.cluster.role {
        Role::Worker => {
            println!("  Listen port: {}", config.cluster.listen_port);
        }
        Role::Coordinator => {
            println!("  Workers: {}", config.cluster.workers.join(", "));
            println!("  RPC timeout: {}ms", config.cluster.rpc_timeout_ms);
        }
        Role::Standalone => {}
    }
    println!("  Concurrency: {}", config.compute.concurrency);
    if config.cluster.role != Role::Worker {
        println!("  Screen: {}x{}", config.screen.width, config.screen.height);
        println!(
            "  Scene: magnification {}, iterations {}, pan ({}, {})",
            config.render.magnification, config.render.max_iterations, config.render.pan_x, config.render.pan_y
        );
        println!(
            "  Balancer: step {}%, deadband {:.2}, quarantine after {}, probe every {}",
            config.balancer.step,
            config.balancer.deadband,
            config.balancer.quarantine_after,
            config.balancer.probe_interval
        );
        if let Some(shares) = &config.balancer.initial_shares {
            println!("  Initial shares: {:?}", shares);
        }
        println!("  Frames: {}", config.output.frames);
    }
}
