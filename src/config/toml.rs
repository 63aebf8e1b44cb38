//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, ExecutionMode};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Read worker addresses from a file, one per line
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_workers_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workers file: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Parse `"30,30,40"` into percentages
pub fn parse_shares(s: &str) -> Result<Vec<u8>> {
    s.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u8>()
                .with_context(|| format!("Invalid share '{}' (expected 0-100)", part))
        })
        .collect()
}

/// Load the configuration file named on the command line (if any) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, base)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Override role
    if let Some(mode) = cli.mode {
        config.cluster.role = match mode {
            ExecutionMode::Standalone => Role::Standalone,
            ExecutionMode::Coordinator => Role::Coordinator,
            ExecutionMode::Service => Role::Worker,
        };
    }

    // Override cluster membership
    if let Some(list) = &cli.workers {
        config.cluster.workers = list.split(',').map(|s| s.trim().to_string()).collect();
    } else if let Some(path) = &cli.workers_file {
        config.cluster.workers = read_workers_file(path)?;
    }
    if let Some(port) = cli.worker_port {
        config.cluster.worker_port = port;
    }
    if let Some(port) = cli.listen_port {
        config.cluster.listen_port = port;
    }
    if let Some(timeout) = cli.timeout_ms {
        config.cluster.rpc_timeout_ms = timeout;
    }

    // Override screen and scene
    if let Some(width) = cli.width {
        config.screen.width = width;
    }
    if let Some(height) = cli.height {
        config.screen.height = height;
    }
    if let Some(magnification) = cli.magnification {
        config.render.magnification = magnification;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.render.max_iterations = max_iterations;
    }
    if let Some(pan_x) = cli.pan_x {
        config.render.pan_x = pan_x;
    }
    if let Some(pan_y) = cli.pan_y {
        config.render.pan_y = pan_y;
    }

    // Override compute
    if let Some(concurrency) = cli.concurrency {
        config.compute.concurrency = concurrency;
    }

    // Override balancer
    if let Some(step) = cli.balance_step {
        config.balancer.step = step;
    }
    if let Some(deadband) = cli.deadband {
        config.balancer.deadband = deadband;
    }
    if let Some(shares) = &cli.initial_shares {
        config.balancer.initial_shares = Some(parse_shares(shares)?);
    }
    if let Some(n) = cli.quarantine_after {
        config.balancer.quarantine_after = n;
    }
    if let Some(n) = cli.probe_interval {
        config.balancer.probe_interval = n;
    }

    // Override output
    if let Some(frames) = cli.frames {
        config.output.frames = frames;
    }
    if let Some(path) = &cli.json_output {
        config.output.json_output = Some(path.clone());
    }
    if let Some(path) = &cli.output {
        config.output.image_output = Some(path.clone());
    }
    if cli.quiet {
        config.output.per_frame = false;
    }
    if cli.debug {
        config.output.debug = true;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        [cluster]
        role = "coordinator"
        workers = ["10.0.1.10", "10.0.1.11:6000"]
        rpc_timeout_ms = 250

        [screen]
        width = 800
        height = 600

        [render]
        magnification = 900.0

        [compute]
        concurrency = 6

        [balancer]
        step = 2
        initial_shares = [30, 30, 40]

        [output]
        frames = 12
    "#;

    #[test]
    fn test_parse_full_file() {
        let config = parse_toml_string(SAMPLE).unwrap();
        assert_eq!(config.cluster.role, Role::Coordinator);
        assert_eq!(config.cluster.workers.len(), 2);
        assert_eq!(config.cluster.rpc_timeout_ms, 250);
        assert_eq!(config.screen.width, 800);
        assert_eq!(config.render.magnification, 900.0);
        // Unset render fields keep their defaults
        assert_eq!(config.render.max_iterations, 80.0);
        assert_eq!(config.compute.concurrency, 6);
        assert_eq!(config.balancer.step, 2);
        assert_eq!(config.balancer.initial_shares, Some(vec![30, 30, 40]));
        assert_eq!(config.balancer.quarantine_after, 3);
        assert_eq!(config.output.frames, 12);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config.cluster.role, Role::Standalone);
        assert_eq!(config.screen.width, 1280);
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(parse_toml_string("[cluster]\nrole = \"leader\"\n").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            width: Some(1024),
            workers: Some("a, b:7000".to_string()),
            initial_shares: Some("20,20,60".to_string()),
            quiet: true,
            ..Cli::default()
        };

        let config = load_config(&cli).unwrap();
        assert_eq!(config.screen.width, 1024);
        assert_eq!(config.screen.height, 600);
        assert_eq!(config.cluster.workers, vec!["a".to_string(), "b:7000".to_string()]);
        assert_eq!(config.balancer.initial_shares, Some(vec![20, 20, 60]));
        assert!(!config.output.per_frame);
        assert_eq!(config.cluster.role, Role::Coordinator);
    }

    #[test]
    fn test_workers_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# render farm").unwrap();
        writeln!(file, "10.0.1.10").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  10.0.1.11:6000  ").unwrap();

        let cli = Cli {
            mode: Some(ExecutionMode::Coordinator),
            workers_file: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        let config = merge_cli_with_config(&cli, Config::default()).unwrap();
        assert_eq!(config.cluster.workers, vec!["10.0.1.10", "10.0.1.11:6000"]);
    }

    #[test]
    fn test_bad_shares_rejected() {
        assert!(parse_shares("50,fifty").is_err());
        assert!(parse_shares("300").is_err());
        assert_eq!(parse_shares("100").unwrap(), vec![100]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = parse_toml_file(Path::new("/nonexistent/mandelfarm.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/mandelfarm.toml"));
    }
}
