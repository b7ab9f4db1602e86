//! Halldyll Fleet CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-fleet command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use halldyll_fleet::cli::{Cli, Commands, OutputFormatter};
use halldyll_fleet::config::{find_config_file, ConfigParser, ConfigValidator, FleetConfig};
use halldyll_fleet::error::Result;
use halldyll_fleet::fleet::PodManager;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Starter configuration written by `halldyll-fleet init`.
const STARTER_CONFIG: &str = r"# Halldyll Fleet configuration
fleet:
  pre_name: easel
  template_id: your-template-id
  volume_id: your-volume-id
  image_name: ghcr.io/your-org/your-image:latest
  gpu_types: [RTXA6000]

scaling:
  min_pods: 1
  max_pods: 3
  sensitivity: 50

# The provider credential comes from the RUNPOD_API_KEY environment
# variable (a .env file next to this one is loaded automatically).
";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Status => cmd_status(cli.config.as_ref(), &formatter).await,
        Commands::Run { status_interval } => {
            cmd_run(cli.config.as_ref(), status_interval, &formatter).await
        }
    }
}

/// Loads configuration from the given path or by searching upward from
/// the current directory, with .env and environment overrides applied.
fn load_config(config_path: Option<&PathBuf>) -> Result<FleetConfig> {
    let parser = ConfigParser::new();
    parser.load_dotenv()?;

    let path = match config_path {
        Some(path) => path.clone(),
        None => find_config_file(std::env::current_dir()?)?,
    };

    parser.load_with_env(path)
}

/// Initialize a starter configuration file.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let target = path.join("fleet.yaml");

    if target.exists() && !force {
        return Err(halldyll_fleet::FleetError::internal(format!(
            "{} already exists (use --force to overwrite)",
            target.display()
        )));
    }

    std::fs::write(&target, STARTER_CONFIG)?;
    println!("Wrote starter configuration to {}", target.display());
    println!("Set RUNPOD_API_KEY and fill in the template, volume, and image ids.");
    Ok(())
}

/// Validate the configuration file.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    print!("{}", formatter.format_validation(&result, show_warnings));
    Ok(())
}

/// List the fleet's pods on the provider.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let client = config.client()?;

    let pods = client.list_pods().await?;
    print!("{}", formatter.format_listing(&pods, &config.fleet.pre_name));
    Ok(())
}

/// Run the fleet manager until interrupted.
async fn cmd_run(
    config_path: Option<&PathBuf>,
    status_interval: u64,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    let client = config.client()?;

    let manager = PodManager::start(config.fleet_settings(), client).await;
    info!("Fleet manager running, press ctrl-c to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = manager.snapshot();
                info!(
                    "Fleet status: {} pods, {} queued, {} processing, {} completed",
                    snapshot.pods.len(),
                    snapshot.prompts.queued,
                    snapshot.prompts.processing,
                    snapshot.prompts.completed,
                );
            }
        }
    }

    manager.stop().await;
    print!("{}", formatter.format_snapshot(&manager.snapshot()));
    Ok(())
}
