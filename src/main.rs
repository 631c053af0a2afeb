//! Main entry point for the killfeed telemetry service
//!
//! One binary runs either half of the system: `process` consumes event topics
//! and rates matches, `collect` receives UDP telemetry from game servers and
//! publishes it. `decode` checks a capture file offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use killfeed::config::{validate_config, AppConfig};
use killfeed::decoder;
use killfeed::service::{AppState, ServiceRole};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{error, info, warn};

/// Killfeed - combat telemetry ingestion and Elo match rating
#[derive(Parser)]
#[command(
    name = "killfeed",
    version,
    about = "Game server telemetry ingestion with per-match Elo ratings",
    long_about = "Killfeed receives combat telemetry lines from game servers over UDP, \
                 routes them through AMQP topics by event kind, tracks the match running on \
                 each server and applies Elo rating changes to both rosters when a match ends."
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        global = true,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, global = true, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Metrics port override
    #[arg(long, global = true, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Enable debug mode
    #[arg(short, long, global = true, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        global = true,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Consume event topics, track matches and apply ratings
    Process,
    /// Receive UDP telemetry and publish it to the event topics
    Collect {
        /// Listen address override
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Decode a capture file and summarise what it contains
    Decode {
        /// File with one telemetry line per row
        file: PathBuf,
    },
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, role: ServiceRole) {
    info!("🚀 Killfeed Telemetry Service ({})", role);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Metrics port: {}", config.service.metrics_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   Exchange: {}", config.amqp.exchange_name);
    match role {
        ServiceRole::Process => {
            info!(
                "   Team sides: red={} blu={}",
                config.pipeline.team_sides.red, config.pipeline.team_sides.blu
            );
            info!("   Initial rating: {}", config.rating.initial_rating);
        }
        ServiceRole::Collect => {
            info!("   UDP listen: {}", config.collector.bind_addr);
        }
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    if let Command::Collect { bind: Some(bind) } = &args.command {
        config.collector.bind_addr = bind.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

/// Run one of the long-lived services until a shutdown signal arrives
async fn run_service(config: AppConfig, role: ServiceRole, dry_run: bool) -> Result<()> {
    display_startup_banner(&config, role);

    if dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone(), role).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        let _ = app_state.shutdown().await;
        std::process::exit(1);
    }

    info!("✅ Killfeed {} service is running", role);
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    // Consumers get the configured timeout inside shutdown; this bounds the rest.
    let shutdown_timeout = config.shutdown_timeout() * 2;
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(_)) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Killfeed {} service stopped", role);
    Ok(())
}

/// Decode a capture file and print per-kind counts
fn decode_file(path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capture file {}", path.display()))?;

    let summary = decoder::summarize(contents.lines());

    println!("Decoded {}: {} events", path.display(), summary.decoded());
    for (kind, count) in &summary.events {
        println!("  {:<14} {}", kind, count);
    }
    println!("  Skipped:       {}", summary.skipped);
    println!("  Errors:        {}", summary.errors);
    for (line_number, e) in &summary.sampled_errors {
        println!("    line {}: {}", line_number, e.reason);
    }

    if summary.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    match &args.command {
        Command::Process => run_service(config, ServiceRole::Process, args.dry_run).await,
        Command::Collect { .. } => run_service(config, ServiceRole::Collect, args.dry_run).await,
        Command::Decode { file } => decode_file(file),
    }
}
