//! Main entry point for the Sparring Room matchmaking service
//!
//! Initializes and runs the waiting-room microservice with logging,
//! configuration overrides and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use sparring_room::config::{validate_config, AppConfig};
use sparring_room::service::{AppState, HealthCheck, HealthContext, HealthStatus};
use sparring_room::store::StoreBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Sparring Room Matchmaking Service - score-window pairing for sparring sessions
#[derive(Parser)]
#[command(
    name = "sparring-room",
    version,
    about = "A two-party matchmaking microservice pairing players by exercise type and score",
    long_about = "Sparring Room keeps one waiting pool per exercise type in a shared store, \
                 pairs each arriving player with the longest-waiting opponent whose score is \
                 within 99 points, expires stale entries and announces matches over AMQP."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Redis URL override
    #[arg(long, value_name = "URL", help = "Override Redis connection URL")]
    redis_url: Option<String>,

    /// Store backend override
    #[arg(long, value_name = "BACKEND", help = "Pool store backend (redis, memory)")]
    store_backend: Option<StoreBackend>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
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

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    // Components are built but not started, so probe them as if running
    let app_state = AppState::new(config).await?;
    let context = HealthContext {
        is_running: Arc::new(RwLock::new(true)),
        ..app_state.health_context()
    };

    match HealthCheck::check(&context).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!("  {}: {}", check.name, check.status);
            }
            println!("  Players Waiting: {}", health.stats.players_waiting);
            for pool in &health.stats.pools {
                println!(
                    "    exercise type {}: {} waiting",
                    pool.exercise_type, pool.waiting
                );
            }

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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

/// Run periodic health checks
async fn health_check_task(context: HealthContext) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while *context.is_running.read().await {
        interval.tick().await;

        match HealthCheck::check(&context).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} players waiting, {} matches made",
                    health.status, health.stats.players_waiting, health.stats.matches_made
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Sparring Room Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {} (queue {})", config.amqp.url, config.amqp.queue_name);
    info!("   Store: {}", config.store.backend);
    info!(
        "   Exercise types: {:?}",
        config.matchmaking.exercise_types
    );
    info!(
        "   Wait TTL: {}s, sweep every {}s",
        config.matchmaking.wait_ttl_seconds, config.matchmaking.sweep_interval_seconds
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    // Start with environment-based config
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(redis_url) = &args.redis_url {
        config.store.redis_url = redis_url.clone();
    }

    if let Some(backend) = args.store_backend {
        config.store.backend = backend;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // Handle special modes
    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    // Display startup information
    display_startup_banner(&config);

    // Initialize application state
    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    // Start the service
    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    // Start health check monitoring
    let health_task = tokio::spawn(health_check_task(app_state.health_context()));

    info!("✅ Sparring Room Matchmaking Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    // Wait for shutdown signal
    wait_for_shutdown_signal().await;

    // Begin graceful shutdown
    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    // Cancel health check task
    health_task.abort();

    // Shutdown with timeout
    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Err(e)) => {
            error!("Shutdown completed with errors: {}", e);
        }
        Err(_) => {
            warn!("⚠️  Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("🛑 Sparring Room Matchmaking Service stopped");
    Ok(())
}
