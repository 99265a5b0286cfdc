//! Stock Rewards - Main Entry Point
//!
//! Serves the reward API, refreshes cached prices on a timer and sweeps
//! expired idempotency keys.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use stock_rewards::api::{build_router, AppState};
use stock_rewards::config::{load_config, load_from_env};
use stock_rewards::scheduler::{spawn_idempotency_sweep, spawn_price_refresh};
use stock_rewards::{LedgerStore, MemoryStore, PgStore, PriceFeed, SyntheticPriceFeed};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Read only the flat environment variables (SERVER_PORT, DB_HOST, ...)
    #[arg(long)]
    env_only: bool,

    /// Keep all state in process memory instead of Postgres
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = if args.env_only {
        load_from_env()
    } else {
        load_config(Some(&args.config))
    }
    .context("failed to load configuration")?;

    // Initialize logging
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(environment = %config.settings.environment, "Starting stock rewards service");
    if !args.env_only {
        info!("Configuration file: {}", args.config);
    }

    let store: Arc<dyn LedgerStore> = if args.in_memory {
        warn!("Running with in-memory store; state is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::connect(&config.database)
            .await
            .context("failed to connect to database")?;
        pg.migrate().await.context("failed to run migrations")?;
        Arc::new(pg)
    };

    let feed: Arc<dyn PriceFeed> = Arc::new(SyntheticPriceFeed::new(&config.pricing));
    let state = Arc::new(AppState::new(store, feed, &config));

    let price_refresh = if config.pricing.enable_scheduler {
        Some(spawn_price_refresh(
            state.prices.clone(),
            config.pricing.refresh_interval(),
        ))
    } else {
        info!("Price refresh scheduler disabled");
        None
    };
    let sweep = spawn_idempotency_sweep(state.guard.clone(), config.idempotency.cleanup_interval());

    let app = build_router(state).layer(TraceLayer::new_for_http());
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal, cleaning up...");
        })
        .await
        .context("server error")?;

    if let Some(task) = price_refresh {
        task.stop().await;
    }
    sweep.stop().await;

    info!("Shutdown complete");
    Ok(())
}
