//! Vitals Agent - polls vitals-glimpse endpoints into InfluxDB
//!
//! Every interval the agent fetches the vitals document of each configured
//! server and writes the valid ones as points into an InfluxDB bucket.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vitals_lib::{
    fetcher::{FetcherConfig, HttpFetcher},
    health::HealthRegistry,
    observability::StructuredLogger,
    registry::ServerRegistry,
    scheduler::SchedulerBuilder,
    sink::MetricsSink,
};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long shutdown waits for the last write errors to be logged
const ERROR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting vitals-agent");

    let config = config::AgentConfig::load().context("Failed to load configuration")?;
    println!("Org: {}", config.org);
    println!("Bucket: {}", config.bucket);
    println!("URL: {}", config.store_url);
    println!("Polling interval (minutes): {}", config.polling_interval_minutes);

    let registry = ServerRegistry::load(&config.servers_file).with_context(|| {
        format!(
            "Failed to load server list from {}",
            config.servers_file.display()
        )
    })?;

    let health_registry = HealthRegistry::new();

    let logger = StructuredLogger::new(&config.bucket);
    logger.log_startup(AGENT_VERSION, registry.len(), config.polling_interval_minutes);

    let sink = Arc::new(
        MetricsSink::builder()
            .store(config.store_config())
            .health(health_registry.clone())
            .open()
            .context("Failed to open metrics sink")?,
    );

    // Write failures arrive after the fact; log each one
    let drain_handle = sink.errors().map(|mut errors| {
        let logger = logger.clone();
        tokio::spawn(async move {
            while let Some(err) = errors.next().await {
                logger.log_write_error(&err);
            }
        })
    });

    let fetcher = HttpFetcher::new(FetcherConfig {
        timeout: config.fetch_timeout(),
        ..FetcherConfig::default()
    })
    .context("Failed to create HTTP client")?;

    let scheduler = SchedulerBuilder::new()
        .fetcher(Arc::new(fetcher))
        .sink(sink.clone())
        .registry(registry)
        .interval(config.polling_interval())
        .overlap(config.overlap_policy)
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let api_handle = config.api_port.map(|port| {
        let state = Arc::new(api::AppState::new(health_registry.clone()));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                error!(error = %e, "API server failed");
            }
        })
    });

    health_registry.set_running(true).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_running(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task terminated abnormally");
    }

    sink.close().await;
    drop(sink);

    if let Some(mut handle) = drain_handle {
        if tokio::time::timeout(ERROR_DRAIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            warn!("Write errors still pending at shutdown");
            handle.abort();
        }
    }

    if let Some(handle) = api_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}
