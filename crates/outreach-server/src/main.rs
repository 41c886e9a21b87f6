//! Outreach - Dispatch server entry point

use anyhow::Result;
use outreach_api::{create_router, AppState};
use outreach_common::config::{Config, LoggingConfig};
use outreach_core::{Backends, Metrics, Services};
use outreach_storage::memory::MemoryStore;
use outreach_storage::{
    DatabasePool, DbActiveMessageRepository, DbCampaignRepository, DbContactRepository,
    DbSendSettingRepository, DbStatusRepository,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Outreach dispatch server...");

    let metrics = Arc::new(Metrics::new()?);
    let mut backends = Backends::in_memory(Arc::new(MemoryStore::new()), &config, metrics.clone());

    // Initialize database
    let db_pool = if config.database.url.is_some() {
        let db_pool = DatabasePool::new(&config.database).await?;
        info!("Database connection established");

        db_pool.migrate().await?;
        info!("Database migrations completed");

        backends.settings = Arc::new(DbSendSettingRepository::new(db_pool.clone()));
        backends.statuses = Arc::new(DbStatusRepository::new(db_pool.clone()));
        backends.messages = Arc::new(DbActiveMessageRepository::new(db_pool.clone()));
        backends.campaigns = Arc::new(DbCampaignRepository::new(db_pool.clone()));
        backends.contacts = Arc::new(DbContactRepository::new(db_pool.clone()));
        Some(db_pool)
    } else {
        warn!("No database URL configured, using in-memory storage");
        None
    };

    let services = Arc::new(Services::build(backends, metrics, &config)?);

    // Start dispatch worker
    let worker_handle = services.dispatch_worker().spawn();

    // Start campaign scheduler
    let scheduler_handle = {
        let scheduler = services.campaign_scheduler();
        tokio::spawn(async move {
            scheduler.run().await;
        })
    };

    // Start API server
    let api_handle = {
        let app = create_router(AppState::new(services.clone(), db_pool), &config.api);
        let addr = format!("{}:{}", config.server.bind_address, config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Starting API server on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("Outreach server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    api_handle.abort();
    scheduler_handle.abort();
    worker_handle.abort();

    info!("Outreach server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},outreach=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
