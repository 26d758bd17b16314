use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::{info, warn};

use marketplace_reconciler::api::create_router;
use marketplace_reconciler::app::{AppService, AppState, EntityStores, Reconciler, spawn_worker};
use marketplace_reconciler::config::{AppConfig, LeaseKind};
use marketplace_reconciler::domain::PassLease;
use marketplace_reconciler::infra::observability::{init_metrics_handle, init_tracing};
use marketplace_reconciler::infra::{
    EthRpcLedgerClient, LocalPassLease, PostgresClient, PostgresPassLease, RedisCacheInvalidator,
};
use secrecy::ExposeSecret;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let metrics = init_metrics_handle();
    if metrics.is_none() {
        warn!("Metrics recorder could not be installed; /metrics is disabled");
    }

    // Instantiate infrastructure components
    let db = Arc::new(
        PostgresClient::new(config.database_url.expose_secret(), config.postgres.clone())
            .await
            .context("Failed to connect to database")?,
    );
    if config.run_migrations {
        db.run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let ledger = Arc::new(
        EthRpcLedgerClient::new(config.rpc_url, config.rpc)
            .context("Failed to create ledger client")?,
    );
    let cache = Arc::new(
        RedisCacheInvalidator::connect(&config.redis_url)
            .await
            .context("Failed to connect to cache")?,
    );
    let lease: Arc<dyn PassLease> = match config.lease {
        LeaseKind::Local => Arc::new(LocalPassLease::new()),
        LeaseKind::Postgres => Arc::new(PostgresPassLease::new(db.pool().clone())),
    };
    info!(lease = ?config.lease, "Pass lease configured");

    // Wire the application layer
    let stores = EntityStores::from_backend(Arc::clone(&db));
    let reconciler = Arc::new(Reconciler::new(
        stores.clone(),
        Arc::clone(&ledger) as _,
        Arc::clone(&cache) as _,
        lease,
    ));
    let service = Arc::new(AppService::new(db, stores, ledger, cache));
    let app_state = Arc::new(AppState::new(service, Arc::clone(&reconciler), metrics));

    let (worker, shutdown_tx) = spawn_worker(reconciler, config.worker);

    let router = create_router(app_state);
    let listener = tokio::net::TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server_addr))?;

    info!(addr = %config.server_addr, "Server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, waiting for reconciliation worker");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        warn!(error = ?e, "Reconciliation worker task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = ?e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
