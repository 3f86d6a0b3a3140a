//! Ferry webhook delivery service.
//!
//! Wires the queue store, delivery coordinator, drain scheduler and operator
//! API together, then runs until SIGINT or SIGTERM.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ferry_api::{AppState, Config};
use ferry_core::storage::Storage;
use ferry_delivery::{
    DeliveryClient, DeliveryCoordinator, DrainScheduler, ModuleLifecycle, PostgresLifecycle,
    PostgresQueueStore, QueueStore, TargetSource, WebhookEventHandler,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        max_attempts = config.max_attempts,
        drain_interval_seconds = config.drain_interval_seconds,
        "Configuration loaded"
    );

    let addr = config.parse_server_addr()?;
    let pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    PostgresLifecycle::new(pool.clone()).install().await.context("Failed to install schema")?;
    info!("Retry queue schema installed");

    let target = config.to_target();
    if !target.is_configured() {
        warn!("webhook_url or api_secret not set, deliveries will be skipped");
    }

    let shutdown = CancellationToken::new();
    let store: Arc<dyn QueueStore> =
        Arc::new(PostgresQueueStore::new(Arc::new(Storage::new(pool.clone()))));
    let client = DeliveryClient::new(config.to_client_config())?;
    let coordinator = Arc::new(
        DeliveryCoordinator::new(store.clone(), client)
            .with_policy(config.to_backoff_policy())
            .with_config(config.to_coordinator_config())
            .with_cancellation_token(shutdown.child_token()),
    );
    let targets: Arc<dyn TargetSource> = Arc::new(target);

    let events = WebhookEventHandler::new(coordinator.clone(), targets.clone())
        .with_triggers(config.triggers.iter().cloned());
    let state = AppState::new(store, coordinator.clone(), targets.clone())
        .with_event_handler(Arc::new(events))
        .with_operator_token(config.operator_token.clone());

    let scheduler_handle = tokio::spawn({
        let scheduler = DrainScheduler::new(coordinator, targets, shutdown.child_token())
            .with_interval(config.drain_interval());
        async move {
            if let Err(e) = scheduler.run().await {
                error!(error = %e, "Drain scheduler failed");
            }
        }
    });

    let server_handle = tokio::spawn({
        let shutdown = shutdown.child_token();
        let request_timeout = config.request_timeout();
        async move {
            if let Err(e) = ferry_api::start_server(state, addr, request_timeout, shutdown).await {
                error!(error = %e, "Server failed");
            }
        }
    });

    info!(%addr, "Ferry is ready to deliver webhooks");

    shutdown_signal().await;
    shutdown.cancel();

    tokio::select! {
        () = tokio::time::sleep(SHUTDOWN_GRACE) => {
            warn!("Shutdown grace period expired");
        },
        _ = async { tokio::join!(scheduler_handle, server_handle) } => {
            info!("Scheduler and server stopped");
        },
    }

    pool.close().await;
    info!("Ferry shutdown complete");
    Ok(())
}

/// Installs the global subscriber; `RUST_LOG` overrides the configured filter.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs() {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_file(true).with_line_number(true))
            .try_init()?;
    }

    Ok(())
}

/// Creates the database connection pool, retrying while the database starts.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
