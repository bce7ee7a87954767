//! Notifier Worker
//!
//! Runs the notification retry sweep on a fixed interval.
//!
//! ## Architecture
//!
//! ```text
//! tokio interval (NOTIFY_SWEEP_INTERVAL_SECS)
//!   ↓
//! RetryManager::run_once
//!   ↓ (recover stale, claim, redeliver)
//! NotificationService<PgNotificationLog>
//!   ↓                        ↓
//! PostgreSQL            Email / SMS providers
//! ```
//!
//! ## Features
//!
//! - Concurrent-safe sweeps: several replicas may run side by side
//! - Stale pending recovery on every tick
//! - Prometheus scrape endpoint
//! - Graceful shutdown on SIGINT / SIGTERM

pub mod config;
pub mod telemetry;

use chrono::Utc;
use domain_notifications::{
    DeliveryConfig, NotificationService, PgNotificationLog, PgSettingsSource, PgTemplateStore,
    Providers, RetryManager, Settings, SettingsCache,
};
use eyre::{Result, WrapErr};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

/// Run the notifier worker
///
/// 1. Sets up error reports, structured logging and metrics
/// 2. Connects to PostgreSQL, optionally running migrations
/// 3. Builds the delivery service from `NOTIFY_*` configuration
/// 4. Sweeps until a shutdown signal arrives
///
/// # Errors
///
/// Returns an error if configuration is invalid, the database is unreachable
/// or live providers cannot be built.
pub async fn run() -> Result<()> {
    telemetry::install_color_eyre();

    let worker_config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    telemetry::init_tracing(worker_config.is_production());
    telemetry::init_metrics(worker_config.metrics_port)?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = %worker_config.environment,
        "Starting notifier worker"
    );

    let delivery = DeliveryConfig::from_env().wrap_err("Failed to load delivery configuration")?;

    info!("Connecting to PostgreSQL...");
    let db = connect_with_retry(&worker_config)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL successfully");

    if worker_config.run_migrations {
        info!("Running notification migrations...");
        Migrator::up(&db, None)
            .await
            .wrap_err("Failed to run migrations")?;
    }

    let providers = Providers::from_mode(delivery.provider_mode, delivery.email_transport)
        .wrap_err("Failed to initialize notification providers")?;
    // Failed sends are retried, so an unhealthy transport does not stop the worker.
    if !providers.check_health().await {
        warn!("Starting with an unhealthy notification provider");
    }
    let settings = SettingsCache::new(
        Arc::new(PgSettingsSource::new(db.clone())),
        delivery.settings_cache_ttl,
    )
    .with_defaults(Settings {
        max_retries: delivery.default_max_retries,
        ..Settings::default()
    });

    let service = NotificationService::new(
        PgNotificationLog::new(db.clone()),
        providers,
        Arc::new(PgTemplateStore::new(db)),
        Arc::new(settings),
    )
    .with_config(&delivery);
    let manager = RetryManager::new(Arc::new(service), delivery.sweep.clone());

    info!(
        interval_secs = worker_config.sweep_interval.as_secs(),
        batch_limit = manager.config().batch_limit,
        concurrency = manager.config().concurrency,
        "Retry sweep configured"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let mut ticker = tokio::time::interval(worker_config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed sweep leaves its candidates due; the next tick picks them up.
                if let Err(e) = manager.run_once(Utc::now()).await {
                    error!(error = %e, "Retry sweep failed");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("Notifier worker stopped");
    Ok(())
}

async fn connect_with_retry(config: &WorkerConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(&config.database_url);
    options
        .max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let mut delay = Duration::from_millis(500);
    let mut attempt = 1;
    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => return Ok(db),
            Err(e) if attempt < config.connect_attempts => {
                warn!(attempt, error = %e, retry_in = ?delay, "PostgreSQL connection failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        sigterm.recv().await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
