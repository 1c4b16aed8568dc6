//! factory-billing - subscription and entitlement service
//!
//! Serves the billing API, consumes provider webhooks in the background and
//! runs the periodic reconciliation sweep.

use std::sync::Arc;

use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use factory_billing::adapters::http::billing_router;
use factory_billing::adapters::postgres::{
    PostgresProductionActivityReader, PostgresSubscriptionRepository,
    PostgresWebhookEventRepository, MIGRATOR,
};
use factory_billing::adapters::stripe::{PriceTable, StripeConfig, StripePaymentAdapter};
use factory_billing::bootstrap::{assemble, BillingComponents, BillingOptions};
use factory_billing::config::AppConfig;
use factory_billing::domain::billing::PlanCatalog;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        environment = ?config.server.environment,
        stripe_test_mode = config.payment.is_test_mode(),
        "Starting factory-billing"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        MIGRATOR.run(&pool).await?;
        tracing::info!("Migrations applied");
    }

    let catalog = match &config.billing.catalog_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading plan catalog");
            PlanCatalog::from_yaml_file(path)?
        }
        None => PlanCatalog::standard(),
    };

    let prices = PriceTable::from_keys(config.payment.prices.iter())?;
    let mut stripe_config = StripeConfig::new(
        SecretString::new(config.payment.stripe_api_key.clone()),
        SecretString::new(config.payment.stripe_webhook_secret.clone()),
        prices,
    )
    .with_timeout(config.payment.provider_timeout());
    if let Some(url) = &config.payment.api_base_url {
        stripe_config = stripe_config.with_base_url(url);
    }
    let provider = StripePaymentAdapter::new(stripe_config)?;

    let runtime = assemble(
        BillingComponents {
            subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
            ledger: Arc::new(PostgresWebhookEventRepository::new(pool.clone())),
            activity: Arc::new(PostgresProductionActivityReader::new(pool.clone())),
            provider: Arc::new(provider),
            catalog: Arc::new(catalog),
        },
        BillingOptions::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn(runtime.worker.run(shutdown_rx.clone()));
    let sweep = runtime.sweep;
    let sweep_rx = shutdown_rx.clone();
    let sweep_handle = tokio::spawn(async move { sweep.run(sweep_rx).await });

    let app = billing_router(runtime.state).layer(
        tower_http::timeout::TimeoutLayer::new(config.server.request_timeout()),
    );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining background work");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Webhook worker panicked");
    }
    if let Err(e) = sweep_handle.await {
        tracing::error!(error = %e, "Reconciliation sweep panicked");
    }
    pool.close().await;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
