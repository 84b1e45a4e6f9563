use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use workmarket_backend::api::{self, AppState};
use workmarket_backend::cache::{init_cache_pool, CachePoolConfig, RedisCache};
use workmarket_backend::config::AppConfig;
use workmarket_backend::database::{
    config_store_repository::ConfigStoreRepository,
    credit_ledger_repository::CreditLedgerRepository, init_pool_from_config, run_migrations,
    user_repository::UserRepository,
};
use workmarket_backend::health::HealthChecker;
use workmarket_backend::logging::init_tracing;
use workmarket_backend::payments::gateway::VposGatewayClient;
use workmarket_backend::services::correlation::CorrelationSigner;
use workmarket_backend::services::credit_ledger::CreditLedger;
use workmarket_backend::services::exchange_rate::{
    ExchangeRateResolver, ExchangeRateResolverConfig,
};
use workmarket_backend::services::legacy_webhook::LegacyWebhookProcessor;
use workmarket_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use workmarket_backend::services::pending_payments::{
    PendingPaymentStore, RedisPendingPaymentStore,
};
use workmarket_backend::services::rate_cache::{InMemoryRateCache, RateCache, RedisRateCache};
use workmarket_backend::services::rate_providers::default_providers;
use workmarket_backend::workers::pending_payment_sweeper::{
    PendingPaymentSweeper, PendingPaymentSweeperConfig,
};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(config.environment, &config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting credit backend"
    );

    // Database
    info!("Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "Database connection pool initialized"
    );

    if config.database.run_migrations {
        run_migrations(&db_pool).await?;
    }

    // Redis is optional; without it rates cache in process and pending
    // payments live in Postgres.
    let redis_cache = match CachePoolConfig::from_config(&config.cache) {
        Some(pool_config) => {
            info!("Initializing Redis cache connection pool...");
            let pool = init_cache_pool(pool_config).await.map_err(|e| {
                error!("Failed to initialize cache pool: {}", e);
                e
            })?;
            info!("Cache connection pool initialized");
            Some(RedisCache::new(pool))
        }
        None => {
            warn!("REDIS_URL not set; using in-process rate cache and Postgres pending store");
            None
        }
    };

    let (rate_cache, pending_store): (Arc<dyn RateCache>, Arc<dyn PendingPaymentStore>) =
        match &redis_cache {
            Some(cache) => {
                let mut store = RedisPendingPaymentStore::new(cache.clone());
                if let Some(retention) = config.credits.pending_retention() {
                    store = store.with_retention(retention);
                }
                (Arc::new(RedisRateCache::new(cache.clone())), Arc::new(store))
            }
            None => (
                Arc::new(InMemoryRateCache::new()),
                Arc::new(ConfigStoreRepository::new(db_pool.clone())),
            ),
        };

    // Exchange rates
    let mut resolver = ExchangeRateResolver::new(
        rate_cache,
        ExchangeRateResolverConfig {
            cache_ttl: Duration::from_secs(config.credits.rate_cache_ttl_secs),
        },
    );
    for provider in default_providers(Duration::from_secs(
        config.credits.rate_provider_timeout_secs,
    ))? {
        resolver = resolver.add_provider(provider);
    }
    let rates = Arc::new(resolver);
    info!(providers = ?rates.provider_names(), "Exchange rate resolver ready");

    // Gateway
    let gateway_configured = config.gateway.is_configured();
    if !gateway_configured {
        warn!("Payment gateway credentials missing; payment initiation will be refused");
    }
    let gateway = Arc::new(VposGatewayClient::new(config.gateway.clone())?);

    let ledger: Arc<dyn CreditLedger> = Arc::new(CreditLedgerRepository::new(db_pool.clone()));
    let users = Arc::new(UserRepository::new(db_pool.clone()));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway,
        rates.clone(),
        pending_store.clone(),
        ledger.clone(),
        users,
        CorrelationSigner::new(&config.credits.correlation_secret),
        OrchestratorConfig::from_app_config(&config.credits, &config.gateway),
    ));

    let legacy_webhook = Arc::new(LegacyWebhookProcessor::new(
        ledger.clone(),
        config.credits.legacy_webhook_enabled,
    ));

    let mut health_checker = HealthChecker::new(gateway_configured).with_database(db_pool.clone());
    if let Some(cache) = redis_cache.clone() {
        health_checker = health_checker.with_cache(cache);
    }

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.credits.pending_sweep_enabled {
        let sweeper_config = PendingPaymentSweeperConfig::from(&config.credits);
        info!(
            sweep_interval_secs = sweeper_config.sweep_interval.as_secs(),
            retention_secs = sweeper_config.retention.as_secs(),
            "Starting pending payment sweeper"
        );
        let sweeper = PendingPaymentSweeper::new(pending_store, sweeper_config);
        Some(tokio::spawn(sweeper.run(worker_shutdown_rx)))
    } else {
        info!("Pending payment sweeper disabled (PENDING_PAYMENT_SWEEP_ENABLED=false)");
        None
    };

    let app = api::router(AppState {
        orchestrator,
        rates,
        ledger,
        legacy_webhook,
        health_checker,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx))
        .await?;

    if let Some(handle) = sweeper_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Pending payment sweeper exited abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
