use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use loyalty_core::{
    BalanceEngine, HttpAccrualClient, LedgerStore, MemoryStore, Metrics, OrderLedger,
    PollerConfig, PostgresStore, ReconciliationPoller,
};
use loyalty_gateway::{
    config::{log_directive, Config},
    handlers, AppState,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let directive = log_directive(&config.log_level).map_err(anyhow::Error::msg)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    if !config.uses_database() {
        warn!("No database URI configured, using in-memory storage");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PostgresStore::connect(
        &config.database.uri,
        config.database.max_connections,
        config.acquire_timeout(),
    )
    .await
    .context("Failed to connect to database")?;

    if config.database.auto_migrate {
        store.migrate().await.context("Failed to apply schema")?;
    }

    Ok(Arc::new(store))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().map_err(anyhow::Error::msg)?;

    init_tracing(&config)?;

    info!("Starting Loyalty Gateway...");

    let store = open_store(&config).await?;
    let metrics = Metrics::new()?;
    let ledger = OrderLedger::new(store.clone(), metrics.clone());
    let balance = BalanceEngine::new(store, metrics.clone());

    // Start reconciliation poller
    let poller = if config.poller.enabled {
        let oracle = HttpAccrualClient::new(&config.accrual.address, config.accrual_timeout())?;
        info!(oracle = %oracle.base_url(), "Accrual oracle client initialized");

        let poller = ReconciliationPoller::new(
            ledger.clone(),
            Arc::new(oracle),
            PollerConfig {
                interval: config.poll_interval(),
                call_timeout: config.accrual_timeout(),
            },
        );
        Some(poller.spawn())
    } else {
        warn!("Reconciliation poller disabled");
        None
    };

    // Start HTTP server
    let state = web::Data::new(AppState {
        ledger,
        balance,
        metrics,
        identity_header: config.server.identity_header.clone(),
        request_timeout: config.request_timeout(),
    });

    info!("Starting HTTP server on {}", config.server.address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind(config.server.address.as_str())
    .with_context(|| format!("Failed to bind {}", config.server.address))?
    .run()
    .await?;

    if let Some(handle) = poller {
        handle.shutdown().await;
    }

    info!("Loyalty Gateway stopped");
    Ok(())
}
