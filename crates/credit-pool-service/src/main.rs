//! Credit pool service binary.

use std::sync::Arc;

use credit_pool_service::{create_router, AppState, RetryPolicy, ServiceConfig, SystemClock};
use credit_pool_settlement::{HttpSettlementClient, SettlementOptions};
use credit_pool_store::{MemoryStore, Store};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_pool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Credit Pool Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        admin_configured = %config.admin_api_key.is_some(),
        settlement_url = %config.settlement.url,
        async_settlement = %config.settlement.async_dispatch,
        max_attempts = config.retry.max_attempts,
        "Service configuration loaded"
    );

    if !config.settlement.async_dispatch {
        let worst_case = RetryPolicy::from(&config.retry).worst_case(config.settlement.timeout);
        let deadline = config.inline_settlement_deadline();
        if worst_case > deadline {
            tracing::warn!(
                worst_case_secs = worst_case.as_secs(),
                deadline_secs = deadline.as_secs(),
                "Inline settlement retries can outlast the request; late outcomes answer 202"
            );
        }
    }

    let store = open_store(&config).await?;

    let gateway = HttpSettlementClient::with_options(
        config.settlement.url.clone(),
        config.settlement.token.clone(),
        SettlementOptions {
            timeout: config.settlement.timeout,
        },
    )?;

    // Build app state
    let state = AppState::new(
        Arc::clone(&store),
        Arc::new(gateway),
        Arc::new(SystemClock),
        config.clone(),
    );

    if let Some(dispatcher) = &state.dispatcher {
        dispatcher.recover_queued(store.as_ref()).await?;
    }

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = credit_pool_store::PgStore::connect(url, 10).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }
    tracing::warn!("DATABASE_URL not set - using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL set but PostgreSQL support is not compiled in");
    }
    Ok(Arc::new(MemoryStore::new()))
}
