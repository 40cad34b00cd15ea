use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use entity_store::api::handlers::AppState;
use entity_store::api::routes::create_router;
use entity_store::config::Config;
use entity_store::services::TenantRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (reads .env first)
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting server on {}", config.server_address());

    // Default tenant database with its catalog tables
    let tenants = TenantRegistry::bootstrap(&config.tenant).await.map_err(|e| {
        error!("Failed to open default tenant: {}", e);
        e
    })?;

    let state = AppState::new(config.clone(), Arc::new(tenants));
    let app = create_router(state);

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("invalid server address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
