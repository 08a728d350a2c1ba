//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{MemoryIdentityProvider, PgDocumentStore, PgIdentityProvider},
    config::{Config, StoreBackend},
    error::ApiError,
    web::{router, state::AppState},
};
use chrono::Duration;
use sapt_core::ports::{DocumentStore, IdentityProvider};
use sapt_core::MemoryStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Backends = (Arc<dyn DocumentStore>, Arc<dyn IdentityProvider>);

async fn connect_backends(config: &Config) -> Result<Backends, ApiError> {
    let session_ttl = Duration::days(config.session_ttl_days);
    match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await?;
            let store = PgDocumentStore::new(db_pool.clone());
            info!("Running database migrations...");
            store.run_migrations().await?;
            info!("Database migrations complete.");
            Ok((Arc::new(store), Arc::new(PgIdentityProvider::new(db_pool, session_ttl))))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory backend; all data is lost on shutdown.");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryIdentityProvider::new(session_ttl))))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Store and Identity Backends ---
    let (store, identity) = connect_backends(&config).await?;

    // --- 3. Build the Shared AppState and Router ---
    let app_state = Arc::new(AppState::new(store, identity, config.clone()));
    let app = router(app_state)?;

    // --- 4. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
