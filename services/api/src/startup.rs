//! services/api/src/startup.rs
//!
//! Startup steps shared by the server and the maintenance binaries: logging,
//! the section catalog and the store backend.

use crate::adapters::{import_cards, load_cards_file, DbAdapter, MemoryStore};
use crate::config::{Config, StoreBackend};
use crate::error::ApiError;
use crate::guide::Stores;
use guide_core::SectionCatalog;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// The built-in catalog, or the TOML file named by `TIERS_PATH`.
pub fn load_catalog(config: &Config) -> Result<SectionCatalog, ApiError> {
    match &config.tiers_path {
        Some(path) => {
            info!(path = %path.display(), "Loading section catalog");
            Ok(SectionCatalog::from_path(path)?)
        }
        None => Ok(SectionCatalog::builtin()),
    }
}

/// Connects the configured backend, running migrations for Postgres and
/// importing `CARDS_SEED_PATH` when it is set.
pub async fn connect_stores(config: &Config) -> Result<Stores, ApiError> {
    let stores = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let adapter = Arc::new(DbAdapter::new(pool));
            info!("Running database migrations...");
            adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Stores::from_backend(adapter)
        }
        StoreBackend::Memory => {
            info!("Using in-memory stores; nothing will persist across restarts.");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    if let Some(path) = &config.cards_seed_path {
        let cards = load_cards_file(path)?;
        import_cards(stores.cards.as_ref(), &cards).await?;
    }
    Ok(stores)
}
