//! services/api/src/bin/seed_mentions.rs
//!
//! Rebuilds mention counts from guides that already exist. Every card with a
//! guide is scanned once and each distinct card it references gains one
//! mention, the same rule applied to live submissions. Running it twice
//! counts everything twice; it is meant for a fresh histogram. Guides are
//! read in pages of `SEED_BATCH_SIZE` cards.

use api_lib::{
    config::Config,
    error::ApiError,
    guide::{GuideSettings, MentionIndex},
    startup::{connect_stores, init_tracing, load_catalog},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    // Optional cap on cards visited; every guided card otherwise.
    let limit = match std::env::args().nth(1) {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|e| ApiError::Internal(format!("Invalid scan limit '{}': {}", raw, e)))?,
        ),
        None => None,
    };

    let catalog = Arc::new(load_catalog(&config)?);
    let stores = connect_stores(&config).await?;
    let index = MentionIndex::new(stores.clone(), catalog, GuideSettings::from(&config));

    let report = index.seed_from_guides(limit).await?;
    let entries = stores.mentions.count_entries().await?;
    info!(
        guides = report.guides_scanned,
        failed = report.failed,
        incremented = report.mentions.incremented,
        unresolved = report.mentions.unresolved,
        queued = report.mentions.queued,
        entries,
        "Seeding complete"
    );
    Ok(())
}
