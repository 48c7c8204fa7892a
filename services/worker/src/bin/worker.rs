//! services/worker/src/bin/worker.rs

use anyhow::Context;
use clap::Parser;
use guide_core::{ModelProvider, SectionCatalog};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_lib::{
    adapters::{ClaudeAdapter, DiscordNotifier, GeminiAdapter, GuideApiClient, OllamaAdapter},
    config::WorkerConfig,
    generator::SectionGenerator,
    worker_loop::WorkerLoop,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration & Set Up Logging ---
    dotenvy::dotenv().ok();
    let config = WorkerConfig::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- 2. Load the Section Catalog ---
    let catalog = match &config.tiers_path {
        Some(path) => SectionCatalog::from_path(path)
            .with_context(|| format!("loading section catalog {}", path.display()))?,
        None => SectionCatalog::builtin(),
    };
    let tier = catalog.tier(&config.tier)?;

    // --- 3. Initialize Model Backends ---
    let generation_timeout = config.generation_timeout()?;
    let mut generator = SectionGenerator::new(generation_timeout, config.min_section_chars)
        .with_backend(Arc::new(OllamaAdapter::new(&config.ollama_url)));
    if let Some(key) = &config.gemini_api_key {
        generator = generator.with_backend(Arc::new(GeminiAdapter::new(key.clone(), generation_timeout)?));
    }
    if let Some(key) = &config.anthropic_api_key {
        generator = generator.with_backend(Arc::new(ClaudeAdapter::new(key.clone(), generation_timeout)?));
    }
    for spec in &tier.sections {
        if !generator.has_backend(spec.model.provider) {
            warn!(section = %spec.key, model = %spec.model,
                  "No backend for this section's provider; it will be skipped");
        }
    }
    let providers: Vec<ModelProvider> = tier.sections.iter().map(|s| s.model.provider).collect();
    info!(tier = %tier.name, sections = tier.total(), ?providers, "Tier loaded");

    // --- 4. Wire the Loop ---
    let source = Arc::new(GuideApiClient::new(
        &config.api_base_url,
        config.lang.clone(),
        config.request_timeout()?,
    )?);
    let settings = config.loop_settings()?;
    let mut worker = WorkerLoop::new(source, generator, Arc::new(catalog.clone()), settings);
    if let Some(webhook) = &config.discord_webhook_url {
        worker = worker.with_notifier(Arc::new(DiscordNotifier::new(
            webhook.clone(),
            config.site_url.clone(),
        )?));
        info!("Discord notifications enabled");
    }

    // --- 5. Run Until Ctrl-C ---
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested; finishing the current call");
        }
        signal.cancel();
    });

    info!(api = %config.api_base_url, "Worker starting");
    let summary = worker.run(shutdown).await;
    info!(
        cards = summary.cards_processed,
        submitted = summary.sections_submitted,
        failed = summary.sections_failed,
        "Worker finished"
    );
    Ok(())
}
