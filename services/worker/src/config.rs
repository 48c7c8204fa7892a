//! services/worker/src/config.rs
//!
//! Command-line configuration for the worker. Every flag can also come from
//! the environment, which is how the worker is usually deployed.

use crate::error::WorkerError;
use crate::worker_loop::LoopSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "worker", about = "Generates card guide sections and submits them to the guide API")]
pub struct WorkerConfig {
    /// Base URL of the guide API.
    #[arg(long, env = "GUIDE_API_URL", default_value = "http://localhost:3000")]
    pub api_base_url: String,

    /// Guide tier to fill.
    #[arg(long, env = "GUIDE_TIER", default_value = guide_core::HALF_TIER)]
    pub tier: String,

    /// Only ask for cards in this language. The API default applies when unset.
    #[arg(long, env = "WORK_LANG")]
    pub lang: Option<String>,

    /// Stop after this many cards.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Pause between section generations, for backend rate limits.
    #[arg(long, env = "SECTION_DELAY_SECS", default_value_t = 1.0)]
    pub section_delay_secs: f64,

    #[arg(long, env = "CARD_DELAY_SECS", default_value_t = 2.0)]
    pub card_delay_secs: f64,

    /// Sleep after a "no work" answer or a failed fetch.
    #[arg(long, env = "IDLE_BACKOFF_SECS", default_value_t = 60.0)]
    pub idle_backoff_secs: f64,

    /// How long a card that produced no sections is passed over when it is
    /// handed out again.
    #[arg(long, env = "STALL_COOLDOWN_SECS", default_value_t = 600.0)]
    pub stall_cooldown_secs: f64,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 300.0)]
    pub generation_timeout_secs: f64,

    /// Timeout for calls to the guide API.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60.0)]
    pub request_timeout_secs: f64,

    /// Generated sections shorter than this are discarded.
    #[arg(long, env = "MIN_SECTION_CHARS", default_value_t = 50)]
    pub min_section_chars: usize,

    /// TOML section catalog. Must match the API's catalog.
    #[arg(long, env = "TIERS_PATH")]
    pub tiers_path: Option<PathBuf>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, env = "DISCORD_WEBHOOK_URL", hide_env_values = true)]
    pub discord_webhook_url: Option<String>,

    /// Public site used for card links in notifications.
    #[arg(long, env = "SITE_URL")]
    pub site_url: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl WorkerConfig {
    pub fn loop_settings(&self) -> Result<LoopSettings, WorkerError> {
        Ok(LoopSettings {
            tier: self.tier.clone(),
            limit: self.limit,
            section_delay: seconds("section-delay-secs", self.section_delay_secs)?,
            card_delay: seconds("card-delay-secs", self.card_delay_secs)?,
            idle_backoff: seconds("idle-backoff-secs", self.idle_backoff_secs)?,
            stall_cooldown: seconds("stall-cooldown-secs", self.stall_cooldown_secs)?,
        })
    }

    pub fn generation_timeout(&self) -> Result<Duration, WorkerError> {
        positive("generation-timeout-secs", self.generation_timeout_secs)
    }

    pub fn request_timeout(&self) -> Result<Duration, WorkerError> {
        positive("request-timeout-secs", self.request_timeout_secs)
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration, WorkerError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| WorkerError::Config(format!("--{}: {}", flag, e)))
}

fn positive(flag: &str, value: f64) -> Result<Duration, WorkerError> {
    let duration = seconds(flag, value)?;
    if duration.is_zero() {
        return Err(WorkerError::Config(format!("--{} must be greater than zero", flag)));
    }
    Ok(duration)
}
