//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which implementation backs the card, priority and mention stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("'{}' is not a known store backend", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    /// Required for the Postgres backend only.
    pub database_url: Option<String>,
    pub log_level: Level,
    /// Tier used for the "needs work" filter and for auto-discovery.
    pub default_tier: String,
    pub work_lang: String,
    /// Cards read per page when seeding the mention histogram.
    pub seed_batch_size: usize,
    /// Mention count at which a card is auto-queued. `0` disables auto-discovery.
    pub auto_queue_mentions: i64,
    pub tiers_path: Option<PathBuf>,
    /// Optional JSON file of cards loaded into the memory backend at startup.
    pub cards_seed_path: Option<PathBuf>,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store_backend: StoreBackend::Memory,
            database_url: None,
            log_level: Level::INFO,
            default_tier: guide_core::HALF_TIER.to_string(),
            work_lang: "en".to_string(),
            seed_batch_size: 500,
            auto_queue_mentions: 3,
            tiers_path: None,
            cards_seed_path: None,
            cors_origin: None,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // --- Load Server and Store Settings ---
        let bind_address = match lookup("BIND_ADDRESS") {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
            })?,
            None => defaults.bind_address,
        };

        let store_backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw
                .parse::<StoreBackend>()
                .map_err(|e| ConfigError::InvalidValue("STORE_BACKEND".to_string(), e))?,
            None => StoreBackend::Postgres,
        };

        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Work Selection Settings ---
        let default_tier = lookup("DEFAULT_TIER").unwrap_or(defaults.default_tier);
        let work_lang = lookup("WORK_LANG").unwrap_or(defaults.work_lang);
        let seed_batch_size = parse_number(&lookup, "SEED_BATCH_SIZE", defaults.seed_batch_size)?;
        if seed_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "SEED_BATCH_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let auto_queue_mentions =
            parse_number(&lookup, "AUTO_QUEUE_MENTIONS", defaults.auto_queue_mentions)?;
        if auto_queue_mentions < 0 {
            return Err(ConfigError::InvalidValue(
                "AUTO_QUEUE_MENTIONS".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let tiers_path = lookup("TIERS_PATH").map(PathBuf::from);
        let cards_seed_path = lookup("CARDS_SEED_PATH").map(PathBuf::from);
        let cors_origin = lookup("CORS_ORIGIN").filter(|s| !s.trim().is_empty());

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            default_tier,
            work_lang,
            seed_batch_size,
            auto_queue_mentions,
            tiers_path,
            cards_seed_path,
            cors_origin,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "DATABASE_URL"));
    }

    #[test]
    fn memory_backend_uses_defaults() {
        let config = Config::from_lookup(lookup(&[("STORE_BACKEND", "memory")])).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.default_tier, "half");
        assert_eq!(config.work_lang, "en");
        assert_eq!(config.seed_batch_size, 500);
        assert_eq!(config.auto_queue_mentions, 3);
        assert_eq!(config.bind_address.port(), 3000);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("SEED_BATCH_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "SEED_BATCH_SIZE"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/guides"),
            ("DEFAULT_TIER", "full"),
            ("AUTO_QUEUE_MENTIONS", "0"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
        ]))
        .unwrap();
        assert_eq!(config.default_tier, "full");
        assert_eq!(config.auto_queue_mentions, 0);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/guides"));
        assert_eq!(config.bind_address.port(), 8080);
    }
}
