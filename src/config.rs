//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

/// Settings consumed by the aggregation core itself.
#[derive(Debug, Deserialize, Clone)]
pub struct CoreConfig {
    /// Fraction of a bonus bet's face value realised as cash, in (0, 1].
    #[serde(default = "default_retention")]
    pub retention_factor: f64,
    /// Per-source fetch budget.
    #[serde(default = "default_timeout")]
    pub fetch_timeout_secs: u64,
    /// Source whose lay prices supply win/place probabilities.
    #[serde(default = "default_exchange")]
    pub exchange_source: String,
    /// Promo type: "2/3", "free_hit" or "bonus".
    #[serde(default = "default_promo")]
    pub promo: String,
}

fn default_retention() -> f64 {
    0.70
}

fn default_timeout() -> u64 {
    5
}

fn default_exchange() -> String {
    "betfair".to_string()
}

fn default_promo() -> String {
    "2/3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub betfair: BetfairConfig,
    pub sportsbet: BookieConfig,
    pub pointsbet: BookieConfig,
    pub amused: BookieConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BetfairConfig {
    pub enabled: bool,
    /// Env var holding the Betfair EDS application key.
    pub app_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookieConfig {
    pub enabled: bool,
}

/// Runner-name normalization and race-matching knobs.
///
/// Bookmaker formatting drifts independently of logic changes, so
/// the strip lists live in config rather than code.
#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Tolerance when matching races across sources by start time.
    #[serde(default = "default_tolerance")]
    pub time_tolerance_secs: i64,
    /// Literal prefixes stripped from runner names before comparison.
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
    /// Literal suffixes stripped from runner names before comparison.
    #[serde(default)]
    pub strip_suffixes: Vec<String>,
}

fn default_tolerance() -> i64 {
    300
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            time_tolerance_secs: default_tolerance(),
            strip_prefixes: Vec::new(),
            strip_suffixes: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.core.retention_factor <= 0.0 || config.core.retention_factor > 1.0 {
            anyhow::bail!(
                "retention_factor must be in (0, 1], got {}",
                config.core.retention_factor
            );
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
