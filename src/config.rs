//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at startup by the venue resolver, never stored in the file.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{BracketOrder, Side};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Venue name → venue settings. Empty means the built-in table.
    #[serde(default)]
    pub venues: HashMap<String, VenueConfig>,
    /// Bracket trades to run at startup.
    #[serde(default)]
    pub brackets: Vec<BracketOrder>,
}

/// Defaults applied to every bracket that does not override them.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Route all orders to the in-memory paper venue.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub entry_side: Side,
    #[serde(default = "default_size")]
    pub default_size: Decimal,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            entry_side: Side::Buy,
            default_size: default_size(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Behaviour of the simulated venue used in dry-run mode.
#[derive(Debug, Deserialize, Clone)]
pub struct PaperConfig {
    /// Orders fill on this status poll. `None` keeps them open forever.
    #[serde(default = "default_fill_after_polls")]
    pub fill_after_polls: Option<u32>,
    /// Fee charged on fills, as a fraction of notional.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fill_after_polls: default_fill_after_polls(),
            fee_rate: default_fee_rate(),
        }
    }
}

/// Where log output goes besides stdout.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Plain-text log file. An empty string turns file logging off.
    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

impl LoggingConfig {
    /// Directory and file name of the log file, if one is configured.
    pub fn file_target(&self) -> Option<(PathBuf, String)> {
        let path = Path::new(self.file.trim());
        let name = path.file_name()?.to_str()?.to_string();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Some((dir.to_path_buf(), name))
    }
}

/// One venue the resolver knows about.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VenueConfig {
    /// Gateway-specific venue identifier (e.g. "coinbasepro").
    pub id: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
    #[serde(default)]
    pub api_passphrase_env: Option<String>,
    /// Whether credentials for this venue include a passphrase.
    #[serde(default = "default_true")]
    pub requires_passphrase: bool,
    /// Override for the venue's REST base URL.
    #[serde(default)]
    pub rest_url: Option<String>,
}

impl VenueConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            api_key_env: None,
            api_secret_env: None,
            api_passphrase_env: None,
            requires_passphrase: true,
            rest_url: None,
        }
    }

    pub fn key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", self.id.to_uppercase()))
    }

    pub fn secret_env(&self) -> String {
        self.api_secret_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_SECRET", self.id.to_uppercase()))
    }

    pub fn passphrase_env(&self) -> String {
        self.api_passphrase_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_PASSPHRASE", self.id.to_uppercase()))
    }
}

/// The venues available when the config file lists none.
pub fn default_venues() -> HashMap<String, VenueConfig> {
    [
        ("coinbase", "coinbasepro"),
        ("binance", "binanceus"),
        ("bybit", "bybit"),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), VenueConfig::new(id)))
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_size() -> Decimal {
    dec!(0.01)
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_fill_after_polls() -> Option<u32> {
    Some(3)
}

fn default_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_log_file() -> String {
    "trade.log".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Configured venues, falling back to the built-in table.
    pub fn venue_table(&self) -> HashMap<String, VenueConfig> {
        if self.venues.is_empty() {
            default_venues()
        } else {
            self.venues.clone()
        }
    }
}
