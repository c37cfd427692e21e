//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (derivation keys, bot tokens) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`. Each
//! component receives the immutable slice of config it needs at
//! construction — there is no global settings singleton.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub game: GameConfig,
    pub deposits: DepositsConfig,
    pub withdrawals: WithdrawalsConfig,
    pub reconciliation: ReconciliationConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Round and betting parameters. Settlement is single-asset per
/// deployment: every bet locks and pays out in the configured
/// (settlement_asset, settlement_network) pair, even though balances
/// themselves are keyed per (asset, network).
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    /// Price symbols to run rounds for, e.g. ["BTCUSDT"].
    pub asset_symbols: Vec<String>,
    pub settlement_asset: String,
    pub settlement_network: String,
    /// How long the betting window stays open.
    pub round_duration_secs: u64,
    /// Delay between lock and settlement.
    pub settle_delay_secs: u64,
    /// Driver poll cadence.
    pub poll_interval_secs: u64,
    /// House rake as a percentage of the total pool, e.g. 4.0.
    pub rake_percentage: Decimal,
    pub min_bet: Decimal,
    pub max_bet: Decimal,
}

impl GameConfig {
    /// Rake as a fraction of the pool (4.0% → 0.04).
    pub fn rake_fraction(&self) -> Decimal {
        self.rake_percentage / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepositsConfig {
    /// House wallet receiving memo-tagged deposits.
    pub house_wallet_address: String,
    pub memo_expiry_minutes: i64,
    /// Observed amount may differ from the expected amount by this much.
    pub amount_tolerance: Decimal,
    pub scan_interval_secs: u64,
    /// Supported (asset, network) pairs for address-based deposits.
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// One derivable (asset, network) pair. The hierarchical root key is a
/// secret and lives in the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub asset: String,
    pub network: String,
    pub root_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WithdrawalsConfig {
    pub min_amount: Decimal,
    /// Requests at or above this amount need manual review.
    pub auto_limit: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
