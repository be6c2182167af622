use std::env;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use crate::config::confidence::ConfidenceProfile;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error("{0} must be at least 16 characters")]
    SecretTooShort(&'static str),
}

/// Startup configuration, assembled once from the process environment.
/// Fatal config errors (missing encryption secret, unparseable endpoint)
/// refuse to start rather than limping along with a default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub capital: Decimal,
    pub profile: ConfidenceProfile,
    pub dry_run: bool,
    pub auto_execute: bool,
    pub key_encryption_secret: String,
    pub rpc_url: String,
    pub bundle_url: String,
    pub dex_quote_url: String,
    pub database_url: String,
    pub max_daily_drawdown_pct: Decimal,
    pub max_position_size_pct: Decimal,
    pub max_consecutive_losses: u32,
    pub lockdown_hours: i64,
    pub websocket_url: String,
    pub grpc_url: Option<String>,
    pub monitored_program_ids: Vec<String>,
    pub watched_accounts: Vec<String>,
    pub tip_accounts: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let capital = parse_decimal("CAPITAL", "1000")?;
        let profile = match env::var("PROFILE").unwrap_or_else(|_| "Moderate".into()).as_str() {
            "Conservative" => ConfidenceProfile::Conservative,
            "Moderate" => ConfidenceProfile::Moderate,
            "Aggressive" => ConfidenceProfile::Aggressive,
            other => return Err(ConfigError::Invalid("PROFILE", other.to_string())),
        };
        let dry_run = parse_bool("DRY_RUN", true);
        let auto_execute = parse_bool("AUTO_EXECUTE", false);

        let key_encryption_secret = env::var("KEY_ENCRYPTION_SECRET")
            .map_err(|_| ConfigError::Missing("KEY_ENCRYPTION_SECRET"))?;
        if key_encryption_secret.len() < 16 {
            return Err(ConfigError::SecretTooShort("KEY_ENCRYPTION_SECRET"));
        }

        let rpc_url = env::var("RPC_URL").map_err(|_| ConfigError::Missing("RPC_URL"))?;
        let bundle_url = env::var("BUNDLE_URL").map_err(|_| ConfigError::Missing("BUNDLE_URL"))?;
        let dex_quote_url = env::var("DEX_QUOTE_URL").map_err(|_| ConfigError::Missing("DEX_QUOTE_URL"))?;
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let max_daily_drawdown_pct = parse_decimal("MAX_DAILY_DRAWDOWN_PCT", "0.10")?;
        let max_position_size_pct = parse_decimal("MAX_POSITION_SIZE_PCT", "0.05")?;
        let max_consecutive_losses = parse_u32("MAX_CONSECUTIVE_LOSSES", 3)?;
        let lockdown_hours = parse_i64("LOCKDOWN_HOURS", 24)?;

        let websocket_url = env::var("WEBSOCKET_URL").map_err(|_| ConfigError::Missing("WEBSOCKET_URL"))?;
        let grpc_url = env::var("GRPC_URL").ok();
        let monitored_program_ids = parse_csv("MONITORED_PROGRAM_IDS");
        let watched_accounts = parse_csv("WATCHED_ACCOUNTS");
        let tip_accounts = parse_csv("TIP_ACCOUNTS");

        info!(?profile, %dry_run, %auto_execute, "configuration loaded");

        Ok(Self {
            capital,
            profile,
            dry_run,
            auto_execute,
            key_encryption_secret,
            rpc_url,
            bundle_url,
            dex_quote_url,
            database_url,
            max_daily_drawdown_pct,
            max_position_size_pct,
            max_consecutive_losses,
            lockdown_hours,
            websocket_url,
            grpc_url,
            monitored_program_ids,
            watched_accounts,
            tip_accounts,
        })
    }
}

fn parse_csv(key: &'static str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn parse_decimal(key: &'static str, default: &str) -> Result<Decimal, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid(key, raw))
}

fn parse_u32(key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &'static str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
