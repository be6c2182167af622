use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as Json;
use uuid::Uuid;

/// Row shape of `tx_events`, converted to/from [`crate::core::types::ChainEvent`]
/// at the `store::relational` boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TxEventRow {
    pub wallet_address: String,
    pub program_id: Option<String>,
    pub tx_hash: String,
    pub slot: i64,
    pub event_time: DateTime<Utc>,
    pub action: String,
    pub amount_in: Option<Decimal>,
}

/// Row shape of `tracked_wallets`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackedWalletRow {
    pub address: String,
    pub category: String,
    pub confidence: f64,
    pub metadata: Json,
}

/// A wallet tracked as `category = 'fresh_wallet'` and its first observed
/// funding transaction, joined from `tracked_wallets` and `tx_events`. This
/// is the candidate pool the matcher scores against, distinct from
/// `FreshClusterRow` which is the matcher's own persisted *output*.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FreshWalletCandidateRow {
    pub address: String,
    pub first_funded_tx: String,
    pub first_funded_amount: Decimal,
    pub first_funded_time: DateTime<Utc>,
    pub tx_count: i64,
}

/// Row shape of `fresh_clusters` (the FreshWalletMatcher's persisted output).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FreshClusterRow {
    pub cex_source: String,
    pub withdrawal_tx: String,
    pub withdrawal_time: DateTime<Utc>,
    pub amount: Decimal,
    pub decimals: i16,
    pub target_wallet: String,
    pub target_tx_count: i32,
    pub time_delta_ms: i64,
    pub match_score: f64,
    pub linked_parent: Option<String>,
}

/// Row shape of `sim_results`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimResultRow {
    pub token_mint: String,
    pub program_id: Option<String>,
    pub sim_time: DateTime<Utc>,
    pub buy_success: bool,
    pub sell_success: bool,
    pub buy_error: Option<String>,
    pub sell_error: Option<String>,
    pub is_honeypot: bool,
    pub notes: Option<String>,
    pub buy_tax: Decimal,
    pub sell_tax: Decimal,
    pub risk_classification: String,
}

/// Row shape of the singleton `circuit_breaker_state` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CircuitBreakerRow {
    pub id: i32,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_reason: Option<String>,
    pub unlock_at: Option<DateTime<Utc>>,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub consecutive_losses: i32,
    pub open_position_count: i32,
    pub total_exposure: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of `sub_wallets`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubWalletRow {
    pub wallet_id: Uuid,
    pub address: String,
    pub encrypted_key: String,
    pub balance_sol: Decimal,
    pub is_active: bool,
    pub is_retired: bool,
    pub total_trades: i32,
    pub last_used: Option<DateTime<Utc>>,
}

/// Row shape of `trade_log`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeLogRow {
    pub trade_id: Uuid,
    pub signal_source: String,
    pub signal_id: Uuid,
    pub token_mint: String,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub position_size: Decimal,
    pub position_size_sol: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_tier: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub pnl_percentage: Option<Decimal>,
    pub fees_paid: Decimal,
    pub status: String,
    pub failure_reason: Option<String>,
    pub sub_wallet_address: String,
    pub slippage_expected: Option<Decimal>,
    pub slippage_actual: Option<Decimal>,
}

/// Row shape of `signal_attribution`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SignalAttributionRow {
    pub source_id: String,
    pub source_type: String,
    pub source_name: Option<String>,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub total_pnl: Decimal,
    pub avg_pnl_percentage: Decimal,
    pub win_rate: f64,
    pub best_trade_pnl: Option<Decimal>,
    pub worst_trade_pnl: Option<Decimal>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

/// Row shape of `trade_forensics`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeForensicsRow {
    pub forensic_id: Uuid,
    pub trade_id: Uuid,
    pub failure_category: String,
    pub detected_at: DateTime<Utc>,
    pub details: Json,
    pub was_simulation_run: bool,
    pub simulation_result: Option<String>,
    pub time_since_simulation: Option<i64>,
    pub expected_output: Option<Decimal>,
    pub actual_output: Option<Decimal>,
    pub slippage_pct: Option<Decimal>,
    pub signal_confidence: Option<f64>,
}
