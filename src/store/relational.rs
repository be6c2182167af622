use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::types::*;
use crate::store::models::*;

const MIN_POOL_CONNECTIONS: u32 = 2;
const MAX_POOL_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("row not found")]
    NotFound,
}

/// Async Postgres-backed adapter shared by every component that needs
/// durable state. Owns one pool; components never open their own
/// connections and never hold a transaction open across an `.await` on
/// another component.
#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(MIN_POOL_CONNECTIONS)
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        info!(min = MIN_POOL_CONNECTIONS, max = MAX_POOL_CONNECTIONS, "relational store connected");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -- tx_events ---------------------------------------------------

    /// `amount_in` is the amount received *into* `event.wallet` by this
    /// transaction, when known (a funding transfer); `None` for events that
    /// don't move balance into the wallet. This is what the fresh-wallet
    /// candidate join in [`Self::fresh_wallet_candidates`] matches against.
    pub async fn record_tx_event(&self, event: &ChainEvent, amount_in: Option<Decimal>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tx_events (wallet_address, program_id, tx_hash, slot, event_time, action, amount_in)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT DO NOTHING",
        )
        .bind(&event.wallet)
        .bind(&event.program_id)
        .bind(&event.tx_id)
        .bind(event.slot as i64)
        .bind(event.timestamp)
        .bind(format!("{:?}", event.kind))
        .bind(amount_in)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_processed_tx(&self, tx_hash: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM tx_events WHERE tx_hash = $1 LIMIT 1")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // -- tracked_wallets ----------------------------------------------

    pub async fn tracked_wallet(&self, address: &str) -> Result<Option<TrackedWalletRow>, StoreError> {
        let row = sqlx::query_as::<_, TrackedWalletRow>(
            "SELECT address, category, confidence, metadata FROM tracked_wallets WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn all_tracked_wallets(&self) -> Result<Vec<TrackedWalletRow>, StoreError> {
        let rows = sqlx::query_as::<_, TrackedWalletRow>(
            "SELECT address, category, confidence, metadata FROM tracked_wallets",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn bump_wallet_confidence(&self, address: &str, delta: f64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tracked_wallets SET confidence = LEAST(1.0, confidence + $2) WHERE address = $1",
        )
        .bind(address)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- fresh_clusters -------------------------------------------------

    #[instrument(skip(self))]
    pub async fn insert_fresh_cluster(&self, row: &FreshClusterRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fresh_clusters
             (cex_source, withdrawal_tx, withdrawal_time, amount, decimals, target_wallet,
              target_tx_count, time_delta_ms, match_score, linked_parent)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
             ON CONFLICT (withdrawal_tx) DO NOTHING",
        )
        .bind(&row.cex_source)
        .bind(&row.withdrawal_tx)
        .bind(row.withdrawal_time)
        .bind(row.amount)
        .bind(row.decimals)
        .bind(&row.target_wallet)
        .bind(row.target_tx_count)
        .bind(row.time_delta_ms)
        .bind(row.match_score)
        .bind(&row.linked_parent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Wallets tracked as `category = 'fresh_wallet'` whose first funding
    /// transaction landed within `[t, t + window_secs]` and whose amount
    /// falls within `[lo, hi]`, capped at `limit`. Mirrors the original
    /// matcher's `tracked_wallets` ⋈ `tx_events` query: candidates come
    /// from observed chain activity, not from the matcher's own output
    /// table (`fresh_clusters`, which is empty until a match has already
    /// been made).
    pub async fn fresh_wallet_candidates(
        &self,
        t: DateTime<Utc>,
        window_secs: i64,
        lo: Decimal,
        hi: Decimal,
        limit: i64,
    ) -> Result<Vec<FreshWalletCandidateRow>, StoreError> {
        let until = t + chrono::Duration::seconds(window_secs);
        let rows = sqlx::query_as::<_, FreshWalletCandidateRow>(
            "SELECT
                w.address AS address,
                t.tx_hash AS first_funded_tx,
                t.amount_in AS first_funded_amount,
                t.event_time AS first_funded_time,
                COUNT(*) OVER (PARTITION BY w.address) AS tx_count
             FROM tracked_wallets w
             JOIN tx_events t ON w.address = t.wallet_address
             WHERE w.category = 'fresh_wallet'
               AND t.event_time BETWEEN $1 AND $2
               AND t.amount_in BETWEEN $3 AND $4
             ORDER BY t.event_time ASC
             LIMIT $5",
        )
        .bind(t)
        .bind(until)
        .bind(lo)
        .bind(hi)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- sim_results -------------------------------------------------

    pub async fn upsert_sim_result(&self, result: &SimulationResult) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sim_results
             (token_mint, sim_time, buy_success, sell_success, is_honeypot, buy_tax, sell_tax, risk_classification)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
             ON CONFLICT (token_mint) DO UPDATE SET
               sim_time = EXCLUDED.sim_time,
               buy_success = EXCLUDED.buy_success,
               sell_success = EXCLUDED.sell_success,
               is_honeypot = EXCLUDED.is_honeypot,
               buy_tax = EXCLUDED.buy_tax,
               sell_tax = EXCLUDED.sell_tax,
               risk_classification = EXCLUDED.risk_classification",
        )
        .bind(&result.token_mint)
        .bind(result.sim_time)
        .bind(result.buy_success)
        .bind(result.sell_success)
        .bind(result.is_honeypot)
        .bind(result.buy_tax)
        .bind(result.sell_tax)
        .bind(format!("{:?}", result.risk_class))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sim_result(&self, token_mint: &str) -> Result<Option<SimResultRow>, StoreError> {
        let row = sqlx::query_as::<_, SimResultRow>(
            "SELECT token_mint, program_id, sim_time, buy_success, sell_success, buy_error,
                    sell_error, is_honeypot, notes, buy_tax, sell_tax, risk_classification
             FROM sim_results WHERE token_mint = $1",
        )
        .bind(token_mint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- circuit_breaker_state ------------------------------------------

    pub async fn load_circuit_breaker(&self) -> Result<Option<CircuitBreakerRow>, StoreError> {
        let row = sqlx::query_as::<_, CircuitBreakerRow>(
            "SELECT id, is_locked, locked_at, lock_reason, unlock_at, daily_pnl, daily_pnl_pct,
                    consecutive_losses, open_position_count, total_exposure, last_trade_time, updated_at
             FROM circuit_breaker_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_circuit_breaker(&self, s: &CircuitBreakerState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO circuit_breaker_state
             (id, is_locked, lock_reason, unlock_at, daily_pnl, daily_pnl_pct,
              consecutive_losses, open_position_count, total_exposure, last_trade_time, updated_at)
             VALUES (1,$1,$2,$3,$4,$5,$6,$7,$8,$9, now())
             ON CONFLICT (id) DO UPDATE SET
               is_locked = EXCLUDED.is_locked,
               lock_reason = EXCLUDED.lock_reason,
               unlock_at = EXCLUDED.unlock_at,
               daily_pnl = EXCLUDED.daily_pnl,
               daily_pnl_pct = EXCLUDED.daily_pnl_pct,
               consecutive_losses = EXCLUDED.consecutive_losses,
               open_position_count = EXCLUDED.open_position_count,
               total_exposure = EXCLUDED.total_exposure,
               last_trade_time = EXCLUDED.last_trade_time,
               updated_at = now()",
        )
        .bind(s.is_locked)
        .bind(&s.lock_reason)
        .bind(s.lock_until)
        .bind(s.daily_pnl)
        .bind(s.daily_pnl_pct)
        .bind(s.consecutive_losses as i32)
        .bind(s.open_position_count as i32)
        .bind(s.total_exposure)
        .bind(s.last_trade_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- sub_wallets -------------------------------------------------

    pub async fn insert_sub_wallet(&self, w: &SubWallet) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sub_wallets (wallet_id, address, encrypted_key, balance_sol, is_active, is_retired, total_trades, last_used)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(w.wallet_id)
        .bind(&w.address)
        .bind(&w.encrypted_key)
        .bind(w.balance_base)
        .bind(w.is_active)
        .bind(w.is_retired)
        .bind(w.trade_counter as i32)
        .bind(w.last_used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn active_sub_wallets(&self) -> Result<Vec<SubWalletRow>, StoreError> {
        let rows = sqlx::query_as::<_, SubWalletRow>(
            "SELECT wallet_id, address, encrypted_key, balance_sol, is_active, is_retired, total_trades, last_used
             FROM sub_wallets WHERE is_active = TRUE AND is_retired = FALSE
             ORDER BY last_used ASC NULLS FIRST",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn retired_sub_wallets(&self) -> Result<Vec<SubWalletRow>, StoreError> {
        let rows = sqlx::query_as::<_, SubWalletRow>(
            "SELECT wallet_id, address, encrypted_key, balance_sol, is_active, is_retired, total_trades, last_used
             FROM sub_wallets WHERE is_retired = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn sub_wallet_by_id(&self, id: Uuid) -> Result<Option<SubWalletRow>, StoreError> {
        let row = sqlx::query_as::<_, SubWalletRow>(
            "SELECT wallet_id, address, encrypted_key, balance_sol, is_active, is_retired, total_trades, last_used
             FROM sub_wallets WHERE wallet_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_wallet_used(&self, id: Uuid, trade_counter: u32) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sub_wallets SET total_trades = $2, last_used = now() WHERE wallet_id = $1",
        )
        .bind(id)
        .bind(trade_counter as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn retire_wallet(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE sub_wallets SET is_retired = TRUE, is_active = FALSE WHERE wallet_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- trade_log -----------------------------------------------------

    pub async fn insert_trade_log(&self, t: &TradeLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO trade_log
             (trade_id, signal_source, signal_id, token_mint, entry_price, position_size,
              position_size_sol, entry_time, status, sub_wallet_address, fees_paid, slippage_expected)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(t.trade_id)
        .bind(format!("{:?}", t.signal_source))
        .bind(t.signal_id)
        .bind(&t.token_mint)
        .bind(t.entry_price)
        .bind(t.position_size_token)
        .bind(t.position_size_base)
        .bind(t.entry_time)
        .bind(format!("{:?}", t.status))
        .bind(&t.sub_wallet_address)
        .bind(t.fees_paid)
        .bind(t.slippage_expected)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn trade_log_by_id(&self, trade_id: Uuid) -> Result<Option<TradeLogRow>, StoreError> {
        let row = sqlx::query_as::<_, TradeLogRow>(
            "SELECT trade_id, signal_source, signal_id, token_mint, entry_price, exit_price,
                    position_size, position_size_sol, entry_time, exit_time, exit_tier,
                    realized_pnl, pnl_percentage, fees_paid, status, failure_reason,
                    sub_wallet_address, slippage_expected, slippage_actual
             FROM trade_log WHERE trade_id = $1",
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn close_trade_log(
        &self,
        trade_id: Uuid,
        exit_price: Decimal,
        exit_tier: &str,
        realized_pnl: Decimal,
        pnl_pct: Decimal,
        status: TradeStatus,
        slippage_actual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE trade_log SET exit_price=$2, exit_time=now(), exit_tier=$3,
             realized_pnl=$4, pnl_percentage=$5, status=$6, slippage_actual=$7 WHERE trade_id=$1",
        )
        .bind(trade_id)
        .bind(exit_price)
        .bind(exit_tier)
        .bind(realized_pnl)
        .bind(pnl_pct)
        .bind(format!("{:?}", status))
        .bind(slippage_actual)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn closed_trades_for_source(&self, source_id: &str) -> Result<Vec<TradeLogRow>, StoreError> {
        let rows = sqlx::query_as::<_, TradeLogRow>(
            "SELECT trade_id, signal_source, signal_id, token_mint, entry_price, exit_price,
                    position_size, position_size_sol, entry_time, exit_time, exit_tier,
                    realized_pnl, pnl_percentage, fees_paid, status, failure_reason,
                    sub_wallet_address, slippage_expected, slippage_actual
             FROM trade_log WHERE signal_source = $1 AND status != 'Open'
             ORDER BY exit_time ASC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- signal_attribution ----------------------------------------------

    pub async fn upsert_attribution(&self, stats: &SourceStats) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO signal_attribution
             (source_id, source_type, total_trades, winning_trades, losing_trades, total_pnl,
              win_rate, best_trade_pnl, worst_trade_pnl, last_trade_time, last_updated)
             VALUES ($1,'signal',$2,$3,$4,$5,$6,$7,$8,$9, now())
             ON CONFLICT (source_id) DO UPDATE SET
               total_trades = EXCLUDED.total_trades,
               winning_trades = EXCLUDED.winning_trades,
               losing_trades = EXCLUDED.losing_trades,
               total_pnl = EXCLUDED.total_pnl,
               win_rate = EXCLUDED.win_rate,
               best_trade_pnl = EXCLUDED.best_trade_pnl,
               worst_trade_pnl = EXCLUDED.worst_trade_pnl,
               last_trade_time = EXCLUDED.last_trade_time,
               last_updated = now()",
        )
        .bind(&stats.source_id)
        .bind(stats.total_trades as i32)
        .bind(stats.winning_trades as i32)
        .bind(stats.losing_trades as i32)
        .bind(stats.total_pnl)
        .bind(stats.win_rate())
        .bind(stats.best_trade_pnl)
        .bind(stats.worst_trade_pnl)
        .bind(stats.last_trade_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- trade_forensics ---------------------------------------------

    pub async fn insert_forensics(&self, row: &TradeForensicsRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO trade_forensics
             (forensic_id, trade_id, failure_category, detected_at, details, was_simulation_run,
              simulation_result, time_since_simulation, expected_output, actual_output,
              slippage_pct, signal_confidence)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(row.forensic_id)
        .bind(row.trade_id)
        .bind(&row.failure_category)
        .bind(row.detected_at)
        .bind(&row.details)
        .bind(row.was_simulation_run)
        .bind(&row.simulation_result)
        .bind(row.time_since_simulation)
        .bind(row.expected_output)
        .bind(row.actual_output)
        .bind(row.slippage_pct)
        .bind(row.signal_confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
