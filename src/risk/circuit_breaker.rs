use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::types::{CircuitBreakerState, TradeStatus};
use crate::store::RelationalStore;

#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_daily_drawdown_pct: Decimal,
    pub max_position_size_pct: Decimal,
    pub max_open_positions: u32,
    pub max_consecutive_losses: u32,
    pub lockdown_hours: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_drawdown_pct: Decimal::new(10, 2),  // 0.10
            max_position_size_pct: Decimal::new(5, 2),    // 0.05
            max_open_positions: 10,
            max_consecutive_losses: 3,
            lockdown_hours: 24,
        }
    }
}

/// Singleton pre-trade risk gate. All mutation happens under a single
/// in-process mutex; the gate is fail-closed on any store error.
pub struct CircuitBreaker {
    limits: RiskLimits,
    capital: Decimal,
    state: Mutex<CircuitBreakerState>,
    store: Arc<RelationalStore>,
}

impl CircuitBreaker {
    pub async fn load(limits: RiskLimits, capital: Decimal, store: Arc<RelationalStore>) -> Self {
        let state = match store.load_circuit_breaker().await {
            Ok(Some(row)) => CircuitBreakerState {
                is_locked: row.is_locked,
                lock_reason: row.lock_reason,
                lock_until: row.unlock_at,
                daily_pnl: row.daily_pnl,
                daily_pnl_pct: row.daily_pnl_pct,
                consecutive_losses: row.consecutive_losses as u32,
                open_position_count: row.open_position_count as u32,
                total_exposure: row.total_exposure,
                last_trade_time: row.last_trade_time,
            },
            _ => CircuitBreakerState::default(),
        };
        Self { limits, capital, state: Mutex::new(state), store }
    }

    #[instrument(skip(self))]
    pub async fn can_trade(&self) -> bool {
        let mut state = self.state.lock().await;
        self.maybe_auto_unlock(&mut state);

        if let Err(err) = self.store.save_circuit_breaker(&state).await {
            warn!(%err, "circuit breaker store unreachable, failing closed");
            return false;
        }

        !state.is_locked && state.open_position_count < self.limits.max_open_positions
    }

    fn maybe_auto_unlock(&self, state: &mut CircuitBreakerState) {
        if state.is_locked {
            if let Some(until) = state.lock_until {
                if Utc::now() >= until {
                    self.unlock(state, "auto-unlock: lockdown window elapsed");
                }
            }
        }
    }

    fn unlock(&self, state: &mut CircuitBreakerState, reason: &str) {
        info!(reason, "circuit breaker unlocked");
        state.is_locked = false;
        state.lock_reason = None;
        state.lock_until = None;
        state.daily_pnl = Decimal::ZERO;
        state.daily_pnl_pct = Decimal::ZERO;
        state.consecutive_losses = 0;
    }

    pub fn validate_position_size(&self, size: Decimal) -> bool {
        size <= self.capital * self.limits.max_position_size_pct
    }

    #[instrument(skip(self))]
    pub async fn record_position_opened(&self, size: Decimal) {
        let mut state = self.state.lock().await;
        state.open_position_count += 1;
        state.total_exposure += size;
        let _ = self.store.save_circuit_breaker(&state).await;
    }

    #[instrument(skip(self))]
    pub async fn record_trade_result(&self, pnl: Decimal, is_win: bool, size: Decimal) {
        let mut state = self.state.lock().await;
        Self::apply_trade_result(&mut state, self.capital, &self.limits, pnl, is_win, size);
        let _ = self.store.save_circuit_breaker(&state).await;
    }

    /// Pure state transition applied by `record_trade_result`, split out so
    /// the invariants in the spec can be checked without a live store.
    fn apply_trade_result(
        state: &mut CircuitBreakerState,
        capital: Decimal,
        limits: &RiskLimits,
        pnl: Decimal,
        is_win: bool,
        size: Decimal,
    ) {
        state.daily_pnl += pnl;
        state.daily_pnl_pct = if capital.is_zero() { Decimal::ZERO } else { state.daily_pnl / capital };
        state.consecutive_losses = if is_win { 0 } else { state.consecutive_losses + 1 };
        state.open_position_count = state.open_position_count.saturating_sub(1);
        state.total_exposure = (state.total_exposure - size).max(Decimal::ZERO);
        state.last_trade_time = Some(Utc::now());

        let drawdown_breach = state.daily_pnl_pct.abs() > limits.max_daily_drawdown_pct;
        let streak_breach = state.consecutive_losses >= limits.max_consecutive_losses;

        if drawdown_breach || streak_breach {
            let reason = if drawdown_breach { "daily drawdown limit exceeded" } else { "consecutive loss limit exceeded" };
            Self::apply_lockdown(state, limits, reason);
        }
    }

    fn trigger_lockdown(&self, state: &mut CircuitBreakerState, reason: &str) {
        Self::apply_lockdown(state, &self.limits, reason);
    }

    fn apply_lockdown(state: &mut CircuitBreakerState, limits: &RiskLimits, reason: &str) {
        warn!(reason, "circuit breaker lockdown triggered");
        state.is_locked = true;
        state.lock_reason = Some(reason.to_string());
        state.lock_until = Some(Utc::now() + chrono::Duration::hours(limits.lockdown_hours));
    }

    /// Unconditionally locks, marks every open position PanicSold with exit
    /// tier PANIC, zeroes counters, and returns the ids to sell.
    #[instrument(skip(self))]
    pub async fn panic_sell_all(&self, open_trade_ids: &[Uuid]) -> Vec<Uuid> {
        let mut state = self.state.lock().await;
        self.trigger_lockdown(&mut state, "manual panic sell");
        state.open_position_count = 0;
        state.total_exposure = Decimal::ZERO;

        for &trade_id in open_trade_ids {
            if let Err(err) = self
                .store
                .close_trade_log(
                    trade_id,
                    Decimal::ZERO,
                    "PANIC",
                    Decimal::ZERO,
                    Decimal::ZERO,
                    TradeStatus::PanicSold,
                    None,
                )
                .await
            {
                warn!(%err, %trade_id, "failed to mark trade panic-sold");
            }
        }

        let _ = self.store.save_circuit_breaker(&state).await;
        open_trade_ids.to_vec()
    }

    #[instrument(skip(self))]
    pub async fn force_unlock(&self) {
        let mut state = self.state.lock().await;
        self.unlock(&mut state, "manual force-unlock");
        let _ = self.store.save_circuit_breaker(&state).await;
    }

    #[instrument(skip(self))]
    pub async fn reset_daily(&self) {
        let mut state = self.state.lock().await;
        state.daily_pnl = Decimal::ZERO;
        state.daily_pnl_pct = Decimal::ZERO;
        let _ = self.store.save_circuit_breaker(&state).await;
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn validate_position_size_enforces_five_percent_cap() {
        let limits = RiskLimits::default();
        let capital = dec!(1000);
        assert!(capital * limits.max_position_size_pct == dec!(50));
    }

    #[test]
    fn record_trade_result_resets_streak_on_win() {
        let limits = RiskLimits::default();
        let mut state = CircuitBreakerState { consecutive_losses: 2, open_position_count: 1, ..Default::default() };
        CircuitBreaker::apply_trade_result(&mut state, dec!(1000), &limits, dec!(10), true, dec!(10));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(state.open_position_count, 0);
        assert!(!state.is_locked);
    }

    #[test]
    fn record_trade_result_increments_streak_on_loss() {
        let limits = RiskLimits::default();
        let mut state = CircuitBreakerState { consecutive_losses: 1, open_position_count: 2, ..Default::default() };
        CircuitBreaker::apply_trade_result(&mut state, dec!(1000), &limits, dec!(-10), false, dec!(10));
        assert_eq!(state.consecutive_losses, 2);
        assert_eq!(state.open_position_count, 1);
    }

    #[test]
    fn drawdown_breach_triggers_lockdown_with_correct_window() {
        let limits = RiskLimits::default();
        let mut state = CircuitBreakerState { daily_pnl: dec!(-80), open_position_count: 1, ..Default::default() };
        let before = Utc::now();
        CircuitBreaker::apply_trade_result(&mut state, dec!(1000), &limits, dec!(-50), false, dec!(10));
        assert!(state.is_locked);
        assert!(state.lock_reason.as_deref().unwrap().contains("drawdown"));
        assert!(state.lock_until.unwrap() > before + chrono::Duration::hours(23));
    }

    #[test]
    fn consecutive_loss_streak_triggers_lockdown() {
        let limits = RiskLimits::default();
        let mut state = CircuitBreakerState { consecutive_losses: 2, open_position_count: 1, ..Default::default() };
        CircuitBreaker::apply_trade_result(&mut state, dec!(1000), &limits, dec!(-1), false, dec!(10));
        assert!(state.is_locked);
        assert!(state.lock_reason.as_deref().unwrap().contains("consecutive"));
    }
}
