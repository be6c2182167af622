use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::types::{ExitTier, TradeStatus};
use crate::execution::bundle_submitter::BundleSubmitter;
use crate::execution::position_book::PositionBook;
use crate::execution::router::QuoteClient;
use crate::ledger::{Forensics, ForensicInput, PnlJournal};
use crate::risk::circuit_breaker::CircuitBreaker;
use crate::store::RelationalStore;
use crate::wallet::sub_wallet_pool::SubWalletPool;

const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
const PRICE_CHECK_INTERVAL_SECS: u64 = 5;
const PROBE_TOKEN_UNITS: u64 = 1_000_000;
const STOP_LOSS_PCT: Decimal = dec!(-0.30);
const SELL_FRACTION_OF_REMAINING: Decimal = dec!(0.50);
const STOP_LOSS_URGENCY: u8 = 5;
const TIERED_EXIT_URGENCY: u8 = 3;
const BUNDLE_SIZE: usize = 1;

/// Internal tier bookkeeping. Distinct from [`ExitTier`] (the tag persisted
/// on the closing `TradeLog` row): this tracks how far a still-open
/// position has progressed so later ticks know which transitions remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ProgressTier {
    Open,
    T1,
    T2,
    T3,
}

fn evaluate_transition(tier: ProgressTier, m: Decimal) -> Option<(ProgressTier, Decimal, bool)> {
    if m <= Decimal::ONE + STOP_LOSS_PCT {
        return Some((ProgressTier::T3, Decimal::ONE, true));
    }
    if m >= dec!(10) && tier < ProgressTier::T3 {
        return Some((ProgressTier::T3, SELL_FRACTION_OF_REMAINING, false));
    }
    if m >= dec!(5) && m < dec!(10) && tier < ProgressTier::T2 {
        return Some((ProgressTier::T2, SELL_FRACTION_OF_REMAINING, false));
    }
    if m >= dec!(2) && m < dec!(5) && tier < ProgressTier::T1 {
        return Some((ProgressTier::T1, SELL_FRACTION_OF_REMAINING, false));
    }
    None
}

fn exit_tier_tag(tier: ProgressTier, stop_loss: bool) -> ExitTier {
    if stop_loss {
        return ExitTier::Sl;
    }
    match tier {
        ProgressTier::Open => ExitTier::T1,
        ProgressTier::T1 => ExitTier::T1,
        ProgressTier::T2 => ExitTier::T2,
        ProgressTier::T3 => ExitTier::T3,
    }
}

/// Periodic tiered-exit state machine. One tick per [`PRICE_CHECK_INTERVAL_SECS`]
/// walks every open position, sells the fraction dictated by the highest
/// priority transition that applies, and closes positions once their
/// remaining share drops below 1%.
pub struct ExitLoop {
    position_book: Arc<PositionBook>,
    router: Arc<dyn QuoteClient>,
    sub_wallets: Arc<SubWalletPool>,
    bundle_submitter: Arc<BundleSubmitter>,
    risk_gate: Arc<CircuitBreaker>,
    journal: Arc<PnlJournal>,
    forensics: Arc<Forensics>,
    store: Arc<RelationalStore>,
    progress: Mutex<HashMap<Uuid, ProgressTier>>,
}

impl ExitLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        position_book: Arc<PositionBook>,
        router: Arc<dyn QuoteClient>,
        sub_wallets: Arc<SubWalletPool>,
        bundle_submitter: Arc<BundleSubmitter>,
        risk_gate: Arc<CircuitBreaker>,
        journal: Arc<PnlJournal>,
        forensics: Arc<Forensics>,
        store: Arc<RelationalStore>,
    ) -> Self {
        Self {
            position_book,
            router,
            sub_wallets,
            bundle_submitter,
            risk_gate,
            journal,
            forensics,
            store,
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: tokio::sync::broadcast::Sender<()>) {
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(PRICE_CHECK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }
        });
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        for position in self.position_book.open_positions().await {
            if let Err(err) = self.evaluate_position(position.trade_id).await {
                warn!(%err, trade_id = %position.trade_id, "exit evaluation failed");
            }
        }
    }

    async fn evaluate_position(&self, trade_id: Uuid) -> Result<(), String> {
        let Some(position) = self.position_book.get(trade_id).await else {
            return Ok(());
        };
        if position.entry_price.is_zero() {
            return Ok(());
        }

        let route = self
            .router
            .quote(&position.token_mint, SOL_MINT, PROBE_TOKEN_UNITS, TIERED_EXIT_URGENCY)
            .await
            .map_err(|err| err.to_string())?;
        let price_now = route.out_amount / Decimal::from(PROBE_TOKEN_UNITS);
        let m = price_now / position.entry_price;

        let current_tier = *self.progress.lock().await.get(&trade_id).unwrap_or(&ProgressTier::Open);
        let Some((next_tier, sell_fraction, is_stop_loss)) = evaluate_transition(current_tier, m) else {
            return Ok(());
        };

        let urgency = if is_stop_loss { STOP_LOSS_URGENCY } else { TIERED_EXIT_URGENCY };
        self.execute_exit_leg(trade_id, &position.token_mint, position.sub_wallet_id, sell_fraction, urgency, price_now, next_tier, is_stop_loss)
            .await?;
        self.progress.lock().await.insert(trade_id, next_tier);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_exit_leg(
        &self,
        trade_id: Uuid,
        token_mint: &str,
        sub_wallet_id: Uuid,
        sell_fraction: Decimal,
        urgency: u8,
        price_now: Decimal,
        next_tier: ProgressTier,
        is_stop_loss: bool,
    ) -> Result<(), String> {
        let sell_amount = (Decimal::from(PROBE_TOKEN_UNITS) * sell_fraction).to_u64().unwrap_or(PROBE_TOKEN_UNITS);
        let route = self
            .router
            .quote(token_mint, SOL_MINT, sell_amount.max(1), urgency)
            .await
            .map_err(|err| err.to_string())?;

        let wallet = self
            .sub_wallets
            .sub_wallet_address(sub_wallet_id)
            .await
            .ok_or_else(|| "sub-wallet address unavailable for exit leg".to_string())?;
        let sell_tx = self.router.build_transaction(&route, &wallet).await.map_err(|err| err.to_string())?;

        let payer = Pubkey::from_str(&wallet).map_err(|_| "sub-wallet address is not a valid pubkey".to_string())?;
        let congestion = BundleSubmitter::congestion_from_priority_fee(self.router.recent_prioritization_fee().await);
        let tip_lamports = BundleSubmitter::calculate_tip(urgency, BUNDLE_SIZE, congestion);
        let tip_instruction = self
            .bundle_submitter
            .build_tip_instruction(&payer, tip_lamports)
            .await
            .map_err(|err| err.to_string())?;
        let sell_tx_with_tip = BundleSubmitter::append_tip_instruction(&sell_tx, &payer, tip_instruction)
            .map_err(|err| err.to_string())?;

        let signed_sell = self.sub_wallets.sign(sub_wallet_id, &sell_tx_with_tip).await.map_err(|err| err.to_string())?;

        self.bundle_submitter
            .submit(&[signed_sell], tip_lamports)
            .await
            .map_err(|err| err.to_string())?;

        let updated = self.position_book.apply_partial_sell(trade_id, sell_fraction, price_now).await;
        let Some(position) = updated else {
            return Ok(());
        };

        info!(%trade_id, tier = ?next_tier, remaining = %position.remaining_fraction, "exit leg executed");

        if position.is_closed() {
            self.close_position(trade_id, price_now, next_tier, is_stop_loss, route.price_impact_pct).await?;
        }
        Ok(())
    }

    async fn close_position(
        &self,
        trade_id: Uuid,
        exit_price: Decimal,
        tier: ProgressTier,
        is_stop_loss: bool,
        slippage_actual: Decimal,
    ) -> Result<(), String> {
        let Some(position) = self.position_book.close(trade_id).await else {
            return Ok(());
        };

        let pnl_pct = if position.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price - position.entry_price) / position.entry_price
        };
        let realized_pnl = pnl_pct * position.token_amount_at_entry * position.entry_price;
        let status = if is_stop_loss { TradeStatus::StoppedOut } else { TradeStatus::Closed };
        let exit_tier = exit_tier_tag(tier, is_stop_loss);

        self.journal
            .record_exit(trade_id, exit_price, exit_tier.as_tag(), realized_pnl, pnl_pct, status, Some(slippage_actual))
            .await
            .map_err(|err| err.to_string())?;

        let is_win = realized_pnl >= Decimal::ZERO;
        self.risk_gate.record_trade_result(realized_pnl, is_win, position.token_amount_at_entry * position.entry_price).await;

        if pnl_pct < dec!(-0.10) {
            let slippage_expected = self
                .store
                .trade_log_by_id(trade_id)
                .await
                .ok()
                .flatten()
                .and_then(|row| row.slippage_expected);
            let sim_result = self.store.sim_result(&position.token_mint).await.ok().flatten();
            let (was_simulation_run, simulation_flagged_safe, time_since_simulation_secs) = match &sim_result {
                Some(sim) => (
                    true,
                    sim.buy_success && sim.sell_success && !sim.is_honeypot,
                    Some((chrono::Utc::now() - sim.sim_time).num_seconds()),
                ),
                None => (false, false, None),
            };

            let input = ForensicInput {
                trade_id,
                loss_pct: pnl_pct,
                was_simulation_run,
                simulation_flagged_safe,
                time_since_simulation_secs,
                slippage_expected,
                slippage_actual: Some(slippage_actual),
                signal_confidence: None,
            };
            if let Err(err) = self.forensics.record(input, chrono::Utc::now()).await {
                warn!(%err, %trade_id, "failed to record forensics for losing trade");
            }
        }

        self.progress.lock().await.remove(&trade_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_loss_outranks_every_other_tier() {
        let transition = evaluate_transition(ProgressTier::T2, dec!(0.65));
        assert_eq!(transition, Some((ProgressTier::T3, Decimal::ONE, true)));
    }

    #[test]
    fn jump_from_open_straight_to_t3_on_a_ten_x_move() {
        let transition = evaluate_transition(ProgressTier::Open, dec!(12));
        assert_eq!(transition, Some((ProgressTier::T3, SELL_FRACTION_OF_REMAINING, false)));
    }

    #[test]
    fn already_at_t3_has_no_further_transition_above_ten_x() {
        assert_eq!(evaluate_transition(ProgressTier::T3, dec!(15)), None);
    }

    #[test]
    fn mid_band_progresses_open_to_t1() {
        assert_eq!(
            evaluate_transition(ProgressTier::Open, dec!(3)),
            Some((ProgressTier::T1, SELL_FRACTION_OF_REMAINING, false))
        );
    }

    #[test]
    fn no_transition_in_dead_zone_between_one_and_two_x() {
        assert_eq!(evaluate_transition(ProgressTier::Open, dec!(1.2)), None);
    }
}
