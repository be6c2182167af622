use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::settings::AppConfig;
use crate::config::{ConfidencePolicy, WalletCategory};
use crate::core::types::{Position, TradeLog, TradeSignal, TradeStatus};
use crate::execution::bundle_submitter::BundleSubmitter;
use crate::execution::position_book::PositionBook;
use crate::execution::router::QuoteClient;
use crate::ledger::PnlJournal;
use crate::risk::circuit_breaker::CircuitBreaker;
use crate::simulate::Simulator;
use crate::wallet::sub_wallet_pool::SubWalletPool;

const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const SIZE_BASE_PCT: Decimal = dec!(0.01);
const SIZE_MAX_PCT: Decimal = dec!(0.05);
const ENTRY_URGENCY: u8 = 1;
const BUNDLE_SIZE: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened { trade_id: Uuid },
    DryRun { token_mint: String, size: Decimal },
    Rejected { reason: String },
    DuplicateSignal,
}

/// Spine of the pipeline: consumes signals, gates them through risk and
/// simulation, sizes and routes the trade, and submits it as a bundle.
/// Every step is short-circuited on failure; once a bundle is submitted the
/// trade is treated as Open regardless of what happens afterward.
pub struct Orchestrator {
    config: AppConfig,
    confidence_policy: Arc<ConfidencePolicy>,
    risk_gate: Arc<CircuitBreaker>,
    simulator: Arc<Simulator>,
    router: Arc<dyn QuoteClient>,
    sub_wallets: Arc<SubWalletPool>,
    bundle_submitter: Arc<BundleSubmitter>,
    position_book: Arc<PositionBook>,
    journal: Arc<PnlJournal>,
    consumed_signals: Mutex<HashSet<Uuid>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        confidence_policy: Arc<ConfidencePolicy>,
        risk_gate: Arc<CircuitBreaker>,
        simulator: Arc<Simulator>,
        router: Arc<dyn QuoteClient>,
        sub_wallets: Arc<SubWalletPool>,
        bundle_submitter: Arc<BundleSubmitter>,
        position_book: Arc<PositionBook>,
        journal: Arc<PnlJournal>,
    ) -> Self {
        Self {
            config,
            confidence_policy,
            risk_gate,
            simulator,
            router,
            sub_wallets,
            bundle_submitter,
            position_book,
            journal,
            consumed_signals: Mutex::new(HashSet::new()),
        }
    }

    /// `capital · (π_base + confidence · (π_max − π_base))`.
    pub fn position_size(capital: Decimal, confidence: f64) -> Decimal {
        let confidence = Decimal::try_from(confidence).unwrap_or(Decimal::ZERO).clamp(Decimal::ZERO, Decimal::ONE);
        capital * (SIZE_BASE_PCT + confidence * (SIZE_MAX_PCT - SIZE_BASE_PCT))
    }

    #[instrument(skip(self, signal), fields(signal_id = %signal.signal_id, source = ?signal.source, token_mint = %signal.target_token_mint))]
    pub async fn process_signal(&self, signal: TradeSignal) -> EntryOutcome {
        {
            let mut consumed = self.consumed_signals.lock().await;
            if !consumed.insert(signal.signal_id) {
                return EntryOutcome::DuplicateSignal;
            }
        }
        self.execute_entry(signal).await
    }

    async fn execute_entry(&self, signal: TradeSignal) -> EntryOutcome {
        if !self.config.auto_execute {
            return EntryOutcome::Rejected { reason: "auto-execute disabled".to_string() };
        }

        let executable = self
            .confidence_policy
            .should_execute(signal.source, signal.confidence, None::<WalletCategory>)
            .await;
        if !executable {
            return EntryOutcome::Rejected { reason: "confidence below source threshold".to_string() };
        }

        if !self.risk_gate.can_trade().await {
            return EntryOutcome::Rejected { reason: "risk gate closed".to_string() };
        }

        if self.simulator.is_honeypot(&signal.target_token_mint).await {
            return EntryOutcome::Rejected { reason: "token classified as honeypot".to_string() };
        }

        let size = Self::position_size(self.config.capital, signal.confidence);
        if !self.risk_gate.validate_position_size(size) {
            return EntryOutcome::Rejected { reason: "position size exceeds cap".to_string() };
        }

        if self.config.dry_run {
            info!(token_mint = %signal.target_token_mint, %size, "dry-run: would execute entry");
            return EntryOutcome::DryRun { token_mint: signal.target_token_mint, size };
        }

        let size_base_units = (size * Decimal::from(LAMPORTS_PER_SOL)).to_u64().unwrap_or(0);
        let route = match self
            .router
            .quote(SOL_MINT, &signal.target_token_mint, size_base_units, ENTRY_URGENCY)
            .await
        {
            Ok(route) => route,
            Err(err) => return EntryOutcome::Rejected { reason: format!("no route: {err}") },
        };

        let wallet = match self.sub_wallets.acquire().await {
            Ok(wallet) => wallet,
            Err(err) => return EntryOutcome::Rejected { reason: format!("no sub-wallet available: {err}") },
        };

        let swap_tx = match self.router.build_transaction(&route, &wallet.address).await {
            Ok(bytes) => bytes,
            Err(err) => return EntryOutcome::Rejected { reason: format!("failed to build swap transaction: {err}") },
        };

        let payer = match Pubkey::from_str(&wallet.address) {
            Ok(pubkey) => pubkey,
            Err(_) => return EntryOutcome::Rejected { reason: "sub-wallet address is not a valid pubkey".to_string() },
        };
        let congestion = BundleSubmitter::congestion_from_priority_fee(self.router.recent_prioritization_fee().await);
        let tip_lamports = BundleSubmitter::calculate_tip(ENTRY_URGENCY, BUNDLE_SIZE, congestion);
        let tip_instruction = match self.bundle_submitter.build_tip_instruction(&payer, tip_lamports).await {
            Ok(instruction) => instruction,
            Err(err) => return EntryOutcome::Rejected { reason: format!("failed to build tip instruction: {err}") },
        };
        let swap_tx_with_tip = match BundleSubmitter::append_tip_instruction(&swap_tx, &payer, tip_instruction) {
            Ok(bytes) => bytes,
            Err(err) => return EntryOutcome::Rejected { reason: format!("failed to append tip instruction: {err}") },
        };

        let signed_swap = match self.sub_wallets.sign(wallet.wallet_id, &swap_tx_with_tip).await {
            Ok(bytes) => bytes,
            Err(err) => return EntryOutcome::Rejected { reason: format!("failed to sign swap transaction: {err}") },
        };

        // Past this point the bundle may have already landed on-chain; every
        // later failure is logged but the trade is still recorded as Open.
        let bundle_result = match self.bundle_submitter.submit(&[signed_swap], tip_lamports).await {
            Ok(result) => result,
            Err(err) => return EntryOutcome::Rejected { reason: format!("bundle submission failed: {err}") },
        };

        // Priced as lamports spent per token received, so later exit-loop
        // quotes (token -> SOL) land in the same unit and `m = price /
        // entry_price` is a dimensionless ratio.
        let entry_price = if route.out_amount.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::from(size_base_units) / route.out_amount
        };

        let trade_id = Uuid::new_v4();
        let trade = TradeLog {
            trade_id,
            signal_source: signal.source,
            signal_id: signal.signal_id,
            token_mint: signal.target_token_mint.clone(),
            entry_price,
            exit_price: None,
            position_size_token: route.out_amount,
            position_size_base: size,
            entry_time: Utc::now(),
            exit_time: None,
            exit_tier: None,
            realized_pnl: None,
            pnl_pct: None,
            fees_paid: Decimal::ZERO,
            status: TradeStatus::Open,
            failure_reason: None,
            sub_wallet_address: wallet.address.clone(),
            bundle_id: Some(bundle_result.bundle_id.clone()),
            slippage_expected: Some(route.price_impact_pct),
            slippage_actual: None,
        };

        if let Err(err) = self.journal.record_entry(&trade).await {
            warn!(%err, %trade_id, "trade landed but journal write failed");
        }

        self.position_book
            .open(Position {
                trade_id,
                token_mint: signal.target_token_mint.clone(),
                sub_wallet_id: wallet.wallet_id,
                sub_wallet_address: wallet.address,
                entry_price,
                token_amount_at_entry: route.out_amount,
                remaining_fraction: Decimal::ONE,
                entry_time: trade.entry_time,
                last_observed_price: entry_price,
                source: signal.source,
            })
            .await;

        if let Err(err) = self.sub_wallets.mark_used(wallet.wallet_id).await {
            warn!(%err, %trade_id, "failed to bump sub-wallet trade counter");
        }

        self.risk_gate.record_position_opened(size).await;
        info!(%trade_id, bundle_id = %bundle_result.bundle_id, "entry executed");
        EntryOutcome::Opened { trade_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn position_size_scales_linearly_between_base_and_max() {
        let capital = dec!(1000);
        let low = Orchestrator::position_size(capital, 0.0);
        let high = Orchestrator::position_size(capital, 1.0);
        assert_eq!(low, dec!(10));
        assert_eq!(high, dec!(50));
    }

    #[test]
    fn position_size_is_monotone_in_confidence() {
        let capital = dec!(1000);
        let a = Orchestrator::position_size(capital, 0.2);
        let b = Orchestrator::position_size(capital, 0.8);
        assert!(b > a);
    }
}
