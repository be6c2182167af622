use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument};

use crate::core::types::{FreshWalletMatch, WithdrawalEvent};
use crate::store::models::{FreshClusterRow, FreshWalletCandidateRow};
use crate::store::{GraphStore, RelationalStore, StoreError};

const TIME_WINDOW_SECS: i64 = 300;
const BUFFER_TTL_SECS: i64 = TIME_WINDOW_SECS + 60;
const DELTA_SOFT: f64 = 0.001;
const DELTA_HARD: f64 = 0.005;
const WEIGHT_TIME: f64 = 0.4;
const WEIGHT_AMOUNT: f64 = 0.6;
const FRESHNESS_BONUS: f64 = 0.1;
const MIN_SCORE: f64 = 0.75;
const CANDIDATE_CAP: i64 = 100;

#[derive(Debug, Clone)]
struct BufferedWithdrawal {
    withdrawal: WithdrawalEvent,
    buffered_at: DateTime<Utc>,
}

/// Links CEX withdrawals to freshly-funded wallets. Buffers each withdrawal
/// briefly so a candidate observed slightly out of order can still match.
pub struct FreshWalletMatcher {
    buffer: Mutex<HashMap<String, BufferedWithdrawal>>,
    sender: broadcast::Sender<FreshWalletMatch>,
    store: Arc<RelationalStore>,
    graph: Arc<GraphStore>,
}

impl FreshWalletMatcher {
    pub fn new(store: Arc<RelationalStore>, graph: Arc<GraphStore>) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            buffer: Mutex::new(HashMap::new()),
            sender,
            store,
            graph,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FreshWalletMatch> {
        self.sender.subscribe()
    }

    /// Score a single candidate against a withdrawal per the component's
    /// fixed weights. Pure, no I/O, exercised directly in tests.
    pub fn score_candidate(
        withdrawal_amount: Decimal,
        withdrawal_time: DateTime<Utc>,
        candidate_amount: Decimal,
        candidate_time: DateTime<Utc>,
        candidate_prior_tx_count: u32,
    ) -> f64 {
        let delta_t = (candidate_time - withdrawal_time).num_milliseconds() as f64 / 1000.0;
        if delta_t < 0.0 || delta_t > TIME_WINDOW_SECS as f64 {
            return 0.0;
        }
        let s_time = 1.0 - (delta_t / TIME_WINDOW_SECS as f64);

        if withdrawal_amount.is_zero() {
            return 0.0;
        }
        let delta_a = ((candidate_amount - withdrawal_amount).abs() / withdrawal_amount)
            .to_f64()
            .unwrap_or(1.0);

        if delta_a > DELTA_HARD {
            return 0.0;
        }
        let s_amount = if delta_a > DELTA_SOFT {
            0.5
        } else {
            1.0 - (delta_a / DELTA_SOFT)
        };

        let freshness = if candidate_prior_tx_count == 0 { FRESHNESS_BONUS } else { 0.0 };
        (WEIGHT_TIME * s_time + WEIGHT_AMOUNT * s_amount + freshness).min(1.0)
    }

    #[instrument(skip(self, withdrawal), fields(tx_id = %withdrawal.tx_id))]
    pub async fn process_withdrawal(
        &self,
        withdrawal: WithdrawalEvent,
    ) -> Result<Option<FreshWalletMatch>, StoreError> {
        self.buffer_withdrawal(withdrawal.clone()).await;

        let amount = withdrawal.amount;
        let lo = amount * (Decimal::ONE - dec!(0.001));
        let hi = amount * (Decimal::ONE + dec!(0.001));
        let candidates = self
            .store
            .fresh_wallet_candidates(withdrawal.timestamp, TIME_WINDOW_SECS, lo, hi, CANDIDATE_CAP)
            .await?;

        let mut best: Option<(FreshWalletCandidateRow, f64)> = None;
        for candidate in candidates {
            let score = Self::score_candidate(
                amount,
                withdrawal.timestamp,
                candidate.first_funded_amount,
                candidate.first_funded_time,
                candidate.tx_count as u32,
            );
            let is_better = match &best {
                None => true,
                Some((current, current_score)) => {
                    score > *current_score
                        || (score == *current_score && candidate.first_funded_time < current.first_funded_time)
                }
            };
            if is_better {
                best = Some((candidate, score));
            }
        }

        let Some((candidate, score)) = best else {
            return Ok(None);
        };
        if score < MIN_SCORE {
            return Ok(None);
        }

        let time_delta_ms = (candidate.first_funded_time - withdrawal.timestamp).num_milliseconds();
        let amount_delta_pct = ((candidate.first_funded_amount - amount).abs() / amount) * dec!(100);

        // A fresh wallet hasn't been linked into any existing cluster yet;
        // that link is what this match itself establishes.
        let fresh_match = FreshWalletMatch {
            withdrawal_tx: withdrawal.tx_id.clone(),
            funded_wallet: candidate.address.clone(),
            time_delta_ms,
            amount_delta_pct,
            score,
            parent_cluster_id: None,
        };

        self.persist_match(&withdrawal, &fresh_match).await?;
        self.graph
            .link_funded_by(
                &fresh_match.funded_wallet,
                &withdrawal.source_exchange_name,
                withdrawal.timestamp,
                score,
                withdrawal.tx_id.clone(),
            )
            .await;

        let _ = self.sender.send(fresh_match.clone());
        info!(score, funded_wallet = %fresh_match.funded_wallet, "fresh wallet match");
        Ok(Some(fresh_match))
    }

    async fn buffer_withdrawal(&self, withdrawal: WithdrawalEvent) {
        let now = Utc::now();
        let mut buffer = self.buffer.lock().await;
        buffer.retain(|_, v| (now - v.buffered_at).num_seconds() < BUFFER_TTL_SECS);
        buffer.insert(
            withdrawal.tx_id.clone(),
            BufferedWithdrawal { withdrawal, buffered_at: now },
        );
    }

    async fn persist_match(
        &self,
        withdrawal: &WithdrawalEvent,
        fresh_match: &FreshWalletMatch,
    ) -> Result<(), StoreError> {
        let row = FreshClusterRow {
            cex_source: withdrawal.source_exchange_name.clone(),
            withdrawal_tx: withdrawal.tx_id.clone(),
            withdrawal_time: withdrawal.timestamp,
            amount: withdrawal.amount,
            decimals: withdrawal.decimals as i16,
            target_wallet: fresh_match.funded_wallet.clone(),
            target_tx_count: 0,
            time_delta_ms: fresh_match.time_delta_ms,
            match_score: fresh_match.score,
            linked_parent: fresh_match.parent_cluster_id.clone(),
        };
        self.store.insert_fresh_cluster(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn hard_limit_beyond_time_window_scores_zero() {
        let t0 = Utc::now();
        let score = FreshWalletMatcher::score_candidate(
            dec!(15.5),
            t0,
            dec!(15.5),
            t0 + Duration::seconds(301),
            0,
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn hard_limit_beyond_amount_delta_scores_zero() {
        let t0 = Utc::now();
        let score = FreshWalletMatcher::score_candidate(
            dec!(15.5),
            t0,
            dec!(15.5) * dec!(1.10),
            t0 + Duration::seconds(30),
            0,
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn close_match_scores_above_threshold() {
        let t0 = Utc::now();
        let score = FreshWalletMatcher::score_candidate(
            dec!(15.5),
            t0,
            dec!(15.497),
            t0 + Duration::seconds(60),
            0,
        );
        assert!(score >= 0.75, "expected score >= 0.75 got {score}");
    }
}
