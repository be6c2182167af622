use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{instrument, warn};

use crate::core::types::{BalanceDelta, ChainEvent, WithdrawalEvent};
use crate::detect::cex_registry::CexRegistry;

const PROCESSED_TX_CAPACITY: usize = 4096;
const GAS_TOLERANCE_LAMPORTS: Decimal = dec!(10000);
const WITHDRAWAL_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum WithdrawalDetectorError {
    #[error("malformed balance deltas for tx {0}")]
    MalformedDeltas(String),
}

/// Recognizes exchange→user funding transfers from a transaction's balance
/// delta decomposition. Never raises: malformed input is dropped with a
/// warning, per the component's specified failure mode.
pub struct WithdrawalDetector {
    registry: Arc<CexRegistry>,
    processed: Mutex<ProcessedLru>,
    sender: broadcast::Sender<WithdrawalEvent>,
}

struct ProcessedLru {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedLru {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn insert_if_new(&mut self, tx_id: &str) -> bool {
        if self.seen.contains(tx_id) {
            return false;
        }
        if self.order.len() >= PROCESSED_TX_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(tx_id.to_string());
        self.order.push_back(tx_id.to_string());
        true
    }
}

impl WithdrawalDetector {
    pub fn new(registry: Arc<CexRegistry>) -> Self {
        let (sender, _) = broadcast::channel(WITHDRAWAL_CHANNEL_CAPACITY);
        Self {
            registry,
            processed: Mutex::new(ProcessedLru::new()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WithdrawalEvent> {
        self.sender.subscribe()
    }

    #[instrument(skip(self, event, deltas), fields(tx_id = %event.tx_id))]
    pub async fn process(
        &self,
        event: &ChainEvent,
        deltas: &[BalanceDelta],
        recipient_prior_tx_count: u32,
    ) -> Option<WithdrawalEvent> {
        {
            let mut processed = self.processed.lock().await;
            if !processed.insert_if_new(&event.tx_id) {
                return None;
            }
        }

        if deltas.is_empty() {
            warn!(tx_id = %event.tx_id, "malformed balance deltas, skipping");
            return None;
        }

        for decreased in deltas.iter().filter(|d| d.delta < Decimal::ZERO) {
            if !self.registry.is_known(&decreased.account).await {
                continue;
            }
            let Some(name) = self.registry.name_of(&decreased.account).await else {
                continue;
            };
            let withdrawal_amount = decreased.delta.abs();

            let matching_increase = deltas.iter().find(|inc| {
                inc.account != decreased.account
                    && inc.delta > Decimal::ZERO
                    && (inc.delta - withdrawal_amount).abs() <= GAS_TOLERANCE_LAMPORTS
            });

            if let Some(recipient) = matching_increase {
                let withdrawal = WithdrawalEvent {
                    tx_id: event.tx_id.clone(),
                    slot: event.slot,
                    timestamp: event.timestamp,
                    source_exchange_wallet: decreased.account.clone(),
                    source_exchange_name: name,
                    recipient_wallet: recipient.account.clone(),
                    amount: recipient.delta,
                    decimals: 9,
                    recipient_prior_tx_count,
                };
                let _ = self.sender.send(withdrawal.clone());
                return Some(withdrawal);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EventKind;
    use chrono::Utc;

    fn sample_event(tx_id: &str) -> ChainEvent {
        ChainEvent {
            kind: EventKind::Transfer,
            tx_id: tx_id.into(),
            slot: 100,
            timestamp: Utc::now(),
            wallet: "hot1".into(),
            program_id: None,
            input_mint: None,
            output_mint: None,
            input_amount: None,
            output_amount: None,
            fee_lamports: None,
        }
    }

    #[tokio::test]
    async fn matches_known_cex_withdrawal() {
        let registry = Arc::new(CexRegistry::new());
        registry.insert("hot1".into(), "Binance".into()).await;
        let detector = WithdrawalDetector::new(registry);

        let deltas = vec![
            BalanceDelta { account: "hot1".into(), mint: None, delta: dec!(-15500000000) },
            BalanceDelta { account: "userX".into(), mint: None, delta: dec!(15499995000) },
        ];

        let result = detector.process(&sample_event("tx1"), &deltas, 0).await;
        let withdrawal = result.expect("should match");
        assert_eq!(withdrawal.source_exchange_name, "Binance");
        assert_eq!(withdrawal.recipient_wallet, "userX");
    }

    #[tokio::test]
    async fn duplicate_tx_is_suppressed() {
        let registry = Arc::new(CexRegistry::new());
        registry.insert("hot1".into(), "Binance".into()).await;
        let detector = WithdrawalDetector::new(registry);
        let deltas = vec![
            BalanceDelta { account: "hot1".into(), mint: None, delta: dec!(-1000000) },
            BalanceDelta { account: "userX".into(), mint: None, delta: dec!(999995) },
        ];
        assert!(detector.process(&sample_event("tx1"), &deltas, 0).await.is_some());
        assert!(detector.process(&sample_event("tx1"), &deltas, 0).await.is_none());
    }

    #[tokio::test]
    async fn unknown_wallet_produces_no_match() {
        let registry = Arc::new(CexRegistry::new());
        let detector = WithdrawalDetector::new(registry);
        let deltas = vec![
            BalanceDelta { account: "hot1".into(), mint: None, delta: dec!(-1000000) },
            BalanceDelta { account: "userX".into(), mint: None, delta: dec!(999995) },
        ];
        assert!(detector.process(&sample_event("tx1"), &deltas, 0).await.is_none());
    }

    #[tokio::test]
    async fn empty_deltas_is_skipped_not_panicked() {
        let registry = Arc::new(CexRegistry::new());
        let detector = WithdrawalDetector::new(registry);
        assert!(detector.process(&sample_event("tx1"), &[], 0).await.is_none());
    }
}
