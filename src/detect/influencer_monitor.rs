use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::types::{ChainEvent, SignalSource, TradeSignal};
use crate::store::RelationalStore;

pub(crate) const BASE_CURRENCY_MINTS: &[&str] = &[
    "So11111111111111111111111111111111111111112",
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB",
];

struct TrackedWallet {
    confidence: f64,
}

/// Gates known high-signal wallets: a tracked wallet buying out of the base
/// currency or a principal stablecoin into something else is a signal.
pub struct InfluencerMonitor {
    tracked: Arc<RwLock<HashMap<String, TrackedWallet>>>,
    sender: broadcast::Sender<TradeSignal>,
}

impl InfluencerMonitor {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            tracked: Arc::new(RwLock::new(HashMap::new())),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeSignal> {
        self.sender.subscribe()
    }

    #[instrument(skip(self, store))]
    pub async fn refresh(&self, store: &RelationalStore) -> Result<(), crate::store::StoreError> {
        let rows = store.all_tracked_wallets().await?;
        let mut next = HashMap::new();
        for row in rows {
            if row.category == "influencer" {
                next.insert(row.address, TrackedWallet { confidence: row.confidence });
            }
        }
        let count = next.len();
        *self.tracked.write().await = next;
        info!(count, "influencer monitor refreshed");
        Ok(())
    }

    pub fn spawn_periodic_refresh(
        self: Arc<Self>,
        store: Arc<RelationalStore>,
        every: Duration,
        shutdown: broadcast::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh(&store).await {
                            tracing::warn!(%err, "influencer registry refresh failed");
                        }
                    }
                }
            }
        })
    }

    #[instrument(skip(self, event), fields(wallet = %event.wallet))]
    pub async fn process_event(&self, event: &ChainEvent) -> Option<TradeSignal> {
        let tracked = self.tracked.read().await;
        let entry = tracked.get(&event.wallet)?;

        let input_mint = event.input_mint.as_deref()?;
        let output_mint = event.output_mint.as_deref()?;
        if !BASE_CURRENCY_MINTS.contains(&input_mint) || BASE_CURRENCY_MINTS.contains(&output_mint) {
            return None;
        }

        let signal = TradeSignal {
            signal_id: Uuid::new_v4(),
            source: SignalSource::Influencer,
            source_id: event.wallet.clone(),
            target_token_mint: output_mint.to_string(),
            confidence: entry.confidence,
            timestamp: event.timestamp,
            metadata: serde_json::json!({ "influencer_wallet": event.wallet }),
        };
        let _ = self.sender.send(signal.clone());
        Some(signal)
    }
}

impl Default for InfluencerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EventKind;
    use chrono::Utc;

    fn swap_event(wallet: &str, input: &str, output: &str) -> ChainEvent {
        ChainEvent {
            kind: EventKind::Swap,
            tx_id: "tx1".into(),
            slot: 1,
            timestamp: Utc::now(),
            wallet: wallet.into(),
            program_id: None,
            input_mint: Some(input.into()),
            output_mint: Some(output.into()),
            input_amount: None,
            output_amount: None,
            fee_lamports: None,
        }
    }

    #[tokio::test]
    async fn tracked_wallet_buying_out_of_sol_emits_signal() {
        let monitor = InfluencerMonitor::new();
        monitor.tracked.write().await.insert("infl1".into(), TrackedWallet { confidence: 0.9 });
        let event = swap_event("infl1", BASE_CURRENCY_MINTS[0], "memecoinMint");
        let signal = monitor.process_event(&event).await.expect("signal expected");
        assert_eq!(signal.confidence, 0.9);
        assert_eq!(signal.target_token_mint, "memecoinMint");
    }

    #[tokio::test]
    async fn untracked_wallet_produces_no_signal() {
        let monitor = InfluencerMonitor::new();
        let event = swap_event("stranger", BASE_CURRENCY_MINTS[0], "memecoinMint");
        assert!(monitor.process_event(&event).await.is_none());
    }

    #[tokio::test]
    async fn base_to_base_swap_is_not_a_signal() {
        let monitor = InfluencerMonitor::new();
        monitor.tracked.write().await.insert("infl1".into(), TrackedWallet { confidence: 0.9 });
        let event = swap_event("infl1", BASE_CURRENCY_MINTS[0], BASE_CURRENCY_MINTS[1]);
        assert!(monitor.process_event(&event).await.is_none());
    }
}
