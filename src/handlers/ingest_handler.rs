use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{instrument, warn};

use crate::core::types::BalanceDelta;
use crate::detect::withdrawal_detector::WithdrawalDetector;
use crate::ingest::normalizer::Normalizer;
use crate::ingest::transport::{ChainTransport, RawChainUpdate};
use crate::store::RelationalStore;
use crate::transport::event_bus::EventBus;

const RAW_UPDATE_CHANNEL_CAPACITY: usize = 4096;

/// Drives every configured [`ChainTransport`], normalizes its raw updates
/// onto the [`EventBus`], and forks balance-delta information straight to
/// the [`WithdrawalDetector`] since the normalized [`crate::core::types::ChainEvent`]
/// doesn't carry per-account deltas. Every normalized event is also durably
/// recorded in `tx_events`, the candidate pool the fresh-wallet matcher
/// joins `tracked_wallets` against.
pub struct IngestHandler {
    normalizer: Normalizer,
    event_bus: Arc<EventBus>,
    withdrawal_detector: Arc<WithdrawalDetector>,
    store: Arc<RelationalStore>,
    transports: Vec<Arc<dyn ChainTransport>>,
}

impl IngestHandler {
    pub fn new(
        event_bus: Arc<EventBus>,
        withdrawal_detector: Arc<WithdrawalDetector>,
        store: Arc<RelationalStore>,
        transports: Vec<Arc<dyn ChainTransport>>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(),
            event_bus,
            withdrawal_detector,
            store,
            transports,
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Sender<()>) {
        let mut shutdown = shutdown.subscribe();
        let (tx, mut rx) = mpsc::channel::<RawChainUpdate>(RAW_UPDATE_CHANNEL_CAPACITY);

        for transport in &self.transports {
            let transport = Arc::clone(transport);
            let sink = tx.clone();
            tokio::spawn(async move {
                if let Err(err) = transport.run(sink).await {
                    warn!(%err, "ingestion transport terminated");
                }
            });
        }
        drop(tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        rx.close();
                        while let Ok(update) = rx.try_recv() {
                            self.dispatch(update).await;
                        }
                        break;
                    }
                    update = rx.recv() => {
                        match update {
                            Some(update) => self.dispatch(update).await,
                            None => break,
                        }
                    }
                }
            }
        });
    }

    #[instrument(skip(self, update), fields(tx_hash = %update.tx_hash))]
    async fn dispatch(&self, update: RawChainUpdate) {
        let deltas = Self::sol_balance_deltas(&update);
        let event = self.normalizer.normalize(update);

        if let Some(event) = event {
            if let Err(err) = self.store.record_tx_event(&event, event.output_amount).await {
                warn!(%err, tx_hash = %event.tx_id, "failed to record tx event");
            }
            if !deltas.is_empty() {
                // Recipient prior-tx-count requires an RPC lookup this
                // pipeline doesn't perform inline; freshness is resolved
                // downstream from the store's tracked_wallets snapshot.
                self.withdrawal_detector.process(&event, &deltas, 0).await;
            }
            self.event_bus.publish(event).await;
        }
    }

    fn sol_balance_deltas(update: &RawChainUpdate) -> Vec<BalanceDelta> {
        update
            .sol_deltas
            .iter()
            .map(|(account, delta)| BalanceDelta {
                account: account.clone(),
                mint: None,
                delta: *delta,
            })
            .filter(|d| d.delta != Decimal::ZERO)
            .collect()
    }
}
