use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

use crate::core::types::TradeSignal;

const SIGNAL_CHANNEL_CAPACITY: usize = 1024;

/// Receiver handle returned by [`SignalBus::subscribe`]. Thin wrapper over
/// an `mpsc::Receiver` so callers don't depend on the bus's internal
/// channel choice.
pub struct SignalReceiver {
    inner: mpsc::Receiver<TradeSignal>,
}

impl SignalReceiver {
    pub async fn recv(&mut self) -> Option<TradeSignal> {
        self.inner.recv().await
    }
}

/// Fan-out of [`TradeSignal`]s from detectors to the execution orchestrator.
///
/// Unlike [`crate::transport::event_bus::EventBus`], which drops the oldest
/// `ChainEvent` under backpressure, a signal is a decision to trade: losing
/// one silently would mean a real entry never happens. `publish` blocks the
/// caller until every subscriber has room, rather than dropping.
pub struct SignalBus {
    subscribers: Mutex<Vec<mpsc::Sender<TradeSignal>>>,
}

impl SignalBus {
    #[instrument]
    pub fn new() -> Self {
        info!(capacity = SIGNAL_CHANNEL_CAPACITY, "signal bus initialized");
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    #[instrument(skip(self, signal), fields(source = ?signal.source, token_mint = %signal.target_token_mint))]
    pub async fn publish(&self, signal: TradeSignal) {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.is_empty() {
            warn!("signal published with zero subscribers");
            return;
        }
        subscribers.retain(|sender| !sender.is_closed());
        for sender in subscribers.iter() {
            if sender.send(signal.clone()).await.is_err() {
                warn!("subscriber dropped its receiver mid-publish");
            }
        }
        info!(subscriber_count = subscribers.len(), "signal published");
    }

    #[instrument(skip(self))]
    pub async fn subscribe(&self) -> SignalReceiver {
        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        self.subscribers.lock().await.push(tx);
        SignalReceiver { inner: rx }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SignalSource;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_signal() -> TradeSignal {
        TradeSignal {
            signal_id: Uuid::new_v4(),
            source: SignalSource::Cabal,
            source_id: "cluster-1".into(),
            target_token_mint: "mint1".into(),
            confidence: 0.8,
            timestamp: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_delivers_in_order() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe().await;
        let s1 = sample_signal();
        let s2 = sample_signal();
        bus.publish(s1.clone()).await;
        bus.publish(s2.clone()).await;
        assert_eq!(rx.recv().await.unwrap().signal_id, s1.signal_id);
        assert_eq!(rx.recv().await.unwrap().signal_id, s2.signal_id);
    }

    #[tokio::test]
    async fn publish_blocks_until_a_full_subscriber_drains() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe().await;
        for _ in 0..SIGNAL_CHANNEL_CAPACITY {
            bus.publish(sample_signal()).await;
        }

        let publish_fut = bus.publish(sample_signal());
        tokio::pin!(publish_fut);
        tokio::select! {
            _ = &mut publish_fut => panic!("publish should not complete while the subscriber's channel is full"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }

        rx.recv().await.unwrap();
        publish_fut.await;
    }
}
