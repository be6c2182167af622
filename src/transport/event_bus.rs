use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument, warn};

use crate::core::types::ChainEvent;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Running counters for the event bus, mirroring the teacher's
/// `BusStatistics`/`BusHealthStatus` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStatistics {
    pub events_published: u64,
    pub lagged_receivers: u64,
    pub active_subscribers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusHealthStatus {
    pub healthy: bool,
    pub active_subscribers: usize,
    pub events_published: u64,
}

/// Single-channel, per-publisher-FIFO broadcast of normalized [`ChainEvent`]s.
///
/// Detectors each hold their own receiver; a slow detector that falls behind
/// the bounded channel sees `RecvError::Lagged` and must resynchronize, it
/// never blocks the publisher.
pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
    stats: Arc<RwLock<BusStatistics>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        info!(capacity, "event bus initialized");
        Self {
            sender,
            stats: Arc::new(RwLock::new(BusStatistics::default())),
        }
    }

    #[instrument(skip(self, event), fields(tx_id = %event.tx_id, wallet = %event.wallet))]
    pub async fn publish(&self, event: ChainEvent) {
        let subscribers = self.sender.receiver_count();
        match self.sender.send(event) {
            Ok(_) => {
                let mut stats = self.stats.write().await;
                stats.events_published += 1;
                stats.active_subscribers = subscribers;
            }
            Err(_) => {
                warn!("event published with zero subscribers");
            }
        }
    }

    #[instrument(skip(self))]
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        let receiver = self.sender.subscribe();
        info!(subscriber_count = self.sender.receiver_count(), "new event subscriber");
        receiver
    }

    pub async fn health_check(&self) -> BusHealthStatus {
        let stats = self.stats.read().await;
        BusHealthStatus {
            healthy: true,
            active_subscribers: stats.active_subscribers,
            events_published: stats.events_published,
        }
    }

    pub async fn stats(&self) -> BusStatistics {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EventKind;
    use chrono::Utc;

    fn sample_event() -> ChainEvent {
        ChainEvent {
            kind: EventKind::Swap,
            tx_id: "tx1".into(),
            slot: 1,
            timestamp: Utc::now(),
            wallet: "wallet1".into(),
            program_id: None,
            input_mint: None,
            output_mint: None,
            input_amount: None,
            output_amount: None,
            fee_lamports: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(sample_event()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.tx_id, "tx1");
    }

    #[tokio::test]
    async fn stats_track_published_count() {
        let bus = EventBus::new();
        let _rx = bus.subscribe();
        bus.publish(sample_event()).await;
        bus.publish(sample_event()).await;
        assert_eq!(bus.stats().await.events_published, 2);
    }
}
