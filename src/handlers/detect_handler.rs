use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::types::{ChainEvent, CorrelationEvent, EventKind, SignalSource, TradeSignal};
use crate::detect::cex_registry::CexRegistry;
use crate::detect::correlation_engine::CorrelationEngine;
use crate::detect::fresh_wallet_matcher::FreshWalletMatcher;
use crate::detect::influencer_monitor::{InfluencerMonitor, BASE_CURRENCY_MINTS};
use crate::detect::withdrawal_detector::WithdrawalDetector;
use crate::transport::event_bus::EventBus;
use crate::transport::signal_bus::SignalBus;

const FRESH_WALLET_MIN_SCORE: f64 = 0.75;

/// Wires the five detectors to the event bus and turns their output into
/// [`TradeSignal`]s on the signal bus. Fresh-wallet matches don't name a
/// token by themselves (the withdrawal only proves the wallet was funded),
/// so a match is remembered here and turned into a signal the same way
/// [`InfluencerMonitor`] does: the next time that wallet swaps out of a
/// base-currency mint.
pub struct DetectHandler {
    cex_registry: Arc<CexRegistry>,
    withdrawal_detector: Arc<WithdrawalDetector>,
    fresh_wallet_matcher: Arc<FreshWalletMatcher>,
    correlation_engine: Arc<CorrelationEngine>,
    influencer_monitor: Arc<InfluencerMonitor>,
    signal_bus: Arc<SignalBus>,
    fresh_tracked: RwLock<HashMap<String, f64>>,
}

impl DetectHandler {
    pub fn new(
        cex_registry: Arc<CexRegistry>,
        withdrawal_detector: Arc<WithdrawalDetector>,
        fresh_wallet_matcher: Arc<FreshWalletMatcher>,
        correlation_engine: Arc<CorrelationEngine>,
        influencer_monitor: Arc<InfluencerMonitor>,
        signal_bus: Arc<SignalBus>,
    ) -> Self {
        Self {
            cex_registry,
            withdrawal_detector,
            fresh_wallet_matcher,
            correlation_engine,
            influencer_monitor,
            signal_bus,
            fresh_tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Refreshes the in-memory CEX registry from `tracked_wallets`. Cheap
    /// enough to call on a short interval; the registry is consulted on
    /// every balance delta the ingestion pipeline observes.
    pub fn spawn_registry_refresh(
        self: Arc<Self>,
        store: Arc<crate::store::RelationalStore>,
        every: std::time::Duration,
        shutdown: broadcast::Sender<()>,
    ) {
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.cex_registry.refresh(&store).await {
                            tracing::warn!(%err, "CEX registry refresh failed");
                        }
                    }
                }
            }
        });
    }

    pub fn spawn(self: Arc<Self>, event_bus: Arc<EventBus>, shutdown: broadcast::Sender<()>) {
        let on_events = Arc::clone(&self);
        let mut events = event_bus.subscribe();
        let mut events_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = events_shutdown.recv() => break,
                    received = events.recv() => match received {
                        Ok(event) => on_events.handle_chain_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let on_withdrawals = Arc::clone(&self);
        let mut withdrawals = self.withdrawal_detector.subscribe();
        let mut withdrawals_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = withdrawals_shutdown.recv() => break,
                    received = withdrawals.recv() => match received {
                        Ok(withdrawal) => on_withdrawals.handle_withdrawal(withdrawal).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    #[instrument(skip(self, event), fields(tx_id = %event.tx_id))]
    async fn handle_chain_event(&self, event: ChainEvent) {
        if let Some(signal) = self.influencer_monitor.process_event(&event).await {
            self.signal_bus.publish(signal).await;
        }

        if let Some(signal) = self.fresh_wallet_signal(&event).await {
            self.signal_bus.publish(signal).await;
        }

        if matches!(event.kind, EventKind::Swap | EventKind::ProgramInteraction) {
            if let Some(program_id) = event.program_id.clone() {
                self.process_correlation(event, program_id).await;
            }
        }
    }

    async fn fresh_wallet_signal(&self, event: &ChainEvent) -> Option<TradeSignal> {
        let score = *self.fresh_tracked.read().await.get(&event.wallet)?;
        let input_mint = event.input_mint.as_deref()?;
        let output_mint = event.output_mint.as_deref()?;
        if !BASE_CURRENCY_MINTS.contains(&input_mint) || BASE_CURRENCY_MINTS.contains(&output_mint) {
            return None;
        }
        Some(TradeSignal {
            signal_id: Uuid::new_v4(),
            source: SignalSource::FreshWallet,
            source_id: event.wallet.clone(),
            target_token_mint: output_mint.to_string(),
            confidence: score,
            timestamp: event.timestamp,
            metadata: serde_json::json!({ "funded_wallet": event.wallet }),
        })
    }

    async fn process_correlation(&self, event: ChainEvent, program_id: String) {
        let correlation_event = CorrelationEvent {
            contract: program_id,
            slot: event.slot,
            timestamp: event.timestamp,
            wallet: event.wallet.clone(),
            tx_id: event.tx_id,
            action: format!("{:?}", event.kind),
        };
        let results = match self.correlation_engine.process_event(correlation_event).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(%err, "correlation engine store error");
                return;
            }
        };

        for result in results {
            let Some(cluster) = self.correlation_engine.cluster_for_wallet(&result.wallet_a).await else {
                continue;
            };
            if !cluster.is_active_cabal() {
                continue;
            }
            let signal = TradeSignal {
                signal_id: Uuid::new_v4(),
                source: SignalSource::Cabal,
                source_id: cluster.cluster_id.clone(),
                target_token_mint: result.triggering_contract.clone(),
                confidence: cluster.avg_correlation,
                timestamp: chrono::Utc::now(),
                metadata: serde_json::json!({ "cluster_size": cluster.wallets.len() }),
            };
            info!(cluster_id = %cluster.cluster_id, "cabal signal emitted");
            self.signal_bus.publish(signal).await;
        }
    }

    async fn handle_withdrawal(&self, withdrawal: crate::core::types::WithdrawalEvent) {
        match self.fresh_wallet_matcher.process_withdrawal(withdrawal).await {
            Ok(Some(fresh_match)) if fresh_match.score >= FRESH_WALLET_MIN_SCORE => {
                self.fresh_tracked.write().await.insert(fresh_match.funded_wallet, fresh_match.score);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "fresh wallet matcher store error"),
        }
    }
}
