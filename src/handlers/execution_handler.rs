use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::execution::exit_loop::ExitLoop;
use crate::execution::orchestrator::{EntryOutcome, Orchestrator};
use crate::transport::signal_bus::SignalBus;

/// Consumes trade signals and drives them through entry, then hands the
/// resulting open positions off to the exit loop.
pub struct ExecutionHandler {
    pub orchestrator: Arc<Orchestrator>,
    pub exit_loop: Arc<ExitLoop>,
}

impl ExecutionHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, exit_loop: Arc<ExitLoop>) -> Self {
        Self { orchestrator, exit_loop }
    }

    pub fn spawn(self: Arc<Self>, signal_bus: Arc<SignalBus>, shutdown: broadcast::Sender<()>) {
        Arc::clone(&self.exit_loop).spawn(shutdown.clone());

        let mut signal_shutdown = shutdown.subscribe();
        let handler = Arc::clone(&self);
        tokio::spawn(async move {
            let mut signals = signal_bus.subscribe().await;
            loop {
                tokio::select! {
                    biased;
                    _ = signal_shutdown.recv() => break,
                    received = signals.recv() => match received {
                        Some(signal) => handler.handle_signal(signal).await,
                        None => break,
                    }
                }
            }
        });
    }

    #[instrument(skip(self, signal), fields(signal_id = %signal.signal_id))]
    async fn handle_signal(&self, signal: crate::core::types::TradeSignal) {
        match self.orchestrator.process_signal(signal).await {
            EntryOutcome::Opened { trade_id } => info!(%trade_id, "position opened"),
            EntryOutcome::DryRun { token_mint, size } => info!(%token_mint, %size, "dry run, no transaction sent"),
            EntryOutcome::Rejected { reason } => info!(%reason, "signal rejected"),
            EntryOutcome::DuplicateSignal => {}
        }
    }
}
