pub mod detect_handler;
pub mod execution_handler;
pub mod ingest_handler;
pub mod store_handler;
pub mod wallet_handler;

pub use detect_handler::DetectHandler;
pub use execution_handler::ExecutionHandler;
pub use ingest_handler::IngestHandler;
pub use store_handler::StoreHandler;
pub use wallet_handler::WalletHandler;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::settings::AppConfig;
use crate::config::ConfidencePolicy;
use crate::detect::cex_registry::CexRegistry;
use crate::detect::correlation_engine::CorrelationEngine;
use crate::detect::fresh_wallet_matcher::FreshWalletMatcher;
use crate::detect::influencer_monitor::InfluencerMonitor;
use crate::detect::withdrawal_detector::WithdrawalDetector;
use crate::execution::bundle_submitter::BundleSubmitter;
use crate::execution::exit_loop::ExitLoop;
use crate::execution::orchestrator::Orchestrator;
use crate::execution::position_book::PositionBook;
use crate::execution::router::{DexRouter, QuoteClient};
use crate::ingest::transport::ChainTransport;
use crate::ingest::{GrpcTransport, WebsocketTransport};
use crate::ledger::{Attribution, Forensics, PnlJournal};
use crate::risk::circuit_breaker::{CircuitBreaker, RiskLimits};
use crate::simulate::Simulator;
use crate::transport::event_bus::EventBus;
use crate::transport::signal_bus::SignalBus;

const CEX_REGISTRY_REFRESH: Duration = Duration::from_secs(5 * 60);
const INFLUENCER_REFRESH: Duration = Duration::from_secs(5 * 60);

/// Composition root: wires every subsystem from [`AppConfig`] in
/// dependency order, owns the background tasks `start` spawns, and exposes
/// a single status snapshot and shutdown entrypoint for `main`.
pub struct SystemOrchestrator {
    config: AppConfig,
    store: StoreHandler,
    wallet: WalletHandler,
    event_bus: Arc<EventBus>,
    signal_bus: Arc<SignalBus>,
    ingest: Arc<IngestHandler>,
    detect: Arc<DetectHandler>,
    execution: Arc<ExecutionHandler>,
    influencer_monitor: Arc<InfluencerMonitor>,
    risk_gate: Arc<CircuitBreaker>,
    attribution: Arc<Attribution>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SystemOrchestrator {
    pub async fn init() -> Result<Self> {
        info!("loading configuration");
        let config = AppConfig::from_env().context("failed to load configuration")?;

        let store = StoreHandler::init(&config.database_url).await.context("failed to connect to relational store")?;
        let wallet = WalletHandler::init(&config, Arc::clone(&store.relational)).context("failed to initialize key vault")?;

        let event_bus = Arc::new(EventBus::new());
        let signal_bus = Arc::new(SignalBus::new());

        let router: Arc<dyn QuoteClient> = Arc::new(DexRouter::new(config.dex_quote_url.clone(), config.rpc_url.clone()));
        let simulator = Arc::new(Simulator::new(Arc::clone(&router), Arc::clone(&store.relational)));

        let tip_accounts: Vec<Pubkey> = config
            .tip_accounts
            .iter()
            .filter_map(|raw| Pubkey::from_str(raw).ok())
            .collect();
        let bundle_submitter = Arc::new(BundleSubmitter::new(config.bundle_url.clone(), tip_accounts));

        let risk_gate = Arc::new(
            CircuitBreaker::load(
                RiskLimits {
                    max_daily_drawdown_pct: config.max_daily_drawdown_pct,
                    max_position_size_pct: config.max_position_size_pct,
                    max_consecutive_losses: config.max_consecutive_losses,
                    lockdown_hours: config.lockdown_hours,
                    ..RiskLimits::default()
                },
                config.capital,
                Arc::clone(&store.relational),
            )
            .await,
        );

        let position_book = Arc::new(PositionBook::new());
        let journal = Arc::new(PnlJournal::new(Arc::clone(&store.relational)));
        let attribution = Arc::new(Attribution::new(Arc::clone(&store.relational)));
        let forensics = Arc::new(Forensics::new(Arc::clone(&store.relational)));

        let confidence_policy = Arc::new(ConfidencePolicy::new(config.profile));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::clone(&confidence_policy),
            Arc::clone(&risk_gate),
            Arc::clone(&simulator),
            Arc::clone(&router),
            Arc::clone(&wallet.pool),
            Arc::clone(&bundle_submitter),
            Arc::clone(&position_book),
            Arc::clone(&journal),
        ));
        let exit_loop = Arc::new(ExitLoop::new(
            Arc::clone(&position_book),
            Arc::clone(&router),
            Arc::clone(&wallet.pool),
            Arc::clone(&bundle_submitter),
            Arc::clone(&risk_gate),
            Arc::clone(&journal),
            Arc::clone(&forensics),
            Arc::clone(&store.relational),
        ));
        let execution = Arc::new(ExecutionHandler::new(orchestrator, exit_loop));

        let cex_registry = Arc::new(CexRegistry::new());
        let withdrawal_detector = Arc::new(WithdrawalDetector::new(Arc::clone(&cex_registry)));
        let fresh_wallet_matcher =
            Arc::new(FreshWalletMatcher::new(Arc::clone(&store.relational), Arc::clone(&store.graph)));
        let correlation_engine = Arc::new(CorrelationEngine::new(
            config.monitored_program_ids.clone(),
            Arc::clone(&store.relational),
            Arc::clone(&store.graph),
        ));
        let influencer_monitor = Arc::new(InfluencerMonitor::new());
        let detect = Arc::new(DetectHandler::new(
            Arc::clone(&cex_registry),
            Arc::clone(&withdrawal_detector),
            fresh_wallet_matcher,
            correlation_engine,
            Arc::clone(&influencer_monitor),
            Arc::clone(&signal_bus),
        ));

        let mut transports: Vec<Arc<dyn ChainTransport>> = vec![Arc::new(WebsocketTransport::new(
            config.websocket_url.clone(),
            config.rpc_url.clone(),
            config.monitored_program_ids.clone(),
            config.watched_accounts.clone(),
        ))];
        if let Some(grpc_url) = config.grpc_url.clone() {
            transports.push(Arc::new(GrpcTransport::new(
                grpc_url,
                config.monitored_program_ids.clone(),
                config.watched_accounts.clone(),
            )));
        }
        let ingest = Arc::new(IngestHandler::new(
            Arc::clone(&event_bus),
            withdrawal_detector,
            Arc::clone(&store.relational),
            transports,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        info!("all components initialized");
        Ok(Self {
            config,
            store,
            wallet,
            event_bus,
            signal_bus,
            ingest,
            detect,
            execution,
            influencer_monitor,
            risk_gate,
            attribution,
            shutdown_tx,
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("starting background services");
        Arc::clone(&self.ingest).spawn(self.shutdown_tx.clone());
        Arc::clone(&self.detect).spawn(Arc::clone(&self.event_bus), self.shutdown_tx.clone());
        Arc::clone(&self.detect).spawn_registry_refresh(
            Arc::clone(&self.store.relational),
            CEX_REGISTRY_REFRESH,
            self.shutdown_tx.clone(),
        );
        Arc::clone(&self.influencer_monitor).spawn_periodic_refresh(
            Arc::clone(&self.store.relational),
            INFLUENCER_REFRESH,
            self.shutdown_tx.clone(),
        );
        Arc::clone(&self.execution).spawn(Arc::clone(&self.signal_bus), self.shutdown_tx.clone());
        info!("all background services started");
        Ok(())
    }

    /// Per-source attribution, used by the status report and available to
    /// any future reporting surface.
    pub async fn source_performance(&self, source_id: &str) -> Result<crate::core::types::SourceStats> {
        self.attribution.rollup(source_id).await.context("attribution rollup failed")
    }

    pub async fn status(&self) -> String {
        let breaker = self.risk_gate.snapshot().await;
        let bus = self.event_bus.stats().await;
        format!(
            "profile={:?} dry_run={} auto_execute={} locked={} open_positions={} events_published={}",
            self.config.profile,
            self.config.dry_run,
            self.config.auto_execute,
            breaker.is_locked,
            breaker.open_position_count,
            bus.events_published,
        )
    }

    /// Broadcasts the cancellation signal every spawned loop selects on.
    /// Each loop closes its inbound channel, drains anything already queued,
    /// and returns; nothing is force-aborted mid-trade.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutdown requested, signaling background tasks");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }
}
