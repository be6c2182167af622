use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of on-chain action a [`ChainEvent`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Swap,
    Transfer,
    ProgramInteraction,
}

/// Immutable record of one on-chain action, produced by the Normalizer.
///
/// Never mutated after construction; detectors only ever read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub kind: EventKind,
    pub tx_id: String,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
    pub wallet: String,
    pub program_id: Option<String>,
    pub input_mint: Option<String>,
    pub output_mint: Option<String>,
    pub input_amount: Option<Decimal>,
    pub output_amount: Option<Decimal>,
    pub fee_lamports: Option<u64>,
}

/// One side of a balance change observed within a transaction, used by
/// [`crate::detect::withdrawal_detector`] to locate CEX withdrawal legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub account: String,
    pub mint: Option<String>,
    pub delta: Decimal,
}

/// Refinement of [`ChainEvent`] for a recognized exchange-to-user transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub tx_id: String,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
    pub source_exchange_wallet: String,
    pub source_exchange_name: String,
    pub recipient_wallet: String,
    pub amount: Decimal,
    pub decimals: u8,
    pub recipient_prior_tx_count: u32,
}

impl WithdrawalEvent {
    pub fn is_fresh_funding(&self) -> bool {
        self.recipient_prior_tx_count == 0
    }
}

/// Projection of a [`ChainEvent`] used by the [`crate::detect::correlation_engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEvent {
    pub contract: String,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
    pub wallet: String,
    pub tx_id: String,
    pub action: String,
}

/// Lifecycle state of a [`WalletCluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    Forming,
    Active,
    Decayed,
}

/// Derived entity maintained by the [`crate::detect::correlation_engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCluster {
    pub cluster_id: String,
    pub wallets: Vec<String>,
    pub shared_contracts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub avg_correlation: f64,
    pub total_interactions: u64,
}

impl WalletCluster {
    pub fn size(&self) -> usize {
        self.wallets.len()
    }

    /// A cluster is an active cabal once it has at least three members,
    /// touches at least five shared contracts, and its average pairwise
    /// correlation is at least 0.70.
    pub fn is_active_cabal(&self) -> bool {
        self.size() >= 3 && self.shared_contracts.len() >= 5 && self.avg_correlation >= 0.70
    }

    pub fn state(&self, decayed: bool) -> ClusterState {
        if decayed {
            ClusterState::Decayed
        } else if self.is_active_cabal() {
            ClusterState::Active
        } else {
            ClusterState::Forming
        }
    }
}

/// Undirected edge between two wallets emitted by the correlation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub wallet_a: String,
    pub wallet_b: String,
    pub score: f64,
    pub shared_contracts: Vec<String>,
    pub avg_time_proximity_ms: f64,
    pub co_occurrence_count: u64,
    pub triggering_contract: String,
}

/// Persisted link between a CEX withdrawal and a freshly-funded wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshWalletMatch {
    pub withdrawal_tx: String,
    pub funded_wallet: String,
    pub time_delta_ms: i64,
    pub amount_delta_pct: Decimal,
    pub score: f64,
    pub parent_cluster_id: Option<String>,
}

/// Source of a [`TradeSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Cabal,
    Influencer,
    FreshWallet,
    Perps,
    Hybrid,
    Manual,
}

/// Ephemeral decision unit flowing from detectors into the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub signal_id: Uuid,
    pub source: SignalSource,
    pub source_id: String,
    pub target_token_mint: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Exit tier label for the tiered-exit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitTier {
    T1,
    T2,
    T3,
    Sl,
    Panic,
}

impl ExitTier {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ExitTier::T1 => "T1",
            ExitTier::T2 => "T2",
            ExitTier::T3 => "T3",
            ExitTier::Sl => "SL",
            ExitTier::Panic => "PANIC",
        }
    }
}

/// In-memory record of one open trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: Uuid,
    pub token_mint: String,
    pub sub_wallet_id: Uuid,
    pub sub_wallet_address: String,
    pub entry_price: Decimal,
    pub token_amount_at_entry: Decimal,
    pub remaining_fraction: Decimal,
    pub entry_time: DateTime<Utc>,
    pub last_observed_price: Decimal,
    pub source: SignalSource,
}

impl Position {
    pub const CLOSE_THRESHOLD: &'static str = "0.01";

    pub fn is_closed(&self) -> bool {
        self.remaining_fraction < Decimal::new(1, 2) // 0.01
    }
}

/// Status of a [`TradeLog`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
    StoppedOut,
    Rugged,
    PanicSold,
}

/// Durable row for each trade, entry and exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLog {
    pub trade_id: Uuid,
    pub signal_source: SignalSource,
    pub signal_id: Uuid,
    pub token_mint: String,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub position_size_token: Decimal,
    pub position_size_base: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_tier: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub pnl_pct: Option<Decimal>,
    pub fees_paid: Decimal,
    pub status: TradeStatus,
    pub failure_reason: Option<String>,
    pub sub_wallet_address: String,
    pub bundle_id: Option<String>,
    pub slippage_expected: Option<Decimal>,
    pub slippage_actual: Option<Decimal>,
}

/// Per-signal-source aggregate, derived purely by folding closed [`TradeLog`] rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source_id: String,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
    pub best_trade_pnl: Option<Decimal>,
    pub worst_trade_pnl: Option<Decimal>,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }
}

/// Risk classification assigned by the [`crate::simulate::simulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Safe,
    Caution,
    HighRisk,
    Honeypot,
    Unknown,
}

/// Per-token cached safety verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub token_mint: String,
    pub buy_success: bool,
    pub sell_success: bool,
    pub transfer_blocked: bool,
    pub sell_blocked: bool,
    pub buy_tax: Decimal,
    pub sell_tax: Decimal,
    pub is_honeypot: bool,
    pub risk_class: RiskClass,
    pub sim_time: DateTime<Utc>,
}

/// Singleton circuit-breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub lock_until: Option<DateTime<Utc>>,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub consecutive_losses: u32,
    pub open_position_count: u32,
    pub total_exposure: Decimal,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            is_locked: false,
            lock_reason: None,
            lock_until: None,
            daily_pnl: Decimal::ZERO,
            daily_pnl_pct: Decimal::ZERO,
            consecutive_losses: 0,
            open_position_count: 0,
            total_exposure: Decimal::ZERO,
            last_trade_time: None,
        }
    }
}

/// An ephemeral signing wallet managed by the [`crate::wallet::sub_wallet_pool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWallet {
    pub wallet_id: Uuid,
    pub address: String,
    pub encrypted_key: String,
    pub balance_base: Decimal,
    pub is_active: bool,
    pub is_retired: bool,
    pub trade_counter: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}
