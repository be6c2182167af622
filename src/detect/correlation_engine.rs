use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument};
use ulid::Ulid;

use crate::core::types::{ClusterState, CorrelationEvent, CorrelationResult, WalletCluster};
use crate::store::{GraphStore, RelationalStore, StoreError};

/// Cluster membership no longer grows once decayed, but decay here only
/// affects reporting; the cluster itself is never deleted from the graph.
pub const MIN_CLUSTER_SIZE: usize = 3;
const SLOT_WINDOW: u64 = 10;
const WEIGHT_TIME: f64 = 0.4;
const WEIGHT_ORDER: f64 = 0.3;
const WEIGHT_HISTORY: f64 = 0.3;
const MIN_PAIRWISE_CORRELATION: f64 = 0.6;
const SHARED_CONTRACT_SATURATION: usize = 5;
const CONFIDENCE_ESCALATION_BASE: f64 = 0.1;
const RING_BUFFER_SLOTS: u64 = 100;
const CANDIDATE_CAP: usize = 50;
const SLOT_MS: f64 = 400.0;

/// Streaming detector for wallets coordinating on the same contract within
/// a narrow slot window. Holds the last 100 slots' worth of events as an
/// in-memory cache and maintains clusters keyed by wallet membership.
pub struct CorrelationEngine {
    monitored_programs: Mutex<std::collections::HashSet<String>>,
    slot_cache: Mutex<HashMap<u64, Vec<CorrelationEvent>>>,
    slot_order: Mutex<VecDeque<u64>>,
    clusters: Mutex<HashMap<String, WalletCluster>>,
    wallet_cluster_index: Mutex<HashMap<String, String>>,
    sender: broadcast::Sender<CorrelationResult>,
    store: Arc<RelationalStore>,
    graph: Arc<GraphStore>,
}

impl CorrelationEngine {
    pub fn new(monitored_programs: Vec<String>, store: Arc<RelationalStore>, graph: Arc<GraphStore>) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            monitored_programs: Mutex::new(monitored_programs.into_iter().collect()),
            slot_cache: Mutex::new(HashMap::new()),
            slot_order: Mutex::new(VecDeque::new()),
            clusters: Mutex::new(HashMap::new()),
            wallet_cluster_index: Mutex::new(HashMap::new()),
            sender,
            store,
            graph,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CorrelationResult> {
        self.sender.subscribe()
    }

    pub async fn cluster(&self, cluster_id: &str) -> Option<WalletCluster> {
        self.clusters.lock().await.get(cluster_id).cloned()
    }

    /// Pairwise correlation between two co-occurring events, per the fixed
    /// 0.4/0.3/0.3 weighting. `order_bias` is `count(a_before_b)/total` over
    /// historical pairings (0.5 with no history); `shared_contract_count` is
    /// the number of distinct contracts the pair has co-touched recently.
    pub fn pairwise_score(
        delta_t_ms: i64,
        order_bias: f64,
        shared_contract_count: usize,
    ) -> f64 {
        let s_time = 1.0 - ((delta_t_ms.unsigned_abs() as f64) / (SLOT_WINDOW as f64 * SLOT_MS)).clamp(0.0, 1.0);
        let s_order = 2.0 * (order_bias - 0.5).abs();
        let s_hist = (shared_contract_count as f64 / SHARED_CONTRACT_SATURATION as f64).min(1.0);
        (WEIGHT_TIME * s_time + WEIGHT_ORDER * s_order + WEIGHT_HISTORY * s_hist).clamp(0.0, 1.0)
    }

    #[instrument(skip(self, event), fields(contract = %event.contract, wallet = %event.wallet, slot = event.slot))]
    pub async fn process_event(&self, event: CorrelationEvent) -> Result<Vec<CorrelationResult>, StoreError> {
        if !self.monitored_programs.lock().await.contains(&event.contract) {
            return Ok(Vec::new());
        }

        self.cache_event(event.clone()).await;

        let candidates = self.candidates_near(&event).await;
        let distinct_wallets: std::collections::HashSet<&str> =
            candidates.iter().map(|c| c.wallet.as_str()).collect();
        if distinct_wallets.len() < MIN_CLUSTER_SIZE {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for other in candidates.iter().filter(|c| c.wallet != event.wallet) {
            let delta_t_ms = (other.timestamp - event.timestamp).num_milliseconds();
            // No durable pairing history available without an extra store
            // round trip per pair; default to the "no history" midpoint.
            let order_bias = 0.5;
            let shared_contracts = self.shared_contracts_recent(&event.wallet, &other.wallet).await;
            let score = Self::pairwise_score(delta_t_ms, order_bias, shared_contracts.len());

            if score >= MIN_PAIRWISE_CORRELATION {
                let result = CorrelationResult {
                    wallet_a: event.wallet.clone(),
                    wallet_b: other.wallet.clone(),
                    score,
                    shared_contracts: shared_contracts.clone(),
                    avg_time_proximity_ms: delta_t_ms.abs() as f64,
                    co_occurrence_count: shared_contracts.len() as u64,
                    triggering_contract: event.contract.clone(),
                };
                self.graph
                    .upsert_correlated_with(
                        &event.wallet,
                        &other.wallet,
                        score,
                        shared_contracts.len(),
                        delta_t_ms.abs() as f64,
                        shared_contracts.len() as u64,
                    )
                    .await;
                let cluster_id = self.merge_cluster(&event.wallet, &other.wallet, &event.contract, score).await;
                self.escalate_confidence(&cluster_id).await?;
                let _ = self.sender.send(result.clone());
                results.push(result);
            }
        }

        if let Some(cluster_id) = self.wallet_cluster_index.lock().await.get(&event.wallet).cloned() {
            if let Some(cluster) = self.clusters.lock().await.get(&cluster_id).cloned() {
                if cluster.size() >= MIN_CLUSTER_SIZE {
                    info!(cluster_id = %cluster.cluster_id, size = cluster.size(), "cabal signal ready");
                }
            }
        }

        Ok(results)
    }

    async fn cache_event(&self, event: CorrelationEvent) {
        let mut cache = self.slot_cache.lock().await;
        let mut order = self.slot_order.lock().await;
        cache.entry(event.slot).or_default().push(event.clone());
        if !order.contains(&event.slot) {
            order.push_back(event.slot);
            if order.len() > RING_BUFFER_SLOTS as usize {
                if let Some(oldest) = order.pop_front() {
                    cache.remove(&oldest);
                }
            }
        }
        self.store.record_tx_event(&crate::core::types::ChainEvent {
            kind: crate::core::types::EventKind::ProgramInteraction,
            tx_id: event.tx_id,
            slot: event.slot,
            timestamp: event.timestamp,
            wallet: event.wallet,
            program_id: Some(event.contract),
            input_mint: None,
            output_mint: None,
            input_amount: None,
            output_amount: None,
            fee_lamports: None,
        }, None).await.ok();
    }

    async fn candidates_near(&self, event: &CorrelationEvent) -> Vec<CorrelationEvent> {
        let cache = self.slot_cache.lock().await;
        let lo = event.slot.saturating_sub(SLOT_WINDOW);
        let hi = event.slot + SLOT_WINDOW;
        let mut found: Vec<CorrelationEvent> = Vec::new();
        for slot in lo..=hi {
            if let Some(events) = cache.get(&slot) {
                found.extend(events.iter().filter(|e| e.contract == event.contract).cloned());
            }
        }
        found.truncate(CANDIDATE_CAP);
        found
    }

    async fn shared_contracts_recent(&self, wallet_a: &str, wallet_b: &str) -> Vec<String> {
        let cache = self.slot_cache.lock().await;
        let mut contracts: std::collections::HashSet<String> = std::collections::HashSet::new();
        for events in cache.values() {
            let a_contracts: std::collections::HashSet<&str> =
                events.iter().filter(|e| e.wallet == wallet_a).map(|e| e.contract.as_str()).collect();
            let b_contracts: std::collections::HashSet<&str> =
                events.iter().filter(|e| e.wallet == wallet_b).map(|e| e.contract.as_str()).collect();
            for c in a_contracts.intersection(&b_contracts) {
                contracts.insert(c.to_string());
            }
        }
        contracts.into_iter().collect()
    }

    async fn merge_cluster(&self, wallet_a: &str, wallet_b: &str, contract: &str, score: f64) -> String {
        let mut index = self.wallet_cluster_index.lock().await;
        let mut clusters = self.clusters.lock().await;

        let existing_id = index
            .get(wallet_a)
            .or_else(|| index.get(wallet_b))
            .cloned();

        let cluster_id = existing_id.unwrap_or_else(|| Ulid::new().to_string());

        let now = Utc::now();
        let cluster = clusters.entry(cluster_id.clone()).or_insert_with(|| WalletCluster {
            cluster_id: cluster_id.clone(),
            wallets: Vec::new(),
            shared_contracts: Vec::new(),
            created_at: now,
            updated_at: now,
            avg_correlation: score,
            total_interactions: 0,
        });

        for wallet in [wallet_a, wallet_b] {
            if !cluster.wallets.contains(&wallet.to_string()) {
                cluster.wallets.push(wallet.to_string());
            }
        }
        if !cluster.shared_contracts.contains(&contract.to_string()) {
            cluster.shared_contracts.push(contract.to_string());
        }
        cluster.total_interactions += 1;
        let n = cluster.total_interactions as f64;
        cluster.avg_correlation = ((cluster.avg_correlation * (n - 1.0)) + score) / n;
        cluster.updated_at = now;

        for wallet in [wallet_a, wallet_b] {
            index.insert(wallet.to_string(), cluster_id.clone());
            self.graph.link_member_of(wallet, &cluster_id).await;
        }

        cluster_id
    }

    async fn escalate_confidence(&self, cluster_id: &str) -> Result<(), StoreError> {
        let cluster = self.clusters.lock().await.get(cluster_id).cloned();
        let Some(cluster) = cluster else { return Ok(()) };
        let delta = CONFIDENCE_ESCALATION_BASE * (cluster.size() as f64 / 10.0);
        for wallet in &cluster.wallets {
            self.store.bump_wallet_confidence(wallet, delta).await?;
        }
        Ok(())
    }

    pub fn state_of(cluster: &WalletCluster, decayed: bool) -> ClusterState {
        cluster.state(decayed)
    }

    /// The cluster a wallet currently belongs to, if any.
    pub async fn cluster_for_wallet(&self, wallet: &str) -> Option<WalletCluster> {
        let cluster_id = self.wallet_cluster_index.lock().await.get(wallet).cloned()?;
        self.clusters.lock().await.get(&cluster_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_score_rewards_close_timing() {
        let close = CorrelationEngine::pairwise_score(100, 0.5, 5);
        let far = CorrelationEngine::pairwise_score(3900, 0.5, 5);
        assert!(close > far);
    }

    #[test]
    fn pairwise_score_crosses_min_threshold_for_tight_cluster() {
        let score = CorrelationEngine::pairwise_score(0, 0.9, 5);
        assert!(score >= MIN_PAIRWISE_CORRELATION);
    }

    #[test]
    fn min_cluster_size_is_fixed_to_three() {
        assert_eq!(MIN_CLUSTER_SIZE, 3);
    }
}
