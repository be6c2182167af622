use std::collections::HashMap;

use chrono::{DateTime, Utc};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Directed;
use tokio::sync::RwLock;
use tracing::instrument;

/// A node in the wallet/cluster relationship graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphNode {
    Wallet(String),
    Cluster(String),
    /// Synthetic node for a CEX hot wallet, keyed by exchange name.
    CexSource(String),
}

#[derive(Debug, Clone)]
pub enum GraphEdge {
    FundedBy {
        amount_delta_pct_known: bool,
        timestamp: DateTime<Utc>,
        match_score: f64,
        tx_hash: String,
    },
    CorrelatedWith {
        score: f64,
        shared_contracts: usize,
        time_proximity_avg_ms: f64,
        co_occurrence_count: u64,
    },
    MemberOf,
}

/// In-process representation of the graph store's cyclic wallet/cluster
/// relationships. Single lock, no back-pointers: a `StableGraph` plus an
/// address → node-index index is enough for the queries the pipeline needs.
pub struct GraphStore {
    inner: RwLock<Inner>,
}

struct Inner {
    graph: StableGraph<GraphNode, GraphEdge, Directed>,
    index: HashMap<GraphNode, NodeIndex>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                graph: StableGraph::new(),
                index: HashMap::new(),
            }),
        }
    }

    async fn node_index(inner: &mut Inner, node: GraphNode) -> NodeIndex {
        if let Some(idx) = inner.index.get(&node) {
            return *idx;
        }
        let idx = inner.graph.add_node(node.clone());
        inner.index.insert(node, idx);
        idx
    }

    #[instrument(skip(self))]
    pub async fn link_funded_by(
        &self,
        fresh_wallet: &str,
        cex_name: &str,
        timestamp: DateTime<Utc>,
        match_score: f64,
        tx_hash: String,
    ) {
        let mut inner = self.inner.write().await;
        let wallet_idx = Self::node_index(&mut inner, GraphNode::Wallet(fresh_wallet.to_string())).await;
        let cex_idx = Self::node_index(&mut inner, GraphNode::CexSource(cex_name.to_string())).await;
        inner.graph.add_edge(
            wallet_idx,
            cex_idx,
            GraphEdge::FundedBy {
                amount_delta_pct_known: true,
                timestamp,
                match_score,
                tx_hash,
            },
        );
    }

    #[instrument(skip(self))]
    pub async fn upsert_correlated_with(
        &self,
        wallet_a: &str,
        wallet_b: &str,
        score: f64,
        shared_contracts: usize,
        time_proximity_avg_ms: f64,
        co_occurrence_count: u64,
    ) {
        let mut inner = self.inner.write().await;
        let a_idx = Self::node_index(&mut inner, GraphNode::Wallet(wallet_a.to_string())).await;
        let b_idx = Self::node_index(&mut inner, GraphNode::Wallet(wallet_b.to_string())).await;
        if let Some(edge) = inner.graph.find_edge(a_idx, b_idx) {
            inner.graph.remove_edge(edge);
        }
        inner.graph.add_edge(
            a_idx,
            b_idx,
            GraphEdge::CorrelatedWith {
                score,
                shared_contracts,
                time_proximity_avg_ms,
                co_occurrence_count,
            },
        );
    }

    #[instrument(skip(self))]
    pub async fn link_member_of(&self, wallet: &str, cluster_id: &str) {
        let mut inner = self.inner.write().await;
        let wallet_idx = Self::node_index(&mut inner, GraphNode::Wallet(wallet.to_string())).await;
        let cluster_idx = Self::node_index(&mut inner, GraphNode::Cluster(cluster_id.to_string())).await;
        if inner.graph.find_edge(wallet_idx, cluster_idx).is_none() {
            inner.graph.add_edge(wallet_idx, cluster_idx, GraphEdge::MemberOf);
        }
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.graph.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.graph.edge_count()
    }

    /// All wallets directly correlated with `wallet`, for graph-backed
    /// cluster-membership lookups.
    pub async fn correlated_neighbors(&self, wallet: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let Some(&idx) = inner.index.get(&GraphNode::Wallet(wallet.to_string())) else {
            return Vec::new();
        };
        inner
            .graph
            .neighbors(idx)
            .filter_map(|n| match inner.graph.node_weight(n) {
                Some(GraphNode::Wallet(addr)) => Some(addr.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn funded_by_edge_creates_both_nodes() {
        let store = GraphStore::new();
        store
            .link_funded_by("walletX", "Binance", Utc::now(), 0.95, "0xabc".into())
            .await;
        assert_eq!(store.node_count().await, 2);
        assert_eq!(store.edge_count().await, 1);
    }

    #[tokio::test]
    async fn correlated_with_is_queryable_from_either_side() {
        let store = GraphStore::new();
        store
            .upsert_correlated_with("A", "B", 0.8, 5, 100.0, 3)
            .await;
        let neighbors = store.correlated_neighbors("A").await;
        assert_eq!(neighbors, vec!["B".to_string()]);
    }
}
