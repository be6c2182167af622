use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::store::RelationalStore;

/// Mapping from exchange hot-wallet address to exchange display name,
/// refreshed periodically from `tracked_wallets` so new CEX addresses
/// surface without a restart.
pub struct CexRegistry {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl CexRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn seeded(entries: HashMap<String, String>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub async fn is_known(&self, address: &str) -> bool {
        self.entries.read().await.contains_key(address)
    }

    pub async fn name_of(&self, address: &str) -> Option<String> {
        self.entries.read().await.get(address).cloned()
    }

    #[instrument(skip(self, store))]
    pub async fn refresh(&self, store: &RelationalStore) -> Result<(), crate::store::StoreError> {
        let rows = store.all_tracked_wallets().await?;
        let mut next = HashMap::new();
        for row in rows {
            if row.category == "cex_hot_wallet" {
                let name = row
                    .metadata
                    .get("exchange_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                next.insert(row.address, name);
            }
        }
        let count = next.len();
        *self.entries.write().await = next;
        info!(count, "CEX registry refreshed");
        Ok(())
    }

    pub async fn insert(&self, address: String, name: String) {
        self.entries.write().await.insert(address, name);
    }
}

impl Default for CexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_lookup_reflects_inserted_entries() {
        let registry = CexRegistry::new();
        registry.insert("hot1".into(), "Binance".into()).await;
        assert!(registry.is_known("hot1").await);
        assert_eq!(registry.name_of("hot1").await, Some("Binance".into()));
        assert!(!registry.is_known("hot2").await);
    }
}
