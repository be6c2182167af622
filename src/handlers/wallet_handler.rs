use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::store::RelationalStore;
use crate::wallet::key_vault::{KeyVault, KeyVaultError};
use crate::wallet::sub_wallet_pool::SubWalletPool;

/// Owns key custody and sub-wallet rotation.
pub struct WalletHandler {
    pub vault: Arc<KeyVault>,
    pub pool: Arc<SubWalletPool>,
}

impl WalletHandler {
    pub fn init(config: &AppConfig, store: Arc<RelationalStore>) -> Result<Self, KeyVaultError> {
        let vault = Arc::new(KeyVault::new(&config.key_encryption_secret)?);
        let pool = Arc::new(SubWalletPool::new(store, Arc::clone(&vault)));
        Ok(Self { vault, pool })
    }
}
