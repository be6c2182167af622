use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::core::types::SubWallet;
use crate::store::{RelationalStore, StoreError};
use crate::wallet::key_vault::{KeyVault, KeyVaultError};

const MIN_ACTIVE_BALANCE: Decimal = dec!(0.01);
const MAX_TRADES_BEFORE_ROTATION: u32 = 10;
const MAX_SPLIT_COUNT: usize = 5;
const JITTER_FRACTION: f64 = 0.20;

#[derive(Debug, Error)]
pub enum SubWalletPoolError {
    #[error("no active sub-wallet available")]
    NoneAvailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    KeyVault(#[from] KeyVaultError),
    #[error("sub-wallet {0} not found")]
    NotFound(Uuid),
}

/// Ephemeral wallet selection, rotation, and distribution. `acquire` and
/// `mark_used` share one mutex so selection and the counter bump can never
/// race across concurrent callers.
pub struct SubWalletPool {
    store: Arc<RelationalStore>,
    vault: Arc<KeyVault>,
    selection_lock: Mutex<()>,
}

impl SubWalletPool {
    pub fn new(store: Arc<RelationalStore>, vault: Arc<KeyVault>) -> Self {
        Self { store, vault, selection_lock: Mutex::new(()) }
    }

    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<SubWallet, SubWalletPoolError> {
        let _guard = self.selection_lock.lock().await;
        self.acquire_locked().await
    }

    async fn acquire_locked(&self) -> Result<SubWallet, SubWalletPoolError> {
        let candidates = self.store.active_sub_wallets().await?;
        for row in candidates {
            if row.balance_sol < MIN_ACTIVE_BALANCE {
                continue;
            }
            if row.total_trades as u32 >= MAX_TRADES_BEFORE_ROTATION {
                self.store.retire_wallet(row.wallet_id).await?;
                continue;
            }
            return Ok(SubWallet {
                wallet_id: row.wallet_id,
                address: row.address,
                encrypted_key: row.encrypted_key,
                balance_base: row.balance_sol,
                is_active: row.is_active,
                is_retired: row.is_retired,
                trade_counter: row.total_trades as u32,
                created_at: Utc::now(),
                last_used: row.last_used,
            });
        }
        Err(SubWalletPoolError::NoneAvailable)
    }

    /// Splits `total` across up to [`MAX_SPLIT_COUNT`] distinct wallets;
    /// each interior share is `remaining/n` with up to ±20% jitter, the
    /// last wallet receiving the remainder.
    #[instrument(skip(self))]
    pub async fn distribute(&self, total: Decimal) -> Result<Vec<(SubWallet, Decimal)>, SubWalletPoolError> {
        let _guard = self.selection_lock.lock().await;
        let candidates = self.store.active_sub_wallets().await?;
        let n = candidates.len().min(MAX_SPLIT_COUNT);
        if n == 0 {
            return Err(SubWalletPoolError::NoneAvailable);
        }

        let mut shares = Vec::with_capacity(n);
        let mut remaining = total;
        let mut rng = rand::thread_rng();

        for (i, row) in candidates.into_iter().take(n).enumerate() {
            let wallet = SubWallet {
                wallet_id: row.wallet_id,
                address: row.address,
                encrypted_key: row.encrypted_key,
                balance_base: row.balance_sol,
                is_active: row.is_active,
                is_retired: row.is_retired,
                trade_counter: row.total_trades as u32,
                created_at: Utc::now(),
                last_used: row.last_used,
            };

            let is_last = i == n - 1;
            let share = if is_last {
                remaining
            } else {
                let remaining_n = (n - i) as i64;
                let base = remaining / Decimal::from(remaining_n);
                let jitter_pct: f64 = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
                let jitter = base * Decimal::try_from(jitter_pct).unwrap_or(Decimal::ZERO);
                (base + jitter).min(remaining).max(Decimal::ZERO)
            };

            remaining -= share;
            shares.push((wallet, share));
        }

        Ok(shares)
    }

    /// Looks up a sub-wallet's public address without touching the
    /// selection lock; used by the exit loop, which already knows which
    /// wallet holds a given open position.
    pub async fn sub_wallet_address(&self, wallet_id: Uuid) -> Option<String> {
        self.store.sub_wallet_by_id(wallet_id).await.ok().flatten().map(|row| row.address)
    }

    #[instrument(skip(self))]
    pub async fn mark_used(&self, wallet_id: Uuid) -> Result<(), SubWalletPoolError> {
        let _guard = self.selection_lock.lock().await;
        let row = self
            .store
            .sub_wallet_by_id(wallet_id)
            .await?
            .ok_or(SubWalletPoolError::NotFound(wallet_id))?;
        let next_counter = row.total_trades as u32 + 1;
        self.store.mark_wallet_used(wallet_id, next_counter).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create(&self) -> Result<SubWallet, SubWalletPoolError> {
        let signing_key = KeyVault::generate_keypair();
        let address = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
        let encrypted_key = self.vault.encrypt(&signing_key.to_bytes())?;

        let wallet = SubWallet {
            wallet_id: Uuid::new_v4(),
            address,
            encrypted_key,
            balance_base: Decimal::ZERO,
            is_active: true,
            is_retired: false,
            trade_counter: 0,
            created_at: Utc::now(),
            last_used: None,
        };
        self.store.insert_sub_wallet(&wallet).await?;
        info!(address = %wallet.address, "sub-wallet created");
        Ok(wallet)
    }

    /// Loads the encrypted key, decrypts it, signs over `tx_bytes`, and
    /// returns the signature prepended to the transaction bytes. Plaintext
    /// key material never outlives this call's stack frame.
    #[instrument(skip(self, tx_bytes))]
    pub async fn sign(&self, wallet_id: Uuid, tx_bytes: &[u8]) -> Result<Vec<u8>, SubWalletPoolError> {
        let row = self
            .store
            .sub_wallet_by_id(wallet_id)
            .await?
            .ok_or(SubWalletPoolError::NotFound(wallet_id))?;

        let mut secret_bytes = self.vault.decrypt(&row.encrypted_key)?;
        let array: [u8; 32] = secret_bytes
            .clone()
            .try_into()
            .map_err(|_| SubWalletPoolError::KeyVault(KeyVaultError::MalformedBlob))?;
        let signing_key = SigningKey::from_bytes(&array);
        let signature = signing_key.sign(tx_bytes);
        secret_bytes.zeroize();

        let mut signed = Vec::with_capacity(64 + tx_bytes.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(tx_bytes);
        Ok(signed)
    }

    /// Sums the balances of retired wallets into a conceptual transfer to
    /// `dest`, returning the total swept. The actual on-chain sweep
    /// transaction is built by the caller via the router.
    #[instrument(skip(self))]
    pub async fn consolidate(&self, dest: &str) -> Result<Decimal, SubWalletPoolError> {
        let retired = self.store.retired_sub_wallets().await?;
        let retired_total: Decimal = retired.iter().map(|w| w.balance_sol).sum();
        if retired_total > Decimal::ZERO {
            info!(dest, total = %retired_total, "consolidating retired sub-wallets");
        } else {
            warn!(dest, "no retired sub-wallets to consolidate");
        }
        Ok(retired_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_spec_defaults() {
        assert_eq!(MAX_TRADES_BEFORE_ROTATION, 10);
        assert_eq!(MAX_SPLIT_COUNT, 5);
        assert_eq!(MIN_ACTIVE_BALANCE, dec!(0.01));
    }
}
