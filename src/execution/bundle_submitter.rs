use std::sync::Arc;

use rand::seq::SliceRandom;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

const MAX_BUNDLE_SIZE: usize = 5;
const DEFAULT_TIP_LAMPORTS: u64 = 10_000;
const MIN_TIP_LAMPORTS: u64 = 1_000;
const MAX_TIP_LAMPORTS: u64 = 1_000_000_000;
const BUNDLE_TIMEOUT_SECS: u64 = 60;
const BASELINE_PRIORITIZATION_FEE_MICROLAMPORTS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum BundleSubmitterError {
    #[error("bundle exceeds max size of {MAX_BUNDLE_SIZE}")]
    TooManyTransactions,
    #[error("no tip account configured")]
    NoTipAccount,
    #[error("bundle endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bundle endpoint returned an error: {0}")]
    EndpointError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    Landed { slot: u64 },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct BundleResult {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub tip_paid: u64,
    pub tip_account: Pubkey,
}

/// Submits up to [`MAX_BUNDLE_SIZE`] transactions as one MEV-protected
/// bundle. Tip accounts are refreshable from the upstream provider.
pub struct BundleSubmitter {
    client: reqwest::Client,
    bundle_url: String,
    tip_accounts: RwLock<Vec<Pubkey>>,
}

impl BundleSubmitter {
    pub fn new(bundle_url: String, tip_accounts: Vec<Pubkey>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(BUNDLE_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
            bundle_url,
            tip_accounts: RwLock::new(tip_accounts),
        }
    }

    #[instrument(skip(self))]
    pub async fn refresh_tip_accounts(&self) -> Result<(), BundleSubmitterError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTipAccounts",
            "params": [],
        });
        #[derive(serde::Deserialize)]
        struct RpcResponse {
            result: Vec<String>,
        }
        let resp = self.client.post(&self.bundle_url).json(&body).send().await?;
        let parsed: RpcResponse = resp.json().await?;
        let accounts: Vec<Pubkey> = parsed
            .result
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        if !accounts.is_empty() {
            let count = accounts.len();
            *self.tip_accounts.write().await = accounts;
            info!(count, "tip accounts refreshed");
        }
        Ok(())
    }

    /// Recent average prioritization fee, expressed as a multiplier of the
    /// baseline congestion assumed by [`Self::calculate_tip`]. `None` (no
    /// RPC data) reads as calm network conditions.
    pub fn congestion_from_priority_fee(recent_fee: Option<u64>) -> f64 {
        match recent_fee {
            Some(fee) if fee > 0 => fee as f64 / BASELINE_PRIORITIZATION_FEE_MICROLAMPORTS as f64,
            _ => 1.0,
        }
    }

    /// `tip = clamp(T_default * 2^(urgency-1) * (1 + 0.5*(size-1)) * max(1, congestion), T_min, T_max)`.
    pub fn calculate_tip(urgency: u8, bundle_size: usize, congestion: f64) -> u64 {
        let urgency_factor = 2f64.powi((urgency.saturating_sub(1)) as i32);
        let size_factor = 1.0 + 0.5 * ((bundle_size.max(1) - 1) as f64);
        let raw = DEFAULT_TIP_LAMPORTS as f64 * urgency_factor * size_factor * congestion.max(1.0);
        (raw as u64).clamp(MIN_TIP_LAMPORTS, MAX_TIP_LAMPORTS)
    }

    #[instrument(skip(self))]
    pub async fn build_tip_instruction(
        &self,
        payer: &Pubkey,
        lamports: u64,
    ) -> Result<Instruction, BundleSubmitterError> {
        let accounts = self.tip_accounts.read().await;
        let tip_account = accounts
            .choose(&mut rand::thread_rng())
            .ok_or(BundleSubmitterError::NoTipAccount)?;
        let clamped = lamports.clamp(MIN_TIP_LAMPORTS, MAX_TIP_LAMPORTS);
        Ok(system_instruction::transfer(payer, tip_account, clamped))
    }

    /// Decompiles the aggregator-built unsigned swap transaction back into
    /// its instructions, appends `tip_instruction` as the last one, and
    /// recompiles a fresh unsigned transaction against `payer`. The tip
    /// must land inside the same transaction that lands the swap/sell, not
    /// as a sibling entry in the bundle.
    pub fn append_tip_instruction(
        unsigned_tx_bytes: &[u8],
        payer: &Pubkey,
        tip_instruction: Instruction,
    ) -> Result<Vec<u8>, BundleSubmitterError> {
        let tx: Transaction = bincode::deserialize(unsigned_tx_bytes)
            .map_err(|_| BundleSubmitterError::EndpointError("malformed swap transaction".to_string()))?;
        let message = &tx.message;
        let mut instructions: Vec<Instruction> = message
            .instructions
            .iter()
            .map(|compiled| Instruction {
                program_id: message.account_keys[compiled.program_id_index as usize],
                accounts: compiled
                    .accounts
                    .iter()
                    .map(|&idx| AccountMeta {
                        pubkey: message.account_keys[idx as usize],
                        is_signer: message.is_signer(idx as usize),
                        is_writable: message.is_maybe_writable(idx as usize, None),
                    })
                    .collect(),
                data: compiled.data.clone(),
            })
            .collect();
        instructions.push(tip_instruction);

        let new_message = Message::new(&instructions, Some(payer));
        let unsigned = Transaction::new_unsigned(new_message);
        bincode::serialize(&unsigned)
            .map_err(|_| BundleSubmitterError::EndpointError("failed to serialize transaction with tip".to_string()))
    }

    #[instrument(skip(self, signed_transactions))]
    pub async fn submit(
        &self,
        signed_transactions: &[Vec<u8>],
        tip_hint: u64,
    ) -> Result<BundleResult, BundleSubmitterError> {
        if signed_transactions.len() > MAX_BUNDLE_SIZE {
            return Err(BundleSubmitterError::TooManyTransactions);
        }
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let encoded: Vec<String> = signed_transactions.iter().map(|tx| STANDARD.encode(tx)).collect();

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [encoded],
        });
        let resp = self.client.post(&self.bundle_url).json(&body).send().await?;

        #[derive(serde::Deserialize)]
        struct RpcResponse {
            result: Option<String>,
            error: Option<serde_json::Value>,
        }
        let parsed: RpcResponse = resp.json().await?;

        if let Some(err) = parsed.error {
            warn!(?err, "bundle submission rejected");
            return Err(BundleSubmitterError::EndpointError(err.to_string()));
        }
        let bundle_id = parsed.result.ok_or_else(|| {
            BundleSubmitterError::EndpointError("missing bundle id in response".to_string())
        })?;

        let accounts = self.tip_accounts.read().await;
        let tip_account = *accounts.first().unwrap_or(&Pubkey::default());

        Ok(BundleResult {
            bundle_id,
            status: BundleStatus::Pending,
            tip_paid: tip_hint,
            tip_account,
        })
    }

    #[instrument(skip(self))]
    pub async fn status(&self, bundle_id: &str) -> Result<BundleStatus, BundleSubmitterError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        });
        #[derive(serde::Deserialize)]
        struct StatusEntry {
            confirmation_status: Option<String>,
            slot: Option<u64>,
            err: Option<serde_json::Value>,
        }
        #[derive(serde::Deserialize)]
        struct StatusValue {
            value: Vec<Option<StatusEntry>>,
        }
        #[derive(serde::Deserialize)]
        struct RpcResponse {
            result: StatusValue,
        }

        let resp = self.client.post(&self.bundle_url).json(&body).send().await?;
        let parsed: RpcResponse = resp.json().await?;

        match parsed.result.value.into_iter().next().flatten() {
            None => Ok(BundleStatus::Pending),
            Some(entry) => {
                if let Some(err) = entry.err {
                    return Ok(BundleStatus::Failed { reason: err.to_string() });
                }
                match entry.confirmation_status.as_deref() {
                    Some("finalized") => Ok(BundleStatus::Landed { slot: entry.slot.unwrap_or_default() }),
                    _ => Ok(BundleStatus::Pending),
                }
            }
        }
    }
}

pub type SharedBundleSubmitter = Arc<BundleSubmitter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_scales_with_urgency_and_size() {
        let low = BundleSubmitter::calculate_tip(1, 1, 1.0);
        let high = BundleSubmitter::calculate_tip(5, 3, 1.0);
        assert_eq!(low, DEFAULT_TIP_LAMPORTS);
        assert!(high > low);
    }

    #[test]
    fn tip_is_clamped_to_bounds() {
        let capped = BundleSubmitter::calculate_tip(10, 5, 1000.0);
        assert_eq!(capped, MAX_TIP_LAMPORTS);
    }

    #[test]
    fn congestion_defaults_to_calm_when_fee_missing() {
        assert_eq!(BundleSubmitter::congestion_from_priority_fee(None), 1.0);
        assert_eq!(BundleSubmitter::congestion_from_priority_fee(Some(0)), 1.0);
    }

    #[test]
    fn congestion_scales_with_recent_fee() {
        let congestion = BundleSubmitter::congestion_from_priority_fee(Some(5_000));
        assert_eq!(congestion, 5.0);
    }
}
