use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rust_decimal::Decimal;
use serde::Deserialize;
use solana_sdk::hash::Hash;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::str::FromStr;
use thiserror::Error;
use tracing::{instrument, warn};

const SLIPPAGE_MAX_BPS: u32 = 1000;
const QUOTE_TIMEOUT_SECS: u64 = 30;
const TRANSFER_PROBE_UNITS: u64 = 1;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no route available for {input_mint} -> {output_mint}")]
    NoRoute { input_mint: String, output_mint: String },
    #[error("quote request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("quote deadline exceeded")]
    Timeout,
    #[error("malformed swap transaction response")]
    MalformedResponse,
}

/// Best available route for a quoted swap. The route payload is opaque:
/// this system never interprets it, only forwards it back to request the
/// unsigned transaction.
#[derive(Debug, Clone)]
pub struct Route {
    pub out_amount: Decimal,
    pub price_impact_pct: Decimal,
    pub route_payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "inAmount")]
    #[allow(dead_code)]
    in_amount: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
    #[serde(rename = "priceImpactPct")]
    price_impact_pct: String,
    #[serde(flatten)]
    route_payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

#[derive(Debug, Deserialize)]
struct SimulateTransactionResponse {
    result: SimulateTransactionResult,
}

#[derive(Debug, Deserialize)]
struct SimulateTransactionResult {
    value: SimulateTransactionValue,
}

#[derive(Debug, Deserialize)]
struct SimulateTransactionValue {
    err: Option<serde_json::Value>,
}

/// I/O-only client to the upstream DEX aggregator. Never interprets the
/// route payload it receives, only relays it for `build_transaction`.
#[async_trait]
pub trait QuoteClient: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_base_units: u64,
        urgency: u8,
    ) -> Result<Route, RouterError>;

    async fn build_transaction(
        &self,
        route: &Route,
        user_public_key: &str,
    ) -> Result<Vec<u8>, RouterError>;

    async fn recent_prioritization_fee(&self) -> Option<u64>;

    /// Independent honeypot probe distinct from the buy/sell quote legs:
    /// builds a throwaway self-transfer of `token_mint` and asks the
    /// cluster to simulate it. A transfer-hook or denylist program that
    /// blocks moves between ordinary token accounts surfaces here even
    /// when the DEX still quotes a route for both swap legs.
    async fn simulate_transfer(&self, token_mint: &str) -> Result<bool, RouterError>;
}

pub struct DexRouter {
    client: reqwest::Client,
    quote_base_url: String,
    rpc_url: String,
}

impl DexRouter {
    pub fn new(quote_base_url: String, rpc_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(QUOTE_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
            quote_base_url,
            rpc_url,
        }
    }

    fn slippage_bps_for(urgency: u8) -> u32 {
        let base = 50.0;
        let scaled = base * (1.0 + 0.2 * (urgency.saturating_sub(1) as f64));
        (scaled as u32).min(SLIPPAGE_MAX_BPS)
    }

    /// The probe's accounts never hold real balance, so `AccountNotFound` /
    /// `InsufficientFunds` are expected noise, not a honeypot signal. Only a
    /// custom program error surfacing from the token account's own transfer
    /// path (a transfer-hook or denylist rejecting the move) counts as blocked.
    fn is_transfer_blocked(value: &SimulateTransactionValue) -> bool {
        let Some(err) = &value.err else {
            return false;
        };
        let text = err.to_string();
        !(text.contains("AccountNotFound") || text.contains("InsufficientFunds"))
    }
}

#[async_trait]
impl QuoteClient for DexRouter {
    #[instrument(skip(self))]
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_base_units: u64,
        urgency: u8,
    ) -> Result<Route, RouterError> {
        let slippage_bps = Self::slippage_bps_for(urgency);
        let url = format!(
            "{}/quote?inputMint={input_mint}&outputMint={output_mint}&amount={amount_base_units}&slippageBps={slippage_bps}",
            self.quote_base_url
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "quote request rejected");
            return Err(RouterError::NoRoute {
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
            });
        }
        let parsed: QuoteResponse = resp.json().await?;
        let out_amount: Decimal = parsed.out_amount.parse().map_err(|_| RouterError::MalformedResponse)?;
        let price_impact_pct: Decimal =
            parsed.price_impact_pct.parse().map_err(|_| RouterError::MalformedResponse)?;
        Ok(Route {
            out_amount,
            price_impact_pct,
            route_payload: parsed.route_payload,
        })
    }

    #[instrument(skip(self, route))]
    async fn build_transaction(&self, route: &Route, user_public_key: &str) -> Result<Vec<u8>, RouterError> {
        let body = serde_json::json!({
            "quoteResponse": route.route_payload,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "prioritizationFeeLamports": "auto",
            "dynamicComputeUnitLimit": true,
        });
        let url = format!("{}/swap", self.quote_base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        let parsed: SwapResponse = resp.json().await?;
        STANDARD
            .decode(parsed.swap_transaction)
            .map_err(|_| RouterError::MalformedResponse)
    }

    #[instrument(skip(self))]
    async fn simulate_transfer(&self, token_mint: &str) -> Result<bool, RouterError> {
        let mint = Pubkey::from_str(token_mint).map_err(|_| RouterError::MalformedResponse)?;
        let probe = Keypair::new();
        let source = spl_associated_token_account::get_associated_token_address(&probe.pubkey(), &mint);
        let destination = spl_associated_token_account::get_associated_token_address(&Pubkey::new_unique(), &mint);
        let transfer_ix = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &probe.pubkey(),
            &[],
            TRANSFER_PROBE_UNITS,
        )
        .map_err(|_| RouterError::MalformedResponse)?;

        let message = Message::new(&[transfer_ix], Some(&probe.pubkey()));
        let mut tx = Transaction::new_unsigned(message);
        tx.message.recent_blockhash = Hash::default();
        let tx_bytes = bincode::serialize(&tx).map_err(|_| RouterError::MalformedResponse)?;

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "simulateTransaction",
            "params": [
                STANDARD.encode(&tx_bytes),
                {"encoding": "base64", "sigVerify": false, "replaceRecentBlockhash": true},
            ],
        });
        let resp = self.client.post(&self.rpc_url).json(&body).send().await?;
        let parsed: SimulateTransactionResponse = resp.json().await?;
        Ok(Self::is_transfer_blocked(&parsed.result.value))
    }

    async fn recent_prioritization_fee(&self) -> Option<u64> {
        #[derive(Deserialize)]
        struct FeeEntry {
            #[serde(rename = "prioritizationFee")]
            prioritization_fee: u64,
        }
        #[derive(Deserialize)]
        struct RpcResponse {
            result: Vec<FeeEntry>,
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getRecentPrioritizationFees",
            "params": [[]],
        });
        let resp = self.client.post(&self.rpc_url).json(&body).send().await.ok()?;
        let parsed: RpcResponse = resp.json().await.ok()?;
        if parsed.result.is_empty() {
            return None;
        }
        let sum: u64 = parsed.result.iter().map(|e| e.prioritization_fee).sum();
        Some(sum / parsed.result.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_scales_with_urgency_and_caps() {
        assert_eq!(DexRouter::slippage_bps_for(1), 50);
        assert!(DexRouter::slippage_bps_for(5) > DexRouter::slippage_bps_for(1));
        assert!(DexRouter::slippage_bps_for(255) <= SLIPPAGE_MAX_BPS);
    }
}
