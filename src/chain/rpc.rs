//! Solana JSON-RPC chain client
//!
//! Blocks are fetched with `jsonParsed` encoding so transfers can be read
//! straight from the parsed system and spl-token instructions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{ChainClient, ChainTransfer, ScannedBlock};
use crate::config::ChainConfig;
use crate::core_types::{Amount, Height};
use crate::error::ChainError;

/// Slot was skipped by the leader
const SLOT_SKIPPED: i64 = -32007;
/// Slot skipped or missing in long-term storage
const SLOT_MISSING_IN_STORAGE: i64 = -32009;

const COMMITMENT: &str = "confirmed";

pub struct RpcChainClient {
    url: String,
    native_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct LatestBlockhash {
    value: BlockhashValue,
}

#[derive(Deserialize, Debug)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SolBlock {
    blockhash: String,
    previous_blockhash: String,
    block_time: Option<i64>,
    #[serde(default)]
    transactions: Vec<SolTransaction>,
}

#[derive(Deserialize, Debug)]
struct SolTransaction {
    transaction: SolTxBody,
    meta: Option<SolTxMeta>,
}

#[derive(Deserialize, Debug)]
struct SolTxBody {
    signatures: Vec<String>,
    message: SolMessage,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SolMessage {
    #[serde(default)]
    account_keys: Vec<SolAccountKey>,
    #[serde(default)]
    instructions: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct SolAccountKey {
    pubkey: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SolTxMeta {
    err: Option<Value>,
    #[serde(default)]
    fee: u64,
    #[serde(default)]
    pre_token_balances: Vec<SolTokenBalance>,
    #[serde(default)]
    post_token_balances: Vec<SolTokenBalance>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SolTokenBalance {
    account_index: usize,
    mint: String,
    owner: Option<String>,
}

/// Owner and mint of an spl-token account touched by a transaction
#[derive(Debug, Clone)]
struct TokenAccount {
    owner: Option<String>,
    mint: String,
}

impl RpcChainClient {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        info!("Initializing chain RPC client at {}", config.rpc_url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ChainError::RpcConnection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: config.rpc_url.clone(),
            native_token: config.native_token.clone(),
            client,
        })
    }

    /// JSON-RPC call where a `null` result is meaningful
    async fn rpc_call_opt<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, ChainError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::RpcConnection(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::Parse(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, ChainError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.rpc_call_opt(method, params)
            .await?
            .ok_or_else(|| ChainError::Parse(format!("{}: no result in RPC response", method)))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_height(&self) -> Result<Height, ChainError> {
        self.rpc_call("getSlot", [json!({ "commitment": COMMITMENT })])
            .await
    }

    async fn current_nonce(&self) -> Result<String, ChainError> {
        let latest: LatestBlockhash = self
            .rpc_call("getLatestBlockhash", [json!({ "commitment": COMMITMENT })])
            .await?;
        Ok(latest.value.blockhash)
    }

    async fn block_transfers(&self, height: Height) -> Result<ScannedBlock, ChainError> {
        let params = json!([
            height,
            {
                "encoding": "jsonParsed",
                "transactionDetails": "full",
                "rewards": false,
                "maxSupportedTransactionVersion": 0,
                "commitment": COMMITMENT,
            }
        ]);

        match self.rpc_call_opt::<_, SolBlock>("getBlock", params).await {
            Ok(Some(block)) => Ok(parse_block(height, block, &self.native_token)),
            Ok(None) => Err(ChainError::BlockNotFound(height)),
            Err(ChainError::Rpc { code, message })
                if code == SLOT_SKIPPED || code == SLOT_MISSING_IN_STORAGE =>
            {
                debug!(height, code, %message, "Slot has no block");
                Ok(ScannedBlock::empty(height))
            }
            Err(e) => Err(e),
        }
    }

    async fn broadcast(&self, signed_tx: &str) -> Result<String, ChainError> {
        self.rpc_call(
            "sendTransaction",
            json!([signed_tx, { "encoding": "base64", "preflightCommitment": COMMITMENT }]),
        )
        .await
    }
}

fn parse_block(height: Height, block: SolBlock, native_token: &str) -> ScannedBlock {
    let mut transfers = Vec::new();

    for tx in &block.transactions {
        let Some(meta) = &tx.meta else { continue };
        if meta.err.is_some() {
            continue;
        }
        let Some(tx_hash) = tx.transaction.signatures.first() else {
            continue;
        };

        let token_accounts = token_accounts(&tx.transaction.message, meta);
        let mut index = 0u32;
        for ix in &tx.transaction.message.instructions {
            let Some((source, destination, token, amount)) =
                parse_instruction(ix, &token_accounts, native_token)
            else {
                continue;
            };
            transfers.push(ChainTransfer {
                tx_hash: tx_hash.clone(),
                index,
                source,
                destination,
                token,
                amount,
                // the fee is paid once per transaction
                fee: if index == 0 { meta.fee as Amount } else { 0 },
            });
            index += 1;
        }
    }

    ScannedBlock {
        height,
        hash: block.blockhash,
        parent_hash: block.previous_blockhash,
        timestamp: block.block_time.unwrap_or(0),
        transfers,
    }
}

fn token_accounts(message: &SolMessage, meta: &SolTxMeta) -> HashMap<String, TokenAccount> {
    meta.pre_token_balances
        .iter()
        .chain(meta.post_token_balances.iter())
        .filter_map(|b| {
            let key = message.account_keys.get(b.account_index)?;
            Some((
                key.pubkey.clone(),
                TokenAccount {
                    owner: b.owner.clone(),
                    mint: b.mint.clone(),
                },
            ))
        })
        .collect()
}

/// `(source, destination, token, amount)` of a native or spl-token transfer.
/// Token-account endpoints are resolved to their wallet owners.
fn parse_instruction(
    ix: &Value,
    token_accounts: &HashMap<String, TokenAccount>,
    native_token: &str,
) -> Option<(String, String, String, Amount)> {
    let program = ix.get("program")?.as_str()?;
    let parsed = ix.get("parsed")?;
    let kind = parsed.get("type")?.as_str()?;
    let info = parsed.get("info")?;

    let (source, destination, token, amount) = match (program, kind) {
        ("system", "transfer") => (
            info.get("source")?.as_str()?.to_string(),
            info.get("destination")?.as_str()?.to_string(),
            native_token.to_string(),
            info.get("lamports")?.as_u64()? as Amount,
        ),
        ("spl-token", "transferChecked") | ("spl-token", "transfer") => {
            let source_account = info.get("source")?.as_str()?;
            let dest_account = info.get("destination")?.as_str()?;
            let mint = match info.get("mint").and_then(Value::as_str) {
                Some(m) => m.to_string(),
                None => token_accounts.get(dest_account)?.mint.clone(),
            };
            let raw_amount = match info.get("tokenAmount") {
                Some(token_amount) => token_amount.get("amount")?.as_str()?,
                None => info.get("amount")?.as_str()?,
            };
            let authority = info
                .get("authority")
                .or_else(|| info.get("multisigAuthority"))
                .and_then(Value::as_str);

            let source = authority
                .map(str::to_string)
                .or_else(|| token_accounts.get(source_account)?.owner.clone())
                .unwrap_or_else(|| source_account.to_string());
            let destination = token_accounts
                .get(dest_account)
                .and_then(|a| a.owner.clone())
                .unwrap_or_else(|| dest_account.to_string());

            (source, destination, mint, raw_amount.parse::<Amount>().ok()?)
        }
        _ => return None,
    };

    if amount == 0 {
        return None;
    }
    Some((source, destination, token, amount))
}
