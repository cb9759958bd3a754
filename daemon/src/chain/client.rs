use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use trustflow_common::crypto::{keccak256, EthAddress, Hash};

use crate::config::{RPC_CONNECT_TIMEOUT, RPC_REQUEST_TIMEOUT};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid rpc endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("chain endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("log range [{from}, {to}] is too large for the endpoint")]
    RangeTooLarge { from: u64, to: u64 },
    #[error("unexpected rpc response: {0}")]
    InvalidResponse(String),
}

/// A raw log entry as returned by the endpoint. Order within a block is
/// whatever the remote felt like; callers sort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    pub address: EthAddress,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    pub log_index: u32,
}

/// Keccak-256 of a canonical event signature ("Name(type1,type2,...)").
/// The result is what a matching log carries in its first topic slot.
pub fn topic_hash_of(signature: &str) -> Hash {
    keccak256(signature.as_bytes())
}

/// Thin abstraction over a chain RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head height.
    async fn current_block(&self) -> Result<u64, ChainError>;

    /// Logs emitted by `address` over `[from_block, to_block]`, inclusive
    /// on both bounds.
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &EthAddress,
    ) -> Result<Vec<RawLog>, ChainError>;
}

// JSON-RPC envelope types

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFilter {
    from_block: String,
    to_block: String,
    address: String,
}

/// Wire shape of one eth_getLogs entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogObject {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    block_hash: String,
    transaction_hash: String,
    log_index: String,
}

// Hex-quantity codec ("0x1a2b", no leading zeroes required)

fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("quantity without 0x prefix: {}", value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {}: {}", value, e)))
}

fn parse_data(value: &str) -> Result<Vec<u8>, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|e| ChainError::InvalidResponse(format!("bad data blob: {}", e)))
}

impl LogObject {
    fn into_raw_log(self) -> Result<RawLog, ChainError> {
        let address = EthAddress::from_hex(&self.address)
            .map_err(|e| ChainError::InvalidResponse(format!("bad log address: {}", e)))?;
        let topics = self
            .topics
            .iter()
            .map(|topic| Hash::from_hex(topic))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChainError::InvalidResponse(format!("bad log topic: {}", e)))?;
        Ok(RawLog {
            address,
            topics,
            data: parse_data(&self.data)?,
            block_number: parse_quantity(&self.block_number)?,
            block_hash: Hash::from_hex(&self.block_hash)
                .map_err(|e| ChainError::InvalidResponse(format!("bad block hash: {}", e)))?,
            tx_hash: Hash::from_hex(&self.transaction_hash)
                .map_err(|e| ChainError::InvalidResponse(format!("bad tx hash: {}", e)))?,
            log_index: parse_quantity(&self.log_index)? as u32,
        })
    }
}

// Error codes and phrases used by common endpoints to reject an over-wide
// eth_getLogs range
const LIMIT_EXCEEDED_CODE: i64 = -32005;

fn is_range_error(error: &JsonRpcError) -> bool {
    if error.code == LIMIT_EXCEEDED_CODE {
        return true;
    }
    let message = error.message.to_ascii_lowercase();
    message.contains("range") || message.contains("too many")
}

/// JSON-RPC chain client speaking eth_blockNumber / eth_getLogs over HTTP.
pub struct RpcChainClient {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        let endpoint =
            Url::parse(rpc_url).map_err(|e| ChainError::InvalidEndpoint(e.to_string()))?;
        let client = Client::builder()
            .timeout(RPC_REQUEST_TIMEOUT)
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ChainError::InvalidEndpoint(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, JsonRpcCallError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!("rpc call {} -> {}", method, self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| JsonRpcCallError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(JsonRpcCallError::Transport(format!(
                "http status {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| JsonRpcCallError::Transport(e.to_string()))?;
        if let Some(error) = body.error {
            debug!("rpc error from {}: {} ({})", method, error.message, error.code);
            return Err(JsonRpcCallError::Rpc(error));
        }

        body.result
            .ok_or_else(|| JsonRpcCallError::Rpc(JsonRpcError {
                code: 0,
                message: "response carried neither result nor error".to_string(),
            }))
    }
}

// Split transport faults from endpoint-reported errors so get_logs can
// classify range rejections
enum JsonRpcCallError {
    Transport(String),
    Rpc(JsonRpcError),
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_block(&self) -> Result<u64, ChainError> {
        let result = self
            .call("eth_blockNumber", json!([]))
            .await
            .map_err(|e| match e {
                JsonRpcCallError::Transport(message) => ChainError::Unavailable(message),
                JsonRpcCallError::Rpc(error) => ChainError::InvalidResponse(error.message),
            })?;
        let quantity: String = serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        parse_quantity(&quantity)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &EthAddress,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = LogFilter {
            from_block: to_quantity(from_block),
            to_block: to_quantity(to_block),
            address: address.to_hex(),
        };
        let result = self
            .call("eth_getLogs", json!([filter]))
            .await
            .map_err(|e| match e {
                JsonRpcCallError::Transport(message) => ChainError::Unavailable(message),
                JsonRpcCallError::Rpc(error) if is_range_error(&error) => {
                    ChainError::RangeTooLarge {
                        from: from_block,
                        to: to_block,
                    }
                }
                JsonRpcCallError::Rpc(error) => ChainError::InvalidResponse(error.message),
            })?;

        let objects: Vec<LogObject> = serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        objects
            .into_iter()
            .map(LogObject::into_raw_log)
            .collect()
    }
}
