//! ============================================================================
//! Appchain RPC - destination-chain confirmation source
//! ============================================================================
//! Cross-chain transfers are confirmed by an entry in the appchain's
//! notification history. Endpoints come from the anchor contract's settings
//! and are reached over Substrate JSON-RPC (ws/wss mapped to http/https).
//! ============================================================================

pub mod hashing;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use hashing::map_storage_key;

/// Storage item holding notification results, keyed by u32 index
pub const NOTIFICATION_HISTORY_ITEM: &str = "NotificationHistory";

const RPC_TIMEOUT_SECS: u64 = 20;

/// Outcome recorded by the appchain for a cross-chain notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationResult {
    Success,
    UnlockFailed,
    AssetMintFailed,
    AssetGetFailed,
    NftMintFailed,
    NftUnlockFailed,
    Unknown(u8),
}

impl NotificationResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => NotificationResult::Success,
            1 => NotificationResult::UnlockFailed,
            2 => NotificationResult::AssetMintFailed,
            3 => NotificationResult::AssetGetFailed,
            4 => NotificationResult::NftMintFailed,
            5 => NotificationResult::NftUnlockFailed,
            other => NotificationResult::Unknown(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NotificationResult::Success)
    }
}

impl fmt::Display for NotificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationResult::Success => f.write_str("Success"),
            NotificationResult::UnlockFailed => f.write_str("UnlockFailed"),
            NotificationResult::AssetMintFailed => f.write_str("AssetMintFailed"),
            NotificationResult::AssetGetFailed => f.write_str("AssetGetFailed"),
            NotificationResult::NftMintFailed => f.write_str("NftMintFailed"),
            NotificationResult::NftUnlockFailed => f.write_str("NftUnlockFailed"),
            NotificationResult::Unknown(code) => write!(f, "UnknownNotificationResult({})", code),
        }
    }
}

/// Connection to one appchain node
#[async_trait]
pub trait AppchainClient: Send + Sync {
    /// Result recorded at `index`, or None while not yet processed
    async fn notification_history(&self, index: u32) -> Result<Option<NotificationResult>>;
}

/// Opens appchain connections from an RPC endpoint
#[async_trait]
pub trait AppchainConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn AppchainClient>>;
}

/// Map a websocket endpoint onto its HTTP JSON-RPC equivalent
pub fn http_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(anyhow!("no rpc endpoint configured"));
    }
    if let Some(rest) = endpoint.strip_prefix("wss://") {
        Ok(format!("https://{}", rest))
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        Ok(format!("http://{}", rest))
    } else if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        Ok(endpoint.to_string())
    } else {
        Err(anyhow!("unsupported rpc endpoint scheme: {}", endpoint))
    }
}

const OPTION_NONE: u8 = 0x00;
const OPTION_SOME: u8 = 0x01;

/// Decode a `state_getStorage` result.
///
/// The stored value is a SCALE `Option<NotificationResult>`: `0x00` is `None`,
/// `0x01 <code>` is `Some(code)`. Any other non-empty value still proves the
/// notification was processed and reads as `Success`.
pub fn decode_notification(value: &Value) -> Result<Option<NotificationResult>> {
    let hex_value = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s,
        other => return Err(anyhow!("invalid response: unexpected storage value {}", other)),
    };

    let bytes = hex::decode(hex_value.trim_start_matches("0x"))
        .map_err(|e| anyhow!("invalid response: storage value is not hex: {}", e))?;

    Ok(match bytes.as_slice() {
        [] | [OPTION_NONE, ..] => None,
        [OPTION_SOME, code, ..] => Some(NotificationResult::from_code(*code)),
        _ => Some(NotificationResult::Success),
    })
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Substrate JSON-RPC client over HTTP
pub struct SubstrateRpcClient {
    client: Client,
    url: String,
    pallet: String,
}

impl SubstrateRpcClient {
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Appchain RPC request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Appchain RPC request failed with status: {}", status));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("invalid response from appchain: {}", e))?;

        if let Some(error) = body.error {
            return Err(anyhow!("Appchain RPC error: {} (code: {})", error.message, error.code));
        }
        Ok(body.result)
    }

    /// Storage key for a notification index
    pub fn notification_key(&self, index: u32) -> String {
        let key = map_storage_key(&self.pallet, NOTIFICATION_HISTORY_ITEM, &index.to_le_bytes());
        format!("0x{}", hex::encode(key))
    }
}

#[async_trait]
impl AppchainClient for SubstrateRpcClient {
    async fn notification_history(&self, index: u32) -> Result<Option<NotificationResult>> {
        let value = self
            .rpc_call("state_getStorage", json!([self.notification_key(index)]))
            .await?;
        let result = decode_notification(&value)?;
        debug!("Notification {} on {}: {:?}", index, self.url, result);
        Ok(result)
    }
}

/// Connects to appchain nodes over HTTP JSON-RPC
pub struct SubstrateRpcConnector {
    pallet: String,
}

impl SubstrateRpcConnector {
    pub fn new(pallet: &str) -> Self {
        Self {
            pallet: pallet.to_string(),
        }
    }
}

#[async_trait]
impl AppchainConnector for SubstrateRpcConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn AppchainClient>> {
        let url = http_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let rpc = SubstrateRpcClient {
            client,
            url,
            pallet: self.pallet.clone(),
        };

        // Verify the node answers before handing out the connection
        let chain = rpc.rpc_call("system_chain", json!([])).await?;
        info!("Connected to appchain {} at {}", chain, rpc.url);

        Ok(Arc::new(rpc))
    }
}
