//! ============================================================================
//! NEAR JSON-RPC Client
//! ============================================================================
//! View calls via `query`/`call_function`, transaction status via `tx`.
//! ============================================================================

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{CallError, ContractClient, TxOutcome};

/// Request timeout for NEAR RPC calls
const RPC_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cause: Option<RpcErrorCause>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorCause {
    name: String,
}

impl RpcErrorBody {
    fn describe(&self) -> String {
        let cause = self
            .cause
            .as_ref()
            .map(|c| c.name.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_default();
        let data = self.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
        format!("{} {} (code: {}) {}", cause, self.message, self.code, data)
            .trim()
            .to_string()
    }
}

/// JSON-RPC client for a NEAR node
pub struct NearRpcClient {
    client: Client,
    rpc_url: String,
}

impl NearRpcClient {
    pub fn new(rpc_url: &str) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .user_agent("appchain-dashboard/1.0")
            .build()
            .map_err(|e| CallError::Rpc(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::Rpc(format!("RPC request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Rpc(format!("RPC request failed with status: {}", status)));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| CallError::InvalidResponse(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(error) = body.error {
            return Err(CallError::Rpc(error.describe()));
        }

        body.result
            .ok_or_else(|| CallError::InvalidResponse("RPC response missing result".to_string()))
    }
}

/// Decode a `call_function` result: a byte array holding UTF-8 JSON
pub fn decode_view_result(result: &Value) -> Result<Value, CallError> {
    if let Some(err) = result.get("error").and_then(Value::as_str) {
        return Err(CallError::Rpc(err.to_string()));
    }

    let bytes: Vec<u8> = result
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::InvalidResponse("view result missing byte array".to_string()))?
        .iter()
        .map(|b| {
            b.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| CallError::InvalidResponse("view result byte out of range".to_string()))
        })
        .collect::<Result<_, _>>()?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| CallError::InvalidResponse(format!("view result is not JSON: {}", e)))
}

/// Map a `tx` result's final status
pub fn parse_tx_status(result: &Value) -> TxOutcome {
    match result.get("status") {
        Some(Value::Object(status)) => {
            if let Some(failure) = status.get("Failure") {
                match CallError::from_failure(failure) {
                    CallError::Execution(msg) => TxOutcome::Failed(msg),
                    other => TxOutcome::Failed(other.to_string()),
                }
            } else if status.contains_key("SuccessValue") || status.contains_key("SuccessReceiptId") {
                TxOutcome::Succeeded
            } else {
                TxOutcome::Pending
            }
        }
        _ => TxOutcome::Pending,
    }
}

#[async_trait]
impl ContractClient for NearRpcClient {
    async fn view_raw(&self, contract_id: &str, method: &str, args: Value) -> Result<Value, CallError> {
        debug!("View {}.{}", contract_id, method);
        let args_base64 = if args.is_null() {
            STANDARD.encode(b"")
        } else {
            STANDARD.encode(args.to_string())
        };

        let result = self
            .rpc_call(
                "query",
                json!({
                    "request_type": "call_function",
                    "finality": "final",
                    "account_id": contract_id,
                    "method_name": method,
                    "args_base64": args_base64,
                }),
            )
            .await?;

        decode_view_result(&result)
    }

    async fn tx_status(&self, hash: &str, sender: &str) -> Result<TxOutcome, CallError> {
        match self.rpc_call("tx", json!([hash, sender])).await {
            Ok(result) => Ok(parse_tx_status(&result)),
            Err(CallError::Rpc(msg)) if msg.contains("UNKNOWN_TRANSACTION") || msg.contains("TIMEOUT_ERROR") => {
                debug!("Transaction {} not yet known: {}", hash, msg);
                Ok(TxOutcome::Pending)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_view_result() {
        let bytes: Vec<u8> = br#"{"rpc_endpoint":"wss://x"}"#.to_vec();
        let decoded = decode_view_result(&json!({ "result": bytes, "logs": [] })).unwrap();
        assert_eq!(decoded["rpc_endpoint"], "wss://x");

        assert_eq!(decode_view_result(&json!({ "result": [] })).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_view_errors() {
        let err = decode_view_result(&json!({ "error": "wasm execution failed: MethodNotFound" }));
        assert!(matches!(err, Err(CallError::Rpc(_))));
        let err = decode_view_result(&json!({ "result": [300] }));
        assert!(matches!(err, Err(CallError::InvalidResponse(_))));
        let err = decode_view_result(&json!({ "logs": [] }));
        assert!(matches!(err, Err(CallError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_tx_status() {
        assert_eq!(parse_tx_status(&json!({"status": {"SuccessValue": ""}})), TxOutcome::Succeeded);
        assert_eq!(
            parse_tx_status(&json!({"status": {"SuccessReceiptId": "abc"}})),
            TxOutcome::Succeeded
        );
        assert_eq!(
            parse_tx_status(&json!({"status": {"Failure": "insufficient balance"}})),
            TxOutcome::Failed("insufficient balance".into())
        );
        assert_eq!(parse_tx_status(&json!({"status": "Started"})), TxOutcome::Pending);
        assert_eq!(parse_tx_status(&json!({})), TxOutcome::Pending);
    }

    #[test]
    fn test_error_description_prefers_cause() {
        let body: RpcErrorBody = serde_json::from_value(json!({
            "code": -32000,
            "message": "Server error",
            "name": "HANDLER_ERROR",
            "cause": {"name": "UNKNOWN_TRANSACTION", "info": {}}
        }))
        .unwrap();
        assert!(body.describe().starts_with("UNKNOWN_TRANSACTION Server error"));
    }
}
