//! ============================================================================
//! Contract Module - typed facade over NEAR contract calls
//! ============================================================================
//! Two disjoint call families:
//! - View calls: pure reads through JSON-RPC, typed by `ViewMethod`
//! - Change calls: wallet-signed, may hand control to an external signing
//!   page (`CallError::Redirect`) instead of resolving in-process
//! ============================================================================

mod methods;
mod near_rpc;
mod signer;

pub use methods::{
    AnchorStatus, AppchainSettings, AppchainStatus, ChangeCall, ChangeMethod, FtBalanceOf,
    GetAnchorStatus, GetAppchainSettings, GetAppchainStatusOf, COMPLEX_CALL_GAS, ONE_YOCTO,
    SIMPLE_CALL_GAS,
};
pub use near_rpc::NearRpcClient;
pub use signer::{ChangeCallSigner, RedirectSigner, SubmittedCall};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    /// Signing continues on an external page; not a failure
    #[error("redirecting to wallet: {url}")]
    Redirect { url: String },

    #[error("{0}")]
    Execution(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CallError {
    pub fn is_redirect(&self) -> bool {
        matches!(self, CallError::Redirect { .. })
    }

    /// Build an execution error from a structured failure object.
    /// Plain strings are used as-is, anything else is rendered as compact JSON.
    pub fn from_failure(failure: &Value) -> Self {
        match failure {
            Value::String(s) => CallError::Execution(s.clone()),
            Value::Object(map) if map.contains_key("ActionError") => {
                let kind = &map["ActionError"]["kind"];
                CallError::Execution(format!("ActionError: {}", kind))
            }
            other => CallError::Execution(other.to_string()),
        }
    }
}

/// Final state of an origin-chain transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Read-only contract access plus transaction status lookups
#[async_trait]
pub trait ContractClient: Send + Sync {
    /// Call a view method, returning the decoded JSON result
    async fn view_raw(&self, contract_id: &str, method: &str, args: Value) -> Result<Value, CallError>;

    /// Look up an origin-chain transaction signed by `sender`
    async fn tx_status(&self, hash: &str, sender: &str) -> Result<TxOutcome, CallError>;
}

/// Typed schema for a view method
pub trait ViewMethod {
    const NAME: &'static str;
    type Output: DeserializeOwned;

    fn args(&self) -> Value;
}

/// Call a typed view method, validating the response shape
pub async fn view<M: ViewMethod>(
    client: &dyn ContractClient,
    contract_id: &str,
    method: &M,
) -> Result<M::Output, CallError> {
    let raw = client.view_raw(contract_id, M::NAME, method.args()).await?;
    serde_json::from_value(raw)
        .map_err(|e| CallError::InvalidResponse(format!("{} on {}: {}", M::NAME, contract_id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeContracts;
    use serde_json::json;

    #[test]
    fn test_redirect_is_distinguishable() {
        let redirect = CallError::Redirect { url: "https://wallet/sign".into() };
        assert!(redirect.is_redirect());
        assert!(!CallError::Execution("boom".into()).is_redirect());
    }

    #[test]
    fn test_failure_rendering() {
        assert_eq!(
            CallError::from_failure(&json!("insufficient balance")),
            CallError::Execution("insufficient balance".into())
        );
        let structured = json!({"ActionError": {"index": 0, "kind": {"FunctionCallError": "Smart contract panicked"}}});
        match CallError::from_failure(&structured) {
            CallError::Execution(msg) => assert!(msg.starts_with("ActionError:")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typed_view_validates_shape() {
        let contracts = FakeContracts::new();
        contracts.set_view(
            "a1.registry",
            "get_appchain_settings",
            json!({"rpc_endpoint": "wss://a1.rpc", "era_reward": "100"}),
        );
        contracts.set_view("a1.registry", "get_anchor_status", json!({"validator_count": "ten"}));

        let settings = view(&contracts, "a1.registry", &GetAppchainSettings).await.unwrap();
        assert_eq!(settings.rpc_endpoint, "wss://a1.rpc");

        let err = view(&contracts, "a1.registry", &GetAnchorStatus).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse(_)));
    }
}
