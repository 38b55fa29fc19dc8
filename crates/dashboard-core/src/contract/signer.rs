//! ============================================================================
//! Change Call Signing
//! ============================================================================
//! Signing happens outside this crate. A signer either resolves in-process
//! (hash + outcome future) or hands off to a wallet page, answering with the
//! `CallError::Redirect` sentinel. The wallet returns to the callback URL with
//! `transactionHashes` or `errorMessage` appended.
//! ============================================================================

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::{CallError, ChangeCall};

/// A change call accepted by the origin chain
pub struct SubmittedCall {
    /// Origin-chain transaction hash
    pub hash: String,
    /// Resolves with the call's return value or its execution error
    pub outcome: BoxFuture<'static, Result<Value, CallError>>,
}

impl std::fmt::Debug for SubmittedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmittedCall").field("hash", &self.hash).finish()
    }
}

#[async_trait]
pub trait ChangeCallSigner: Send + Sync {
    /// Submit `call`. `intent_id` identifies the locally persisted intent so a
    /// redirect round-trip can be matched on return.
    async fn submit(&self, call: &ChangeCall, intent_id: &str) -> Result<SubmittedCall, CallError>;
}

/// Hands every change call to an external wallet signing page
pub struct RedirectSigner {
    wallet_url: String,
    callback_url: String,
}

impl RedirectSigner {
    pub fn new(wallet_url: &str, callback_url: &str) -> Self {
        Self {
            wallet_url: wallet_url.to_string(),
            callback_url: callback_url.to_string(),
        }
    }

    /// Wallet URL for `call`; the callback carries the intent id
    pub fn signing_url(&self, call: &ChangeCall, intent_id: &str) -> Result<String, CallError> {
        let mut callback = Url::parse(&self.callback_url)
            .map_err(|e| CallError::Execution(format!("Invalid callback URL '{}': {}", self.callback_url, e)))?;
        callback.query_pairs_mut().append_pair("intent", intent_id);

        let mut url = Url::parse(&self.wallet_url)
            .and_then(|base| base.join("sign"))
            .map_err(|e| CallError::Execution(format!("Invalid wallet URL '{}': {}", self.wallet_url, e)))?;

        url.query_pairs_mut()
            .append_pair("contractId", &call.contract_id)
            .append_pair("methodName", call.method_name())
            .append_pair("args", &STANDARD.encode(call.args().to_string()))
            .append_pair("gas", &call.gas)
            .append_pair("deposit", &call.deposit.to_string())
            .append_pair("callbackUrl", callback.as_str());

        Ok(url.into())
    }
}

#[async_trait]
impl ChangeCallSigner for RedirectSigner {
    async fn submit(&self, call: &ChangeCall, intent_id: &str) -> Result<SubmittedCall, CallError> {
        let url = self.signing_url(call, intent_id)?;
        info!(
            "Handing {}.{} to wallet (intent {})",
            call.contract_id,
            call.method_name(),
            intent_id
        );
        Err(CallError::Redirect { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_redirect_signer_builds_wallet_url() {
        let signer = RedirectSigner::new("https://wallet.example.com", "https://app.example.com/bridge");
        let call = ChangeCall::unbond_stake("a1.registry.testnet");

        let err = signer.submit(&call, "intent-1").await.unwrap_err();
        let url = match err {
            CallError::Redirect { url } => Url::parse(&url).unwrap(),
            other => panic!("expected redirect, got {:?}", other),
        };

        assert_eq!(url.path(), "/sign");
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["contractId"], "a1.registry.testnet");
        assert_eq!(query["methodName"], "unbond_stake");
        assert_eq!(query["deposit"], "0");
        assert_eq!(STANDARD.decode(&query["args"]).unwrap(), b"{}");

        let callback = Url::parse(&query["callbackUrl"]).unwrap();
        let callback_query: HashMap<String, String> = callback.query_pairs().into_owned().collect();
        assert_eq!(callback_query["intent"], "intent-1");
    }

    #[tokio::test]
    async fn test_invalid_wallet_url_is_an_execution_error() {
        let signer = RedirectSigner::new("not a url", "https://app.example.com");
        let err = signer
            .submit(&ChangeCall::unbond_stake("a1"), "i")
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Execution(_)));
    }
}
