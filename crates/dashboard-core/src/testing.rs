//! In-process fakes for contract, signer and appchain clients.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::appchain::{AppchainClient, AppchainConnector, NotificationResult};
use crate::config::NetworkConfig;
use crate::context::ChainContext;
use crate::contract::{CallError, ChangeCall, ChangeCallSigner, ContractClient, SubmittedCall, TxOutcome};

#[derive(Default)]
pub struct FakeContracts {
    views: Mutex<HashMap<(String, String), Value>>,
    statuses: Mutex<HashMap<String, TxOutcome>>,
    view_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_view(&self, contract_id: &str, method: &str, value: Value) {
        self.views
            .lock()
            .unwrap()
            .insert((contract_id.to_string(), method.to_string()), value);
    }

    pub fn set_status(&self, hash: &str, outcome: TxOutcome) {
        self.statuses.lock().unwrap().insert(hash.to_string(), outcome);
    }

    pub fn view_calls(&self) -> usize {
        self.view_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractClient for FakeContracts {
    async fn view_raw(&self, contract_id: &str, method: &str, _args: Value) -> Result<Value, CallError> {
        self.view_calls.fetch_add(1, Ordering::SeqCst);
        self.views
            .lock()
            .unwrap()
            .get(&(contract_id.to_string(), method.to_string()))
            .cloned()
            .ok_or_else(|| CallError::Rpc(format!("account {} does not exist while viewing", contract_id)))
    }

    async fn tx_status(&self, hash: &str, _sender: &str) -> Result<TxOutcome, CallError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .unwrap_or(TxOutcome::Pending))
    }
}

/// Scripted answer for the next `submit`
pub enum Scripted {
    Resolved { hash: String, result: Result<Value, CallError> },
    Deferred { hash: String, rx: oneshot::Receiver<Result<Value, CallError>> },
    Redirect,
    Rejected(String),
}

#[derive(Default)]
pub struct FakeSigner {
    script: Mutex<VecDeque<Scripted>>,
    intents: Mutex<Vec<String>>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, answer: Scripted) {
        self.script.lock().unwrap().push_back(answer);
    }

    /// Intent ids passed to `submit`, in order
    pub fn intents(&self) -> Vec<String> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeCallSigner for FakeSigner {
    async fn submit(&self, _call: &ChangeCall, intent_id: &str) -> Result<SubmittedCall, CallError> {
        self.intents.lock().unwrap().push(intent_id.to_string());
        let answer = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::Rejected("no scripted answer".into()));

        match answer {
            Scripted::Resolved { hash, result } => Ok(SubmittedCall {
                hash,
                outcome: async move { result }.boxed(),
            }),
            Scripted::Deferred { hash, rx } => Ok(SubmittedCall {
                hash,
                outcome: async move {
                    rx.await
                        .unwrap_or_else(|_| Err(CallError::Execution("outcome dropped".into())))
                }
                .boxed(),
            }),
            Scripted::Redirect => Err(CallError::Redirect {
                url: format!("https://wallet.test/sign?intent={}", intent_id),
            }),
            Scripted::Rejected(msg) => Err(CallError::Execution(msg)),
        }
    }
}

#[derive(Default)]
pub struct FakeAppchain {
    results: Mutex<HashMap<u32, NotificationResult>>,
    polls: AtomicUsize,
}

impl FakeAppchain {
    pub fn set(&self, index: u32, result: NotificationResult) {
        self.results.lock().unwrap().insert(index, result);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppchainClient for FakeAppchain {
    async fn notification_history(&self, index: u32) -> Result<Option<NotificationResult>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.lock().unwrap().get(&index).copied())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    nodes: Mutex<HashMap<String, Arc<FakeAppchain>>>,
    failures: AtomicUsize,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node at `endpoint`
    pub fn node(&self, endpoint: &str) -> Arc<FakeAppchain> {
        self.nodes
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppchainConnector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn AppchainClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("connection refused: {}", endpoint));
        }
        let node = self
            .nodes
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: {}", endpoint))?;
        Ok(node)
    }
}

/// Fakes wired into a testnet context
pub struct FakeChain {
    pub contracts: Arc<FakeContracts>,
    pub signer: Arc<FakeSigner>,
    pub appchains: Arc<FakeConnector>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            contracts: Arc::new(FakeContracts::new()),
            signer: Arc::new(FakeSigner::new()),
            appchains: Arc::new(FakeConnector::new()),
        }
    }

    pub fn context(&self, network: NetworkConfig) -> ChainContext {
        ChainContext {
            network,
            contracts: self.contracts.clone(),
            signer: self.signer.clone(),
            appchains: self.appchains.clone(),
        }
    }
}
