//! ============================================================================
//! Reconciler - drives pending transactions to a terminal status
//! ============================================================================
//! Every `Loading` record gets at most one watcher task. A watcher waits for
//! evidence from one confirmation source and commits it through the store's
//! guarded transition, so each record reaches a terminal status exactly once:
//! - Direct outcome: the future returned by an in-process signer
//! - Origin chain: NEAR transaction status polling
//! - Destination chain: the appchain notification history entry
//!
//! Every watcher runs under the confirmation deadline. Endpoint resolution is
//! retried with backoff until the deadline; only then is the record an error.
//! Missing the deadline while waiting for evidence is `TimedOut`.
//! ============================================================================

use anyhow::{anyhow, Result};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::appchain::AppchainClient;
use crate::config::ReconcileConfig;
use crate::context::ChainContext;
use crate::contract::{view, CallError, ChangeCall, GetAppchainSettings, TxOutcome};
use crate::notifier::{Notification, Notifier};
use crate::retry::{calculate_delay, classify_error, retry_with_backoff, ErrorKind};
use crate::store::{StoreError, TxStore};
use crate::types::{Evidence, NetworkId, RedirectIntent, TxDraft, TxFilter, TxRecord, TxStatus};

/// How often `wait_idle` checks for live watchers
const IDLE_CHECK_MS: u64 = 50;

/// Result of `submit`
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Accepted in-process; a watcher now tracks `hash`
    Tracking { hash: String },
    /// Signing continues on the wallet page; the intent awaits the callback
    Redirect { intent_id: String, url: String },
}

/// Result of `resume_from_redirect`
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// Records created from the callback's transaction hashes
    Tracking(Vec<TxRecord>),
    /// The wallet reported an error instead of hashes
    Rejected { intent: RedirectIntent, message: String },
}

struct Inner {
    context: RwLock<ChainContext>,
    store: Arc<TxStore>,
    notifier: Arc<dyn Notifier>,
    config: ReconcileConfig,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Hashes already announced to the notifier
    seen: Mutex<HashSet<String>>,
    /// Appchain connections keyed by appchain id
    appchains: tokio::sync::RwLock<HashMap<String, Arc<dyn AppchainClient>>>,
}

/// Cloneable handle to the reconciliation engine
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Reconciler {
    pub fn new(
        context: ChainContext,
        store: Arc<TxStore>,
        notifier: Arc<dyn Notifier>,
        config: ReconcileConfig,
    ) -> Self {
        info!(
            "Reconciler ready on {} (poll {:?}, deadline {:?})",
            context.network_id(),
            config.poll_interval(),
            config.confirmation_timeout()
        );
        Self {
            inner: Arc::new(Inner {
                context: RwLock::new(context),
                store,
                notifier,
                config,
                tasks: Mutex::new(HashMap::new()),
                seen: Mutex::new(HashSet::new()),
                appchains: tokio::sync::RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<TxStore> {
        &self.inner.store
    }

    /// Snapshot of the current chain context
    pub fn context(&self) -> ChainContext {
        self.inner
            .context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ========================================================================
    // Task Bookkeeping
    // ========================================================================

    /// Number of live watcher tasks
    pub fn in_flight(&self) -> usize {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    pub fn is_tracking(&self, hash: &str) -> bool {
        lock(&self.inner.tasks)
            .get(hash)
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Wait until every watcher has finished
    pub async fn wait_idle(&self) {
        while self.in_flight() > 0 {
            sleep(Duration::from_millis(IDLE_CHECK_MS)).await;
        }
    }

    /// Start a watcher for `hash`. Returns false when one is already live,
    /// unless `replace` is set, in which case the old one is aborted.
    fn spawn_watcher<F>(&self, hash: &str, replace: bool, watcher: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|_, handle| !handle.is_finished());
        if let Some(existing) = tasks.get(hash) {
            if !replace {
                debug!("Watcher for {} already running", hash);
                return false;
            }
            existing.abort();
        }
        tasks.insert(hash.to_string(), tokio::spawn(watcher));
        true
    }

    fn abort_all(&self) -> usize {
        let mut tasks = lock(&self.inner.tasks);
        let count = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        count
    }

    /// First-sight notification, at most once per hash
    fn announce(&self, record: &TxRecord) {
        let first = lock(&self.inner.seen).insert(record.hash.clone());
        if first {
            self.inner.notifier.notify(&Notification::for_record(record));
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a change call. The intent is persisted before signing so a
    /// wallet redirect can be matched when the callback arrives.
    pub async fn submit(&self, draft: TxDraft, call: ChangeCall) -> Result<SubmitOutcome, CallError> {
        let intent = RedirectIntent {
            id: Uuid::new_v4().to_string(),
            draft: draft.clone(),
            contract_id: call.contract_id.clone(),
            method_name: call.method_name().to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let intent_id = intent.id.clone();
        self.inner.store.put_intent(intent).await;

        let signer = self.context().signer;
        match signer.submit(&call, &intent_id).await {
            Ok(submitted) => {
                self.inner.store.take_intent(&intent_id).await;
                let hash = submitted.hash.clone();
                info!("{} on {} accepted as {}", call.method_name(), call.contract_id, hash);
                self.track(draft.into_record(&hash), submitted.outcome).await;
                Ok(SubmitOutcome::Tracking { hash })
            }
            Err(CallError::Redirect { url }) => {
                info!("{} handed to wallet (intent {})", call.method_name(), intent_id);
                Ok(SubmitOutcome::Redirect { intent_id, url })
            }
            Err(e) => {
                self.inner.store.take_intent(&intent_id).await;
                warn!("{} on {} rejected: {}", call.method_name(), call.contract_id, e);
                Err(e)
            }
        }
    }

    /// Record `record` as pending and settle it from the signer's outcome.
    /// Records carrying a notification index also wait for the appchain.
    pub async fn track(&self, record: TxRecord, outcome: BoxFuture<'static, Result<serde_json::Value, CallError>>) {
        let network = self.inner.store.append(record.clone()).await;
        self.announce(&record);

        let deadline = Instant::now() + self.inner.config.confirmation_timeout();
        let this = self.clone();
        let hash = record.hash.clone();
        self.spawn_watcher(&hash, true, async move {
            let evidence = match timeout_at(deadline, outcome).await {
                Err(_) => Evidence::TimedOut,
                Ok(Err(e)) if e.is_redirect() => {
                    info!("Outcome of {} continues in the wallet", record.hash);
                    return;
                }
                Ok(Err(e)) => Evidence::Failed(e.to_string()),
                Ok(Ok(_)) => match record.notification_index {
                    Some(index) => this.confirm_cross_chain(&record.appchain_id, index, deadline).await,
                    None => Evidence::Confirmed,
                },
            };
            this.finish(&network, &record.hash, evidence).await;
        });
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Start watchers for every pending record in `scope` that has none.
    /// Returns the number of watchers started.
    pub async fn reconcile(&self, scope: &TxFilter) -> usize {
        let network = self.inner.store.active_network().await;
        let filter = TxFilter {
            status: Some(TxStatus::Loading),
            ..scope.clone()
        };
        let pending = self.inner.store.list_filtered(&filter).await;

        let mut started = 0;
        for record in pending {
            self.announce(&record);
            if self.watch(&network, record) {
                started += 1;
            }
        }
        if started > 0 {
            info!("Reconciling {} pending transaction(s) on {}", started, network);
        }
        started
    }

    fn watch(&self, network: &NetworkId, record: TxRecord) -> bool {
        let this = self.clone();
        let network = network.clone();
        let hash = record.hash.clone();
        self.spawn_watcher(&hash, false, async move {
            let evidence = this.confirm(&record).await;
            this.finish(&network, &record.hash, evidence).await;
        })
    }

    /// Deadline measured from the record's creation. A record already past it
    /// still gets one poll interval, so it is checked once before timing out.
    fn deadline_for(&self, record: &TxRecord) -> Instant {
        let timeout = self.inner.config.confirmation_timeout();
        let age_ms = (chrono::Utc::now().timestamp_millis() - record.added_time).max(0) as u64;
        let remaining = timeout
            .saturating_sub(Duration::from_millis(age_ms))
            .max(self.inner.config.poll_interval());
        Instant::now() + remaining
    }

    async fn confirm(&self, record: &TxRecord) -> Evidence {
        let deadline = self.deadline_for(record);
        match record.notification_index {
            Some(index) => self.confirm_cross_chain(&record.appchain_id, index, deadline).await,
            None => self.confirm_origin(&record.hash, &record.from, deadline).await,
        }
    }

    /// Poll the origin chain for the transaction's final status
    async fn confirm_origin(&self, hash: &str, sender: &str, deadline: Instant) -> Evidence {
        let ctx = self.context();

        let poll = async {
            loop {
                match ctx.contracts.tx_status(hash, sender).await {
                    Ok(TxOutcome::Succeeded) => return Evidence::Confirmed,
                    Ok(TxOutcome::Failed(cause)) => return Evidence::Failed(cause),
                    Ok(TxOutcome::Pending) => debug!("{} still pending", hash),
                    Err(e) => warn!("Status lookup for {} failed: {}", hash, e),
                }
                if !self.next_poll(Duration::ZERO, deadline).await {
                    return Evidence::TimedOut;
                }
            }
        };

        match timeout_at(deadline, poll).await {
            Ok(evidence) => evidence,
            Err(_) => Evidence::TimedOut,
        }
    }

    /// Resolve the appchain, then wait for notification `index` to be processed
    async fn confirm_cross_chain(&self, appchain_id: &str, index: u32, deadline: Instant) -> Evidence {
        let client = match self.resolve_until(appchain_id, deadline).await {
            Ok(client) => client,
            Err(last_error) => {
                return Evidence::Failed(format!(
                    "Appchain {} endpoint not resolved before deadline: {}",
                    appchain_id, last_error
                ))
            }
        };

        let backoff = Duration::from_millis(self.inner.config.max_delay_ms);
        let poll = async {
            loop {
                let mut extra = Duration::ZERO;
                match client.notification_history(index).await {
                    Ok(Some(result)) if result.is_success() => return Evidence::Confirmed,
                    Ok(Some(result)) => {
                        return Evidence::Failed(format!(
                            "Cross-chain notification {} failed: {}",
                            index, result
                        ))
                    }
                    Ok(None) => debug!("Notification {} on {} not processed yet", index, appchain_id),
                    Err(e) => {
                        let msg = e.to_string();
                        warn!("Notification lookup on {} failed: {}", appchain_id, msg);
                        if classify_error(&msg) == ErrorKind::RateLimited {
                            extra = backoff;
                        }
                    }
                }
                if !self.next_poll(extra, deadline).await {
                    return Evidence::TimedOut;
                }
            }
        };

        match timeout_at(deadline, poll).await {
            Ok(evidence) => evidence,
            Err(_) => Evidence::TimedOut,
        }
    }

    /// Sleep until the next poll is due. When that would fall on or past
    /// `deadline`, sleep until the deadline instead and return false.
    async fn next_poll(&self, extra: Duration, deadline: Instant) -> bool {
        let next = Instant::now() + self.inner.config.poll_interval() + extra;
        if next >= deadline {
            sleep_until(deadline).await;
            return false;
        }
        sleep_until(next).await;
        true
    }

    /// Keep resolving the appchain endpoint until it connects or `deadline`
    /// passes. Each round is a full `retry_with_backoff` run, and permanent
    /// errors such as a missing anchor start another round as well.
    /// Returns the last error once the deadline passes.
    async fn resolve_until(&self, appchain_id: &str, deadline: Instant) -> Result<Arc<dyn AppchainClient>, String> {
        let mut last_error = String::from("no resolution attempt completed");
        let mut round: u32 = 0;
        loop {
            match timeout_at(deadline, self.appchain_client(appchain_id)).await {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(e)) => last_error = e,
                Err(_) => return Err(last_error),
            }

            let delay = calculate_delay(round, &self.inner.config);
            round = round.saturating_add(1);
            warn!(
                "Appchain {} unresolved after round {}, next round in {:?}",
                appchain_id, round, delay
            );
            sleep_until((Instant::now() + delay).min(deadline)).await;
            if Instant::now() >= deadline {
                return Err(last_error);
            }
        }
    }

    /// Cached appchain connection, resolving the endpoint through the anchor
    async fn appchain_client(&self, appchain_id: &str) -> Result<Arc<dyn AppchainClient>, String> {
        if let Some(client) = self.inner.appchains.read().await.get(appchain_id).cloned() {
            return Ok(client);
        }

        let ctx = self.context();
        let anchor = ctx.network.anchor_contract_id(appchain_id);
        let label = format!("Resolve appchain {}", appchain_id);
        let client = retry_with_backoff(&self.inner.config, &label, || {
            let ctx = ctx.clone();
            let anchor = anchor.clone();
            async move {
                let settings = view(ctx.contracts.as_ref(), &anchor, &GetAppchainSettings)
                    .await
                    .map_err(|e| e.to_string())?;
                ctx.appchains
                    .connect(&settings.rpc_endpoint)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await?;

        self.inner
            .appchains
            .write()
            .await
            .insert(appchain_id.to_string(), client.clone());
        Ok(client)
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Commit `evidence` for `hash` in `network`'s partition.
    /// Returns whether a write happened; only a write notifies.
    pub async fn settle(&self, network: &NetworkId, hash: &str, evidence: Evidence) -> Result<bool, StoreError> {
        let status = evidence.status();
        match self.inner.store.transition(network, hash, &evidence.into_patch()).await? {
            Some(record) => {
                info!("Transaction {} settled as {}", hash, status);
                self.inner.notifier.notify(&Notification::for_record(&record));
                Ok(true)
            }
            None => {
                debug!("Transaction {} already {}", hash, status);
                Ok(false)
            }
        }
    }

    async fn finish(&self, network: &NetworkId, hash: &str, evidence: Evidence) {
        match self.settle(network, hash, evidence).await {
            Ok(_) => {}
            Err(e @ StoreError::UnknownHash(_)) => warn!("Dropping evidence: {}", e),
            Err(e) => debug!("Discarding stale evidence: {}", e),
        }
    }

    // ========================================================================
    // Wallet Redirects
    // ========================================================================

    /// Match a wallet callback URL to its persisted intent.
    /// `transactionHashes` become pending records; `errorMessage`/`errorCode`
    /// consume the intent and surface a transient error notification.
    pub async fn resume_from_redirect(&self, callback_url: &str) -> Result<ResumeOutcome> {
        let url = Url::parse(callback_url).map_err(|e| anyhow!("Invalid callback URL: {}", e))?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let intent = match params.get("intent") {
            Some(id) => self.inner.store.take_intent(id).await,
            None => match self.inner.store.latest_intent().await {
                Some(latest) => self.inner.store.take_intent(&latest.id).await,
                None => None,
            },
        };
        let intent = intent.ok_or_else(|| anyhow!("No pending wallet intent matches {}", callback_url))?;

        if let Some(message) = params.get("errorMessage").or_else(|| params.get("errorCode")) {
            warn!("Wallet returned an error for intent {}: {}", intent.id, message);
            self.inner.notifier.notify(&Notification {
                hash: intent.id.clone(),
                title: intent.draft.message.clone(),
                summary: message.clone(),
                status: TxStatus::Error,
            });
            return Ok(ResumeOutcome::Rejected {
                message: message.clone(),
                intent,
            });
        }

        let hashes: Vec<&str> = params
            .get("transactionHashes")
            .map(|h| h.split(',').map(str::trim).filter(|h| !h.is_empty()).collect())
            .unwrap_or_default();
        if hashes.is_empty() {
            // Restore so a later callback can still match it
            self.inner.store.put_intent(intent).await;
            return Err(anyhow!("Callback carries neither transactionHashes nor errorMessage"));
        }

        let mut records = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let record = intent.draft.clone().into_record(hash);
            let network = self.inner.store.append(record.clone()).await;
            self.announce(&record);
            self.watch(&network, record.clone());
            records.push(record);
        }
        info!("Resumed intent {} as {} transaction(s)", intent.id, records.len());
        Ok(ResumeOutcome::Tracking(records))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Rebind to another network. Watchers of the old partition are aborted;
    /// any evidence they still carry is rejected by the store.
    pub async fn switch_network(&self, context: ChainContext) {
        let aborted = self.abort_all();
        lock(&self.inner.seen).clear();
        self.inner.appchains.write().await.clear();

        let network = context.network_id().clone();
        *self
            .inner
            .context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = context;
        self.inner.store.set_active_network(network.clone()).await;
        info!("Switched to {} ({} watcher(s) aborted)", network, aborted);
    }

    /// Abort every watcher; pending records stay `Loading` for the next run
    pub fn shutdown(&self) {
        let aborted = self.abort_all();
        if aborted > 0 {
            info!("Reconciler stopped, {} watcher(s) aborted", aborted);
        }
    }
}
