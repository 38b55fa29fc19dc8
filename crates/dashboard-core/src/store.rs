//! ============================================================================
//! Transaction Store - network-partitioned records with write-through persistence
//! ============================================================================
//! The in-memory map is authoritative for the process lifetime. Every mutation
//! rewrites the affected durable key; write failures are logged and the
//! in-memory state is kept.
//! ============================================================================

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::{Persistence, INTENTS_KEY, LOCALE_KEY, TRANSACTIONS_KEY};
use crate::types::{NetworkId, RedirectIntent, StoreStats, TxFilter, TxPatch, TxRecord, TxStatus};

type Partitions<T> = BTreeMap<NetworkId, BTreeMap<String, T>>;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("unknown transaction hash: {0}")]
    UnknownHash(String),

    #[error("transaction {hash} is already {from}, cannot move to {to}")]
    IllegalTransition {
        hash: String,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("partition {expected} is no longer active (active: {active})")]
    InactivePartition { expected: NetworkId, active: NetworkId },
}

struct StoreState {
    active: NetworkId,
    transactions: Partitions<TxRecord>,
    intents: Partitions<RedirectIntent>,
    locale: Option<String>,
}

/// Process-wide transaction store
pub struct TxStore {
    backend: Arc<dyn Persistence>,
    state: RwLock<StoreState>,
}

fn load_json<T: DeserializeOwned + Default>(backend: &dyn Persistence, key: &str) -> T {
    match backend.load(key) {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed {} in storage: {}", key, e);
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!("Failed to read {} from storage: {}", key, e);
            T::default()
        }
    }
}

impl TxStore {
    /// Load persisted state and activate `network`
    pub fn open(backend: Arc<dyn Persistence>, network: NetworkId) -> Self {
        let transactions: Partitions<TxRecord> = load_json(backend.as_ref(), TRANSACTIONS_KEY);
        let intents: Partitions<RedirectIntent> = load_json(backend.as_ref(), INTENTS_KEY);
        let locale: Option<String> = load_json(backend.as_ref(), LOCALE_KEY);

        info!(
            "Transaction store loaded: {} partitions, active {}",
            transactions.len(),
            network
        );

        Self {
            backend,
            state: RwLock::new(StoreState {
                active: network,
                transactions,
                intents,
                locale,
            }),
        }
    }

    /// Write `value` through to the backend under `key`.
    ///
    /// Called with the state write guard held, so the backend write is
    /// synchronous and blocks the calling worker thread until it commits.
    /// This keeps durable order identical to mutation order. Backends are
    /// expected to be local (redb or memory); a slow remote backend would
    /// stall every store caller.
    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to serialize {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.save(key, &bytes) {
            warn!("Failed to persist {} (keeping in-memory state): {}", key, e);
        }
    }

    // ========================================================================
    // Partition Management
    // ========================================================================

    pub async fn active_network(&self) -> NetworkId {
        self.state.read().await.active.clone()
    }

    pub async fn set_active_network(&self, network: NetworkId) {
        let mut state = self.state.write().await;
        if state.active != network {
            info!("Switching transaction partition {} -> {}", state.active, network);
            state.active = network;
        }
    }

    /// Networks with a persisted partition
    pub async fn networks(&self) -> Vec<NetworkId> {
        self.state.read().await.transactions.keys().cloned().collect()
    }

    // ========================================================================
    // Record Operations
    // ========================================================================

    /// Insert or overwrite the record keyed by its hash.
    /// Returns the partition the record was written to.
    pub async fn append(&self, record: TxRecord) -> NetworkId {
        let mut state = self.state.write().await;
        let active = state.active.clone();
        debug!("Append {} ({}) to {}", record.hash, record.status, active);
        state
            .transactions
            .entry(active.clone())
            .or_default()
            .insert(record.hash.clone(), record);
        self.persist(TRANSACTIONS_KEY, &state.transactions);
        active
    }

    /// Merge `patch` into the record at `hash` in the active partition.
    /// Returns whether the record changed.
    pub async fn update(&self, hash: &str, patch: &TxPatch) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let active = state.active.clone();
        let record = state
            .transactions
            .get_mut(&active)
            .and_then(|p| p.get_mut(hash))
            .ok_or_else(|| StoreError::UnknownHash(hash.to_string()))?;

        if let Some(to) = patch.status {
            if record.status.is_terminal() && to != record.status {
                return Err(StoreError::IllegalTransition {
                    hash: hash.to_string(),
                    from: record.status,
                    to,
                });
            }
        }

        let changed = patch.apply(record);
        if changed {
            self.persist(TRANSACTIONS_KEY, &state.transactions);
        }
        Ok(changed)
    }

    /// Guarded terminal write used by reconciliation tasks.
    /// Returns the updated record, or `None` when nothing was written
    /// (the record already holds the requested terminal status).
    pub async fn transition(
        &self,
        network: &NetworkId,
        hash: &str,
        patch: &TxPatch,
    ) -> Result<Option<TxRecord>, StoreError> {
        let mut state = self.state.write().await;
        if &state.active != network {
            return Err(StoreError::InactivePartition {
                expected: network.clone(),
                active: state.active.clone(),
            });
        }

        let record = state
            .transactions
            .get_mut(network)
            .and_then(|p| p.get_mut(hash))
            .ok_or_else(|| StoreError::UnknownHash(hash.to_string()))?;

        if record.status.is_terminal() {
            return match patch.status {
                Some(to) if to != record.status => Err(StoreError::IllegalTransition {
                    hash: hash.to_string(),
                    from: record.status,
                    to,
                }),
                _ => Ok(None),
            };
        }

        if !patch.apply(record) {
            return Ok(None);
        }
        debug!("Transaction {} -> {}", hash, record.status);
        let updated = record.clone();
        self.persist(TRANSACTIONS_KEY, &state.transactions);
        Ok(Some(updated))
    }

    /// Empty the active partition, persisting an explicit empty map for it
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let active = state.active.clone();
        let removed = state
            .transactions
            .insert(active.clone(), BTreeMap::new())
            .map(|p| p.len())
            .unwrap_or(0);
        self.persist(TRANSACTIONS_KEY, &state.transactions);
        info!("Cleared {} transactions from {}", removed, active);
    }

    pub async fn get(&self, hash: &str) -> Option<TxRecord> {
        let state = self.state.read().await;
        state
            .transactions
            .get(&state.active)
            .and_then(|p| p.get(hash))
            .cloned()
    }

    /// All records of the active partition, newest first
    pub async fn list(&self) -> Vec<TxRecord> {
        self.list_filtered(&TxFilter::default()).await
    }

    pub async fn list_filtered(&self, filter: &TxFilter) -> Vec<TxRecord> {
        let state = self.state.read().await;
        let mut records: Vec<TxRecord> = state
            .transactions
            .get(&state.active)
            .map(|p| p.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.added_time.cmp(&a.added_time));
        records
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let mut stats = StoreStats {
            network: state.active.to_string(),
            ..Default::default()
        };
        if let Some(partition) = state.transactions.get(&state.active) {
            stats.total = partition.len();
            for record in partition.values() {
                *stats
                    .by_status
                    .entry(record.status.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        stats.pending_intents = state.intents.get(&state.active).map_or(0, |p| p.len());
        stats
    }

    // ========================================================================
    // Redirect Intents
    // ========================================================================

    pub async fn put_intent(&self, intent: RedirectIntent) {
        let mut state = self.state.write().await;
        let active = state.active.clone();
        state
            .intents
            .entry(active)
            .or_default()
            .insert(intent.id.clone(), intent);
        self.persist(INTENTS_KEY, &state.intents);
    }

    pub async fn take_intent(&self, id: &str) -> Option<RedirectIntent> {
        let mut state = self.state.write().await;
        let active = state.active.clone();
        let taken = state.intents.get_mut(&active).and_then(|p| p.remove(id));
        if taken.is_some() {
            self.persist(INTENTS_KEY, &state.intents);
        }
        taken
    }

    /// Most recently created intent of the active partition
    pub async fn latest_intent(&self) -> Option<RedirectIntent> {
        let state = self.state.read().await;
        state
            .intents
            .get(&state.active)
            .and_then(|p| p.values().max_by_key(|i| i.created_at))
            .cloned()
    }

    pub async fn intents(&self) -> Vec<RedirectIntent> {
        let state = self.state.read().await;
        state
            .intents
            .get(&state.active)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Locale Preference
    // ========================================================================

    pub async fn locale(&self) -> Option<String> {
        self.state.read().await.locale.clone()
    }

    pub async fn set_locale(&self, locale: &str) {
        let mut state = self.state.write().await;
        state.locale = Some(locale.to_string());
        self.persist(LOCALE_KEY, &state.locale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryPersistence;
    use crate::types::TxDraft;
    use anyhow::anyhow;

    fn record(hash: &str, from: &str, appchain: &str, added_time: i64) -> TxRecord {
        let mut rec = TxDraft::new("Transfer Asset", "Transfer 5 OCT", from, appchain).into_record(hash);
        rec.added_time = added_time;
        rec
    }

    fn open(network: &str) -> (Arc<MemoryPersistence>, TxStore) {
        let mem = Arc::new(MemoryPersistence::new());
        let store = TxStore::open(mem.clone(), NetworkId::from(network));
        (mem, store)
    }

    struct FailingPersistence;

    impl Persistence for FailingPersistence {
        fn load(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Err(anyhow!("disk unavailable"))
        }

        fn save(&self, _key: &str, _value: &[u8]) -> anyhow::Result<()> {
            Err(anyhow!("quota exceeded"))
        }
    }

    #[tokio::test]
    async fn test_append_same_hash_overwrites() {
        let (_mem, store) = open("mainnet");
        store.append(record("h1", "alice", "a1", 100)).await;
        let mut second = record("h1", "alice", "a1", 200);
        second.summary = "Transfer 7 OCT".into();
        store.append(second.clone()).await;

        let all = store.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], second);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let (_mem, store) = open("mainnet");
        for (hash, t) in [("a", 100), ("b", 300), ("c", 200)] {
            store.append(record(hash, "alice", "a1", t)).await;
        }
        let times: Vec<i64> = store.list().await.iter().map(|r| r.added_time).collect();
        assert_eq!(times, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_filter_by_account_and_appchain() {
        let (_mem, store) = open("mainnet");
        store.append(record("h1", "alice", "a1", 1)).await;
        store.append(record("h2", "bob", "a1", 2)).await;

        let found = store.list_filtered(&TxFilter::scoped("alice", "a1")).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hash, "h1");
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let (_mem, store) = open("mainnet");
        let rec = record("h1", "alice", "a1", 1);
        store.append(rec.clone()).await;

        store.set_active_network(NetworkId::from("testnet")).await;
        assert!(store.list().await.is_empty());
        assert!(store.get("h1").await.is_none());

        store.set_active_network(NetworkId::from("mainnet")).await;
        assert_eq!(store.list().await, vec![rec]);
    }

    #[tokio::test]
    async fn test_append_reports_written_partition() {
        let (_mem, store) = open("mainnet");
        assert_eq!(
            store.append(record("h1", "alice", "a1", 1)).await,
            NetworkId::from("mainnet")
        );

        store.set_active_network(NetworkId::from("testnet")).await;
        let written = store.append(record("h2", "alice", "a1", 2)).await;
        assert_eq!(written, NetworkId::from("testnet"));

        let settled = store
            .transition(&written, "h2", &TxPatch::status(TxStatus::Success))
            .await
            .unwrap();
        assert_eq!(settled.map(|r| r.status), Some(TxStatus::Success));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_persisted() {
        let mem = Arc::new(MemoryPersistence::new());
        let store = Arc::new(TxStore::open(mem.clone(), NetworkId::from("mainnet")));
        let writes = mem.writes();

        let handles: Vec<_> = (0..16i64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(record(&format!("h{}", i), "alice", "a1", i))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(mem.writes(), writes + 16);
        let reloaded = TxStore::open(mem.clone(), NetworkId::from("mainnet"));
        assert_eq!(reloaded.list().await.len(), 16);
    }

    #[tokio::test]
    async fn test_clear_only_touches_active_partition() {
        let (mem, store) = open("testnet");
        store.append(record("t1", "alice", "a1", 1)).await;
        store.set_active_network(NetworkId::from("mainnet")).await;
        store.append(record("m1", "alice", "a1", 1)).await;

        store.clear().await;
        assert!(store.list().await.is_empty());

        let raw: serde_json::Value = serde_json::from_slice(&mem.raw(TRANSACTIONS_KEY).unwrap()).unwrap();
        assert_eq!(raw["mainnet"], serde_json::json!({}));
        assert!(raw["testnet"]["t1"].is_object());

        store.set_active_network(NetworkId::from("testnet")).await;
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_guards() {
        let (_mem, store) = open("mainnet");
        store.append(record("h1", "alice", "a1", 1)).await;

        let err = store.update("missing", &TxPatch::status(TxStatus::Success)).await;
        assert_eq!(err, Err(StoreError::UnknownHash("missing".into())));

        let patch = TxPatch::status(TxStatus::Error).with_message("insufficient balance");
        assert_eq!(store.update("h1", &patch).await, Ok(true));
        let rec = store.get("h1").await.unwrap();
        assert_eq!(rec.status, TxStatus::Error);
        assert_eq!(rec.message, "insufficient balance");
        assert_eq!(rec.summary, "Transfer 5 OCT");

        let err = store.update("h1", &TxPatch::status(TxStatus::Success)).await;
        assert!(matches!(err, Err(StoreError::IllegalTransition { .. })));
        assert_eq!(store.get("h1").await.unwrap().status, TxStatus::Error);
    }

    #[tokio::test]
    async fn test_transition_is_idempotent() {
        let (mem, store) = open("mainnet");
        let net = NetworkId::from("mainnet");
        store.append(record("h1", "alice", "a1", 1)).await;
        let writes = mem.writes();

        let patch = TxPatch::status(TxStatus::Success);
        let updated = store.transition(&net, "h1", &patch).await.unwrap().unwrap();
        assert_eq!(updated.status, TxStatus::Success);
        assert_eq!(store.transition(&net, "h1", &patch).await, Ok(None));
        assert_eq!(mem.writes(), writes + 1);

        let err = store
            .transition(&net, "h1", &TxPatch::status(TxStatus::TimedOut))
            .await;
        assert!(matches!(err, Err(StoreError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn test_transition_rejects_inactive_partition() {
        let (_mem, store) = open("mainnet");
        store.append(record("h1", "alice", "a1", 1)).await;
        store.set_active_network(NetworkId::from("testnet")).await;

        let err = store
            .transition(&NetworkId::from("mainnet"), "h1", &TxPatch::status(TxStatus::Success))
            .await;
        assert!(matches!(err, Err(StoreError::InactivePartition { .. })));
    }

    #[tokio::test]
    async fn test_reload_and_malformed_storage() {
        let mem = Arc::new(MemoryPersistence::new());
        {
            let store = TxStore::open(mem.clone(), NetworkId::from("mainnet"));
            store.append(record("h1", "alice", "a1", 1)).await;
            store.set_locale("zh-CN").await;
        }
        let reopened = TxStore::open(mem.clone(), NetworkId::from("mainnet"));
        assert_eq!(reopened.list().await.len(), 1);
        assert_eq!(reopened.locale().await.as_deref(), Some("zh-CN"));

        let garbage = Arc::new(MemoryPersistence::new().with_value(TRANSACTIONS_KEY, b"{not json"));
        let store = TxStore::open(garbage, NetworkId::from("mainnet"));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failures_keep_memory_state() {
        let store = TxStore::open(Arc::new(FailingPersistence), NetworkId::from("mainnet"));
        store.append(record("h1", "alice", "a1", 1)).await;
        assert_eq!(
            store.update("h1", &TxPatch::status(TxStatus::Success)).await,
            Ok(true)
        );
        assert_eq!(store.get("h1").await.unwrap().status, TxStatus::Success);
    }

    #[tokio::test]
    async fn test_intents_and_stats() {
        let (_mem, store) = open("mainnet");
        let draft = TxDraft::new("Redeem", "Redeem 1 OCT", "alice", "a1");
        for (id, at) in [("i1", 10), ("i2", 20)] {
            store
                .put_intent(RedirectIntent {
                    id: id.into(),
                    draft: draft.clone(),
                    contract_id: "a1.registry".into(),
                    method_name: "burn_wrapped_appchain_token".into(),
                    created_at: at,
                })
                .await;
        }
        assert_eq!(store.latest_intent().await.unwrap().id, "i2");
        assert_eq!(store.take_intent("i2").await.unwrap().id, "i2");
        assert!(store.take_intent("i2").await.is_none());

        store.append(record("h1", "alice", "a1", 1)).await;
        let stats = store.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status.get("loading"), Some(&1));
        assert_eq!(stats.pending_intents, 1);
    }
}
