// ============================================================================
// Durable Persistence (redb)
// ============================================================================
// Byte-level key/value storage behind the transaction store. Values are JSON
// documents written whole on every mutation.
// Default path: ~/.appchain-dashboard/dashboard.redb (override via DASHBOARD_DB_PATH)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Durable key holding network -> hash -> transaction record
pub const TRANSACTIONS_KEY: &str = "transactions";
/// Durable key holding network -> intent id -> redirect intent
pub const INTENTS_KEY: &str = "redirectIntents";
/// Durable key holding the locale preference
pub const LOCALE_KEY: &str = "locale";

const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Key/value backend for the store
pub trait Persistence: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn save(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Embedded database backend
pub struct RedbPersistence {
    db: Database,
    path: PathBuf,
}

impl RedbPersistence {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses DASHBOARD_DB_PATH or ~/.appchain-dashboard/dashboard.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            p.to_path_buf()
        } else if let Ok(env_path) = std::env::var("DASHBOARD_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".appchain-dashboard");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .appchain-dashboard directory: {}", e))?;
            dir.join("dashboard.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(|e| anyhow!("Failed to open database: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to create kv table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for RedbPersistence {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(KV)
            .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;

        let value = table
            .get(key)
            .map_err(|e| anyhow!("Failed to get {}: {}", key, e))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;
            table
                .insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Saved {} ({} bytes)", key, value.len());
        Ok(())
    }
}

/// In-process backend. Used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value without counting it as a write
    pub fn with_value(self, key: &str, value: &[u8]) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_vec());
        }
        self
    }

    /// Number of successful saves
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().ok().and_then(|v| v.get(key).cloned())
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow!("Memory persistence lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow!("Memory persistence lock poisoned"))?;
        values.insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
