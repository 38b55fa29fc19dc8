//! ============================================================================
//! DASHBOARD-CORE: Appchain Bridge Transaction Tracking
//! ============================================================================
//! Backend logic for the appchain dashboard:
//! - Network-partitioned transaction store persisted to redb
//! - Typed NEAR contract calls with wallet redirect handling
//! - Reconciliation of pending transfers against origin and appchain evidence
//! - Notifications for every status change
//! ============================================================================

pub mod appchain;
pub mod config;
pub mod context;
pub mod contract;
pub mod db;
pub mod notifier;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod types;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use types::*;
pub use config::{DashboardConfig, NetworkConfig, ReconcileConfig};
pub use context::ChainContext;
pub use contract::{CallError, ChangeCall};
pub use db::{MemoryPersistence, Persistence, RedbPersistence};
pub use notifier::{LogNotifier, Notification, NotificationBoard, Notifier};
pub use reconciler::{Reconciler, ResumeOutcome, SubmitOutcome};
pub use store::{StoreError, TxStore};
