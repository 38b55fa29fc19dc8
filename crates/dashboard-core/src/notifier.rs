//! ============================================================================
//! Notifier - user-facing transaction notifications
//! ============================================================================
//! One notification per transaction hash: created on first sight of a
//! pending record, then updated in place as the status changes.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::{TxRecord, TxStatus};

/// Feed capacity for live notification consumers
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub hash: String,
    pub title: String,
    pub summary: String,
    pub status: TxStatus,
}

impl Notification {
    pub fn for_record(record: &TxRecord) -> Self {
        Self {
            hash: record.hash.clone(),
            title: record.message.clone(),
            summary: record.summary.clone(),
            status: record.status,
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Create or update the notification keyed by `notification.hash`
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) {
        match n.status {
            TxStatus::Loading => info!("[{}] {} - {} (pending)", n.hash, n.title, n.summary),
            TxStatus::Success => info!("[{}] {} - {} (confirmed)", n.hash, n.title, n.summary),
            TxStatus::Error => warn!("[{}] {} failed: {}", n.hash, n.summary, n.title),
            TxStatus::TimedOut => warn!("[{}] {} - {} timed out", n.hash, n.title, n.summary),
        }
    }
}

/// Keyed notification board with a broadcast feed
pub struct NotificationBoard {
    entries: Mutex<HashMap<String, Notification>>,
    updates: Mutex<usize>,
    feed: broadcast::Sender<Notification>,
}

impl Default for NotificationBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBoard {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            updates: Mutex::new(0),
            feed,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.feed.subscribe()
    }

    pub fn get(&self, hash: &str) -> Option<Notification> {
        self.entries.lock().ok().and_then(|e| e.get(hash).cloned())
    }

    /// Number of live notifications
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total notify calls received
    pub fn updates(&self) -> usize {
        self.updates.lock().map(|u| *u).unwrap_or(0)
    }

    pub fn dismiss(&self, hash: &str) -> bool {
        self.entries
            .lock()
            .map(|mut e| e.remove(hash).is_some())
            .unwrap_or(false)
    }
}

impl Notifier for NotificationBoard {
    fn notify(&self, notification: &Notification) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(notification.hash.clone(), notification.clone());
        }
        if let Ok(mut updates) = self.updates.lock() {
            *updates += 1;
        }
        // No subscribers is fine
        let _ = self.feed.send(notification.clone());
    }
}
