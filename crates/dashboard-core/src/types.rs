//! ============================================================================
//! Core Types for the Appchain Dashboard
//! ============================================================================
//! Transaction records, status lifecycle, filters and redirect intents.
//! Records serialize to the camelCase JSON layout kept in durable storage.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Network identifier used to partition persisted state ("mainnet", "testnet", ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a tracked transaction.
/// `Loading` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxStatus {
    Loading,
    Success,
    Error,
    /// Confirmation wait exceeded the configured deadline
    TimedOut,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Loading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Loading => "loading",
            TxStatus::Success => "success",
            TxStatus::Error => "error",
            TxStatus::TimedOut => "timedOut",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "loading" | "pending" => Some(TxStatus::Loading),
            "success" => Some(TxStatus::Success),
            "error" | "failed" => Some(TxStatus::Error),
            "timedout" => Some(TxStatus::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a transaction before the origin chain assigns a hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDraft {
    /// Short label, e.g. "Transfer Asset"
    pub message: String,
    /// Longer description, e.g. "Transfer 5 OCT to alice"
    pub summary: String,
    /// Originating account
    pub from: String,
    /// Associated appchain
    pub appchain_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

impl TxDraft {
    pub fn new(
        message: impl Into<String>,
        summary: impl Into<String>,
        from: impl Into<String>,
        appchain_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            summary: summary.into(),
            from: from.into(),
            appchain_id: appchain_id.into(),
            notification_index: None,
            sequence_id: None,
        }
    }

    pub fn with_notification_index(mut self, index: u32) -> Self {
        self.notification_index = Some(index);
        self
    }

    /// Attach the origin-chain hash, producing a fresh `Loading` record
    pub fn into_record(self, hash: impl Into<String>) -> TxRecord {
        TxRecord {
            hash: hash.into(),
            status: TxStatus::Loading,
            message: self.message,
            summary: self.summary,
            added_time: chrono::Utc::now().timestamp_millis(),
            from: self.from,
            appchain_id: self.appchain_id,
            notification_index: self.notification_index,
            sequence_id: self.sequence_id,
        }
    }
}

/// Transaction record tracked by the store, keyed by `hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub hash: String,
    pub status: TxStatus,
    pub message: String,
    pub summary: String,
    /// Creation time in epoch millis
    pub added_time: i64,
    pub from: String,
    pub appchain_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

/// Partial update merged into an existing record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxPatch {
    pub status: Option<TxStatus>,
    pub message: Option<String>,
    pub summary: Option<String>,
    pub notification_index: Option<u32>,
    pub sequence_id: Option<u64>,
}

impl TxPatch {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Merge into `record`, returning whether anything changed
    pub fn apply(&self, record: &mut TxRecord) -> bool {
        let before = record.clone();
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(message) = &self.message {
            record.message = message.clone();
        }
        if let Some(summary) = &self.summary {
            record.summary = summary.clone();
        }
        if self.notification_index.is_some() {
            record.notification_index = self.notification_index;
        }
        if self.sequence_id.is_some() {
            record.sequence_id = self.sequence_id;
        }
        *record != before
    }
}

/// Scope used by readers and the reconciler to select records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxFilter {
    pub from: Option<String>,
    pub appchain_id: Option<String>,
    pub status: Option<TxStatus>,
}

impl TxFilter {
    pub fn scoped(from: impl Into<String>, appchain_id: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            appchain_id: Some(appchain_id.into()),
            status: None,
        }
    }

    pub fn matches(&self, record: &TxRecord) -> bool {
        self.from.as_deref().map_or(true, |f| f == record.from)
            && self
                .appchain_id
                .as_deref()
                .map_or(true, |a| a == record.appchain_id)
            && self.status.map_or(true, |s| s == record.status)
    }
}

/// Confirmation evidence fed to the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Confirmed,
    Failed(String),
    TimedOut,
}

impl Evidence {
    pub fn status(&self) -> TxStatus {
        match self {
            Evidence::Confirmed => TxStatus::Success,
            Evidence::Failed(_) => TxStatus::Error,
            Evidence::TimedOut => TxStatus::TimedOut,
        }
    }

    pub fn into_patch(self) -> TxPatch {
        match self {
            Evidence::Confirmed => TxPatch::status(TxStatus::Success),
            Evidence::Failed(cause) => TxPatch::status(TxStatus::Error).with_message(cause),
            Evidence::TimedOut => TxPatch::status(TxStatus::TimedOut),
        }
    }
}

/// Change call persisted before handing control to an external wallet.
/// Reconciled against the hashes carried back on the callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectIntent {
    pub id: String,
    pub draft: TxDraft,
    pub contract_id: String,
    pub method_name: String,
    pub created_at: i64,
}

/// Per-status counts for one partition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub network: String,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub pending_intents: usize,
}
