//! ============================================================================
//! Configuration - network presets and reconciliation tuning
//! ============================================================================
//! Presets cover mainnet and testnet. Every field can be overridden with a
//! DASHBOARD_* environment variable (a .env file is honoured by the CLI).
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::NetworkId;

/// Chain endpoints and contract ids for one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_id: NetworkId,
    /// NEAR JSON-RPC endpoint
    pub near_rpc_url: String,
    /// Appchain registry contract; anchors live at `<appchain_id>.<registry>`
    pub registry_contract_id: String,
    /// OCT fungible token contract
    pub token_contract_id: String,
    /// Wallet signing page for change calls
    pub wallet_url: String,
    /// Where the wallet returns after signing
    pub callback_url: String,
    /// Appchain pallet holding the notification history
    pub notification_pallet: String,
}

impl NetworkConfig {
    pub fn mainnet() -> Self {
        Self {
            network_id: NetworkId::from("mainnet"),
            near_rpc_url: "https://rpc.mainnet.near.org".to_string(),
            registry_contract_id: "octopus-registry.near".to_string(),
            token_contract_id: "f5cfbc74057c610c8ef151a439252680ac68c6dc.factory.bridge.near"
                .to_string(),
            wallet_url: "https://app.mynearwallet.com".to_string(),
            callback_url: "http://localhost:3000/bridge".to_string(),
            notification_pallet: "OctopusAppchain".to_string(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            network_id: NetworkId::from("testnet"),
            near_rpc_url: "https://rpc.testnet.near.org".to_string(),
            registry_contract_id: "registry.test_oct.testnet".to_string(),
            token_contract_id: "oct.beta_oct_relay.testnet".to_string(),
            wallet_url: "https://testnet.mynearwallet.com".to_string(),
            callback_url: "http://localhost:3000/bridge".to_string(),
            notification_pallet: "OctopusAppchain".to_string(),
        }
    }

    /// Preset for a network name
    pub fn for_network(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "mainnet" => Ok(Self::mainnet()),
            "testnet" => Ok(Self::testnet()),
            other => Err(anyhow!(
                "Unknown network '{}'. Valid values: mainnet, testnet",
                other
            )),
        }
    }

    /// Anchor contract for an appchain
    pub fn anchor_contract_id(&self, appchain_id: &str) -> String {
        format!("{}.{}", appchain_id, self.registry_contract_id)
    }
}

/// Timing for confirmation polling and endpoint resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay between notification / tx-status polls
    pub poll_interval_ms: u64,
    /// Attempts to resolve and connect to an appchain endpoint
    pub max_connect_retries: u32,
    /// Base backoff delay (multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Add up to 50% random jitter to backoff delays
    pub jitter: bool,
    /// Deadline for a pending transaction to reach a terminal state
    pub confirmation_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            max_connect_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 10000,
            jitter: true,
            confirmation_timeout_secs: 1800,
        }
    }
}

impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub network: NetworkConfig,
    pub db_path: Option<PathBuf>,
    pub reconcile: ReconcileConfig,
}

impl DashboardConfig {
    /// Build from DASHBOARD_* variables, falling back to the network preset
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network_name = lookup("DASHBOARD_NETWORK").unwrap_or_else(|| "testnet".to_string());
        let mut network = NetworkConfig::for_network(&network_name)?;

        if let Some(v) = lookup("DASHBOARD_NEAR_RPC_URL") {
            network.near_rpc_url = v;
        }
        if let Some(v) = lookup("DASHBOARD_REGISTRY_CONTRACT") {
            network.registry_contract_id = v;
        }
        if let Some(v) = lookup("DASHBOARD_TOKEN_CONTRACT") {
            network.token_contract_id = v;
        }
        if let Some(v) = lookup("DASHBOARD_WALLET_URL") {
            network.wallet_url = v;
        }
        if let Some(v) = lookup("DASHBOARD_CALLBACK_URL") {
            network.callback_url = v;
        }
        if let Some(v) = lookup("DASHBOARD_NOTIFICATION_PALLET") {
            network.notification_pallet = v;
        }

        let mut reconcile = ReconcileConfig::default();
        if let Some(v) = lookup("DASHBOARD_POLL_INTERVAL_MS") {
            reconcile.poll_interval_ms = v
                .parse()
                .map_err(|e| anyhow!("Invalid DASHBOARD_POLL_INTERVAL_MS '{}': {}", v, e))?;
        }
        if let Some(v) = lookup("DASHBOARD_CONFIRMATION_TIMEOUT_SECS") {
            reconcile.confirmation_timeout_secs = v.parse().map_err(|e| {
                anyhow!("Invalid DASHBOARD_CONFIRMATION_TIMEOUT_SECS '{}': {}", v, e)
            })?;
        }

        Ok(Self {
            network,
            db_path: lookup("DASHBOARD_DB_PATH").map(PathBuf::from),
            reconcile,
        })
    }
}
