//! Chain access handed to every service that talks to a network.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::appchain::{AppchainConnector, SubstrateRpcConnector};
use crate::config::NetworkConfig;
use crate::contract::{ChangeCallSigner, ContractClient, NearRpcClient, RedirectSigner};
use crate::types::NetworkId;

/// Clients bound to one network
#[derive(Clone)]
pub struct ChainContext {
    pub network: NetworkConfig,
    pub contracts: Arc<dyn ContractClient>,
    pub signer: Arc<dyn ChangeCallSigner>,
    pub appchains: Arc<dyn AppchainConnector>,
}

impl ChainContext {
    /// Live clients: NEAR JSON-RPC, wallet redirect signing, Substrate RPC
    pub fn connect(network: NetworkConfig) -> Result<Self> {
        let contracts = NearRpcClient::new(&network.near_rpc_url)
            .map_err(|e| anyhow!("Failed to create NEAR client: {}", e))?;
        let signer = RedirectSigner::new(&network.wallet_url, &network.callback_url);
        let appchains = SubstrateRpcConnector::new(&network.notification_pallet);

        Ok(Self {
            network,
            contracts: Arc::new(contracts),
            signer: Arc::new(signer),
            appchains: Arc::new(appchains),
        })
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network.network_id
    }
}

impl std::fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContext")
            .field("network", &self.network.network_id)
            .field("near_rpc_url", &self.network.near_rpc_url)
            .finish()
    }
}
