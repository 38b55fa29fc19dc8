//! ============================================================================
//! Contract Method Schemas
//! ============================================================================
//! Request/response shapes for the registry, anchor and token contracts.
//! U128 amounts travel as decimal strings.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ViewMethod;

/// Gas for single-receipt calls (50 Tgas)
pub const SIMPLE_CALL_GAS: &str = "50000000000000";

/// Gas for calls with cross-contract callbacks (200 Tgas)
pub const COMPLEX_CALL_GAS: &str = "200000000000000";

/// Deposit required by `ft_transfer_call` and bridge burns
pub const ONE_YOCTO: u128 = 1;

// ============================================================================
// View Methods
// ============================================================================

/// Anchor settings; carries the appchain's RPC endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct GetAppchainSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppchainSettings {
    pub rpc_endpoint: String,
    #[serde(default)]
    pub subql_endpoint: String,
    #[serde(default)]
    pub era_reward: Option<String>,
}

impl ViewMethod for GetAppchainSettings {
    const NAME: &'static str = "get_appchain_settings";
    type Output = AppchainSettings;

    fn args(&self) -> Value {
        json!({})
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetAnchorStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start_index: String,
    pub end_index: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorStatus {
    #[serde(default)]
    pub total_stake_in_oct: String,
    #[serde(default)]
    pub validator_count: u64,
    #[serde(default)]
    pub delegator_count: u64,
    #[serde(default)]
    pub index_range_of_appchain_notification_history: Option<IndexRange>,
}

impl ViewMethod for GetAnchorStatus {
    const NAME: &'static str = "get_anchor_status";
    type Output = AnchorStatus;

    fn args(&self) -> Value {
        json!({})
    }
}

/// Registry listing entry for one appchain
#[derive(Debug, Clone)]
pub struct GetAppchainStatusOf {
    pub appchain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppchainStatus {
    pub appchain_id: String,
    pub appchain_owner: String,
    pub appchain_state: String,
    #[serde(default)]
    pub upvote_deposit: String,
    #[serde(default)]
    pub downvote_deposit: String,
}

impl ViewMethod for GetAppchainStatusOf {
    const NAME: &'static str = "get_appchain_status_of";
    type Output = AppchainStatus;

    fn args(&self) -> Value {
        json!({ "appchain_id": self.appchain_id })
    }
}

/// Fungible token balance (U128 string)
#[derive(Debug, Clone)]
pub struct FtBalanceOf {
    pub account_id: String,
}

impl ViewMethod for FtBalanceOf {
    const NAME: &'static str = "ft_balance_of";
    type Output = String;

    fn args(&self) -> Value {
        json!({ "account_id": self.account_id })
    }
}

// ============================================================================
// Change Methods
// ============================================================================

/// State-changing methods the dashboard submits
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeMethod {
    FtTransferCall {
        receiver_id: String,
        amount: u128,
        msg: String,
    },
    BurnWrappedAppchainToken {
        receiver_id: String,
        amount: u128,
    },
    DecreaseStake {
        amount: u128,
    },
    UnbondStake,
    WithdrawStake {
        account_id: String,
    },
    WithdrawValidatorRewards {
        validator_id: String,
    },
}

impl ChangeMethod {
    pub fn method_name(&self) -> &'static str {
        match self {
            ChangeMethod::FtTransferCall { .. } => "ft_transfer_call",
            ChangeMethod::BurnWrappedAppchainToken { .. } => "burn_wrapped_appchain_token",
            ChangeMethod::DecreaseStake { .. } => "decrease_stake",
            ChangeMethod::UnbondStake => "unbond_stake",
            ChangeMethod::WithdrawStake { .. } => "withdraw_stake",
            ChangeMethod::WithdrawValidatorRewards { .. } => "withdraw_validator_rewards",
        }
    }

    pub fn args(&self) -> Value {
        match self {
            ChangeMethod::FtTransferCall {
                receiver_id,
                amount,
                msg,
            } => json!({
                "receiver_id": receiver_id,
                "amount": amount.to_string(),
                "msg": msg,
            }),
            ChangeMethod::BurnWrappedAppchainToken { receiver_id, amount } => json!({
                "receiver_id": receiver_id,
                "amount": amount.to_string(),
            }),
            ChangeMethod::DecreaseStake { amount } => json!({ "amount": amount.to_string() }),
            ChangeMethod::UnbondStake => json!({}),
            ChangeMethod::WithdrawStake { account_id } => json!({ "account_id": account_id }),
            ChangeMethod::WithdrawValidatorRewards { validator_id } => {
                json!({ "validator_id": validator_id })
            }
        }
    }
}

/// A change call ready for signing
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCall {
    pub contract_id: String,
    pub method: ChangeMethod,
    /// Gas budget, opaque integer string
    pub gas: String,
    /// Attached deposit in yoctoNEAR
    pub deposit: u128,
}

impl ChangeCall {
    pub fn new(contract_id: impl Into<String>, method: ChangeMethod) -> Self {
        Self {
            contract_id: contract_id.into(),
            method,
            gas: SIMPLE_CALL_GAS.to_string(),
            deposit: 0,
        }
    }

    pub fn with_gas(mut self, gas: &str) -> Self {
        self.gas = gas.to_string();
        self
    }

    pub fn with_deposit(mut self, deposit: u128) -> Self {
        self.deposit = deposit;
        self
    }

    fn token_transfer(token_contract: &str, receiver_id: &str, amount: u128, msg: Value) -> Self {
        let msg = match msg {
            Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        };
        Self::new(
            token_contract,
            ChangeMethod::FtTransferCall {
                receiver_id: receiver_id.to_string(),
                amount,
                msg,
            },
        )
        .with_gas(COMPLEX_CALL_GAS)
        .with_deposit(ONE_YOCTO)
    }

    /// Lock OCT (or another NEP-141 token) in the anchor and mint on the appchain
    pub fn bridge_to_appchain(
        token_contract: &str,
        anchor_id: &str,
        receiver_in_appchain: &str,
        amount: u128,
    ) -> Self {
        Self::token_transfer(
            token_contract,
            anchor_id,
            amount,
            json!({ "BridgeToAppchain": { "receiver_id_in_appchain": receiver_in_appchain } }),
        )
    }

    /// Burn wrapped appchain tokens on NEAR, releasing them on the appchain
    pub fn burn_wrapped_appchain_token(anchor_id: &str, receiver_in_appchain: &str, amount: u128) -> Self {
        Self::new(
            anchor_id,
            ChangeMethod::BurnWrappedAppchainToken {
                receiver_id: receiver_in_appchain.to_string(),
                amount,
            },
        )
        .with_gas(COMPLEX_CALL_GAS)
        .with_deposit(ONE_YOCTO)
    }

    pub fn increase_stake(token_contract: &str, anchor_id: &str, amount: u128) -> Self {
        Self::token_transfer(token_contract, anchor_id, amount, json!("IncreaseStake"))
    }

    pub fn upvote_appchain(token_contract: &str, registry_id: &str, appchain_id: &str, amount: u128) -> Self {
        Self::token_transfer(
            token_contract,
            registry_id,
            amount,
            json!({ "UpvoteAppchain": { "appchain_id": appchain_id } }),
        )
    }

    pub fn downvote_appchain(token_contract: &str, registry_id: &str, appchain_id: &str, amount: u128) -> Self {
        Self::token_transfer(
            token_contract,
            registry_id,
            amount,
            json!({ "DownvoteAppchain": { "appchain_id": appchain_id } }),
        )
    }

    pub fn decrease_stake(anchor_id: &str, amount: u128) -> Self {
        Self::new(anchor_id, ChangeMethod::DecreaseStake { amount }).with_gas(COMPLEX_CALL_GAS)
    }

    pub fn unbond_stake(anchor_id: &str) -> Self {
        Self::new(anchor_id, ChangeMethod::UnbondStake).with_gas(COMPLEX_CALL_GAS)
    }

    pub fn withdraw_stake(anchor_id: &str, account_id: &str) -> Self {
        Self::new(
            anchor_id,
            ChangeMethod::WithdrawStake {
                account_id: account_id.to_string(),
            },
        )
        .with_gas(COMPLEX_CALL_GAS)
    }

    pub fn withdraw_validator_rewards(anchor_id: &str, validator_id: &str) -> Self {
        Self::new(
            anchor_id,
            ChangeMethod::WithdrawValidatorRewards {
                validator_id: validator_id.to_string(),
            },
        )
        .with_gas(COMPLEX_CALL_GAS)
    }

    pub fn method_name(&self) -> &'static str {
        self.method.method_name()
    }

    pub fn args(&self) -> Value {
        self.method.args()
    }
}
