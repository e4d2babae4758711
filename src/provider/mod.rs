//! Collaborators the lifecycle talks to: an Ethereum node, an ERC-4337 bundler
//! and a sponsoring paymaster.

pub mod rpc;

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::safe::{OwnerConfig, UserOperation};
use crate::webauthn::WebAuthnPublicKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("rpc: {0}")]                      Rpc(String),
    #[error("decode: {0}")]                   Decode(String),
    #[error("rejected ({code}): {message}")]  Rejected { code: i64, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHints {
    pub max_fee_per_gas:          U256,
    pub max_priority_fee_per_gas: U256,
}

/// `eth_estimateUserOperationGas` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas:   U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit:         U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit:      Option<U256>,
}

/// Who pays, as reported by the paymaster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Paymaster fields to merge into a UserOperation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterFields {
    pub paymaster:      Address,
    pub paymaster_data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit:      Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor:        Option<SponsorMetadata>,
}

/// Final sponsorship: paymaster fields plus the gas limits the paymaster signed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorResponse {
    #[serde(flatten)]
    pub fields: PaymasterFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_verification_gas:   Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_gas_limit:         Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInclusion {
    pub transaction_hash: B256,
    pub block_number:     U64,
}

/// `eth_getUserOperationReceipt` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash:    B256,
    pub sender:          Address,
    pub nonce:           U256,
    pub success:         bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason:          Option<String>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub receipt:         TransactionInclusion,
}

/// Final state of a submitted UserOperation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Included(UserOperationReceipt),
    /// Mined, but the account call reverted. Not an error: the nonce was consumed.
    IncludedButFailed(UserOperationReceipt),
}

impl Outcome {
    pub fn from_receipt(receipt: UserOperationReceipt) -> Self {
        if receipt.success { Self::Included(receipt) } else { Self::IncludedButFailed(receipt) }
    }

    pub fn receipt(&self) -> &UserOperationReceipt {
        match self {
            Self::Included(r) | Self::IncludedButFailed(r) => r,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Included(_))
    }

    pub fn transaction_hash(&self) -> B256 {
        self.receipt().receipt.transaction_hash
    }
}

#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// EntryPoint nonce for `sender` under key 0.
    async fn nonce(&self, entry_point: Address, sender: Address) -> Result<U256, ProviderError>;

    async fn fee_hints(&self) -> Result<FeeHints, ProviderError>;

    /// Current owners and threshold, or `None` while the account is not deployed.
    async fn owner_config(&self, account: Address) -> Result<Option<OwnerConfig>, ProviderError>;

    async fn proxy_creation_code(&self, factory: Address) -> Result<Bytes, ProviderError>;

    /// Passkey the shared WebAuthn signer holds for `account`, `None` when unset.
    async fn shared_signer_key(
        &self,
        shared_signer: Address,
        account: Address,
    ) -> Result<Option<WebAuthnPublicKey>, ProviderError>;
}

#[async_trait]
pub trait BundlerProvider: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, ProviderError>;

    /// Returns the UserOperation hash assigned by the EntryPoint.
    async fn send_user_operation(&self, op: &UserOperation, entry_point: Address) -> Result<B256, ProviderError>;

    /// `None` until the operation is mined.
    async fn user_operation_receipt(&self, hash: B256) -> Result<Option<UserOperationReceipt>, ProviderError>;
}

/// Bound to one chain. A sponsorship policy refusal is reported as
/// `ProviderError::Rejected`.
#[async_trait]
pub trait PaymasterProvider: Send + Sync {
    async fn stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<PaymasterFields, ProviderError>;

    async fn sponsor(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<SponsorResponse, ProviderError>;
}
