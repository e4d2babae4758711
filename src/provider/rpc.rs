//! JSON-RPC implementations of the collaborator traits.

use std::borrow::Cow;

use alloy_primitives::{Address, B256, Bytes, U256, aliases::U192};
use alloy_provider::{Provider, RootProvider};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

use super::{
    BundlerProvider, FeeHints, GasEstimate, NodeProvider, PaymasterFields, PaymasterProvider, ProviderError,
    SponsorResponse, UserOperationReceipt,
};
use crate::safe::{OwnerConfig, UserOperation, contracts};
use crate::webauthn::WebAuthnPublicKey;

/// Thin wrapper issuing raw JSON-RPC requests and mapping error payloads.
#[derive(Debug, Clone)]
struct JsonRpc {
    inner: RootProvider,
}

impl JsonRpc {
    fn new(url: Url) -> Self {
        Self { inner: RootProvider::new_http(url) }
    }

    async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, ProviderError>
    where
        P: Serialize + Clone + std::fmt::Debug + Send + Sync + Unpin,
        R: DeserializeOwned + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        tracing::trace!(method, "JSON-RPC request");
        self.inner.raw_request::<P, R>(Cow::Borrowed(method), params).await.map_err(|e| {
            match e.as_error_resp() {
                Some(payload) => ProviderError::Rejected { code: payload.code, message: payload.message.to_string() },
                None => ProviderError::Rpc(format!("{method}: {e}")),
            }
        })
    }

    async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, ProviderError> {
        let tx = serde_json::json!({ "to": to, "data": Bytes::from(call.abi_encode()) });
        let output: Bytes = self.request("eth_call", (tx, "latest")).await?;
        C::abi_decode_returns(&output).map_err(|e| ProviderError::Decode(format!("{}: {e}", C::SIGNATURE)))
    }
}

/// Ethereum node (`JSON_RPC_NODE_PROVIDER`).
#[derive(Debug, Clone)]
pub struct RpcNode {
    rpc: JsonRpc,
}

impl RpcNode {
    pub fn new(url: Url) -> Self {
        Self { rpc: JsonRpc::new(url) }
    }
}

#[async_trait]
impl NodeProvider for RpcNode {
    async fn nonce(&self, entry_point: Address, sender: Address) -> Result<U256, ProviderError> {
        self.rpc.call(entry_point, contracts::getNonceCall { sender, key: U192::ZERO }).await
    }

    async fn fee_hints(&self) -> Result<FeeHints, ProviderError> {
        let gas_price: U256 = self.rpc.request("eth_gasPrice", ()).await?;
        let priority: U256 = self.rpc.request("eth_maxPriorityFeePerGas", ()).await?;
        // Leave headroom for a base fee bump between estimation and inclusion.
        let max_fee = gas_price.saturating_mul(U256::from(2)).max(priority);
        Ok(FeeHints { max_fee_per_gas: max_fee, max_priority_fee_per_gas: priority })
    }

    async fn owner_config(&self, account: Address) -> Result<Option<OwnerConfig>, ProviderError> {
        let code: Bytes = self.rpc.request("eth_getCode", (account, "latest")).await?;
        if code.is_empty() {
            return Ok(None);
        }
        let owners = self.rpc.call(account, contracts::getOwnersCall {}).await?;
        let threshold = self.rpc.call(account, contracts::getThresholdCall {}).await?;
        let threshold = usize::try_from(threshold).map_err(|e| ProviderError::Decode(e.to_string()))?;
        OwnerConfig::new(owners, threshold).map(Some).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn proxy_creation_code(&self, factory: Address) -> Result<Bytes, ProviderError> {
        self.rpc.call(factory, contracts::proxyCreationCodeCall {}).await
    }

    async fn shared_signer_key(
        &self,
        shared_signer: Address,
        account: Address,
    ) -> Result<Option<WebAuthnPublicKey>, ProviderError> {
        let config = self.rpc.call(shared_signer, contracts::getConfigurationCall { account }).await?;
        if config.x.is_zero() && config.y.is_zero() {
            return Ok(None);
        }
        Ok(Some(WebAuthnPublicKey { x: config.x, y: config.y }))
    }
}

/// ERC-4337 bundler (`BUNDLER_URL`).
#[derive(Debug, Clone)]
pub struct RpcBundler {
    rpc: JsonRpc,
}

impl RpcBundler {
    pub fn new(url: Url) -> Self {
        Self { rpc: JsonRpc::new(url) }
    }
}

#[async_trait]
impl BundlerProvider for RpcBundler {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, ProviderError> {
        self.rpc.request("eth_estimateUserOperationGas", (op.clone(), entry_point)).await
    }

    async fn send_user_operation(&self, op: &UserOperation, entry_point: Address) -> Result<B256, ProviderError> {
        self.rpc.request("eth_sendUserOperation", (op.clone(), entry_point)).await
    }

    async fn user_operation_receipt(&self, hash: B256) -> Result<Option<UserOperationReceipt>, ProviderError> {
        self.rpc.request("eth_getUserOperationReceipt", (hash,)).await
    }
}

/// Sponsoring paymaster (`PAYMASTER_RPC`).
#[derive(Debug, Clone)]
pub struct RpcPaymaster {
    rpc:      JsonRpc,
    chain_id: u64,
}

impl RpcPaymaster {
    pub fn new(url: Url, chain_id: u64) -> Self {
        Self { rpc: JsonRpc::new(url), chain_id }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyContext {
    sponsorship_policy_id: String,
}

#[async_trait]
impl PaymasterProvider for RpcPaymaster {
    async fn stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<PaymasterFields, ProviderError> {
        let context = PolicyContext { sponsorship_policy_id: policy_id.to_string() };
        self.rpc
            .request("pm_getPaymasterStubData", (op.clone(), entry_point, format!("{:#x}", self.chain_id), context))
            .await
    }

    async fn sponsor(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<SponsorResponse, ProviderError> {
        let context = PolicyContext { sponsorship_policy_id: policy_id.to_string() };
        self.rpc.request("pm_sponsorUserOperation", (op.clone(), entry_point, context)).await
    }
}
